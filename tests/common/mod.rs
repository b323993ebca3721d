#![allow(dead_code)]

use inverter_collector::datalogger::packet::{ACK_LEN, FRAME_LEN};
use inverter_collector::datalogger::transport::{Establish, Link};
use inverter_collector::error::TransportError;
use inverter_collector::prelude::*;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn peer() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 50], 8899))
}

pub struct Factory();
impl Factory {
    pub fn inverter_serial() -> [u8; 14] {
        *b"SN000000000042"
    }

    /// A reading frame with a handful of registers filled in; everything
    /// else is zero.
    pub fn reading_frame(logger_serial: u32, temperature: u16) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[0] = 0x68;
        frame[4..8].copy_from_slice(&logger_serial.to_le_bytes());
        frame[0x11..0x1f].copy_from_slice(&Self::inverter_serial());
        frame[0x1f..0x21].copy_from_slice(&temperature.to_be_bytes());
        frame[0x39..0x3b].copy_from_slice(&5000u16.to_be_bytes());
        frame[0x45..0x47].copy_from_slice(&1234u16.to_be_bytes());
        frame[0x49..0x4b].copy_from_slice(&43210u16.to_be_bytes());
        frame[FRAME_LEN - 1] = 0x16;
        frame
    }

    pub fn ack() -> Vec<u8> {
        let mut ack = vec![0u8; ACK_LEN];
        ack[0] = 0x68;
        ack[ACK_LEN - 1] = 0x16;
        ack
    }
}

/// Waits for the next reading published on `receiver`, skipping connection
/// state messages.
pub async fn next_reading(receiver: &mut broadcast::Receiver<ChannelData>) -> Result<Reading> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await?? {
            ChannelData::Reading(reading) => return Ok(reading),
            _ => continue,
        }
    }
}

pub async fn next_disconnect(receiver: &mut broadcast::Receiver<ChannelData>) -> Result<SocketAddr> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await?? {
            ChannelData::Disconnect(addr) => return Ok(addr),
            _ => continue,
        }
    }
}

pub async fn next_connected(receiver: &mut broadcast::Receiver<ChannelData>) -> Result<SocketAddr> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await?? {
            ChannelData::Connected(addr) => return Ok(addr),
            _ => continue,
        }
    }
}

// ScriptedLink {{{
pub enum Reply {
    Data(Vec<u8>),
    Closed,
    TimedOut,
    Broken,
}

/// What happened on a ScriptedLink, readable after the session owns it.
#[derive(Debug, Default)]
pub struct LinkLog {
    pub sent: Vec<Vec<u8>>,
    pub recv_sizes: Vec<usize>,
    pub closed: bool,
}

/// Plays back canned replies, one per recv. Once the script runs out every
/// recv blocks forever, like a quiet datalogger.
pub struct ScriptedLink {
    peer: SocketAddr,
    replies: VecDeque<Reply>,
    log: Arc<Mutex<LinkLog>>,
}

impl ScriptedLink {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            peer: peer(),
            replies: replies.into(),
            log: Arc::new(Mutex::new(LinkLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<LinkLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl Link for ScriptedLink {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.log.lock().unwrap().sent.push(bytes.to_vec());
        Ok(bytes.len())
    }

    async fn recv(&mut self, max_len: usize) -> Result<Bytes, TransportError> {
        self.log.lock().unwrap().recv_sizes.push(max_len);

        let peer = self.peer;
        match self.replies.pop_front() {
            Some(Reply::Data(mut data)) => {
                data.truncate(max_len);
                Ok(Bytes::from(data))
            }
            Some(Reply::Closed) => Err(TransportError::Disconnected { peer }),
            Some(Reply::TimedOut) => Err(TransportError::Io {
                peer,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "receive timed out"),
            }),
            Some(Reply::Broken) => Err(TransportError::Io {
                peer,
                source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
            }),
            None => futures::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
} // }}}

// ScriptedEstablish {{{
pub enum Attempt {
    Link(ScriptedLink),
    Refuse,
    AcceptFail,
}

/// Hands out links (or failures) in order. Once the script runs out it
/// blocks forever.
pub struct ScriptedEstablish {
    attempts: VecDeque<Attempt>,
    count: Arc<AtomicUsize>,
}

impl ScriptedEstablish {
    pub fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: attempts.into(),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

pub fn attempts(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

#[async_trait]
impl Establish for ScriptedEstablish {
    type Link = ScriptedLink;

    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn establish(&mut self) -> Result<ScriptedLink, TransportError> {
        let addr = peer();
        match self.attempts.pop_front() {
            Some(attempt) => {
                self.count.fetch_add(1, Ordering::SeqCst);
                match attempt {
                    Attempt::Link(link) => Ok(link),
                    Attempt::Refuse => Err(TransportError::Connect {
                        addr,
                        source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                    }),
                    Attempt::AcceptFail => Err(TransportError::Accept {
                        addr,
                        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
                    }),
                }
            }
            None => futures::future::pending().await,
        }
    }
} // }}}
