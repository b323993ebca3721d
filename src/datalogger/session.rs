use crate::datalogger::packet::{self, RequestFrame, SerialField, ACK_LEN, FRAME_LEN};
use crate::datalogger::transport::{Establish, Link};
use crate::error::{DecodeError, TransportError};
use crate::prelude::*;

use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Active,
    // client only: swallowing the acknowledgement that follows a frame
    Draining,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Poll a datalogger that is listening for us.
    Client { serial: u32, poll_delay: Duration },
    /// Wait for dataloggers to connect and push frames at us.
    Server,
}

/// Result of one receive on an active link.
enum Exchange {
    Reading(Reading),
    Invalid(DecodeError),
    Ignored(usize),
    Lost(TransportError),
}

/// Drives the request/response exchange over whatever `E` establishes, and
/// publishes every decoded reading on `channels.from_inverter`.
///
/// The loop only ends on a shutdown signal or a fatal error: a failure to
/// connect before the first successful connection (client), or a failure to
/// accept (server).
pub struct Session<E: Establish> {
    role: Role,
    establish: E,
    channels: Channels,
    shutdown: broadcast::Receiver<()>,
    serial_field: SerialField,
    state: State,
}

impl<E: Establish> Session<E> {
    pub fn new(
        role: Role,
        establish: E,
        channels: Channels,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            role,
            establish,
            channels,
            shutdown,
            serial_field: SerialField::Copy,
            state: State::Disconnected,
        }
    }

    pub fn client(
        establish: E,
        serial: u32,
        poll_delay: Duration,
        channels: Channels,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self::new(Role::Client { serial, poll_delay }, establish, channels, shutdown)
    }

    pub fn server(establish: E, channels: Channels, shutdown: broadcast::Receiver<()>) -> Self {
        Self::new(Role::Server, establish, channels, shutdown)
    }

    pub fn with_serial_field(mut self, serial_field: SerialField) -> Self {
        self.serial_field = serial_field;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub async fn run(mut self) -> Result<(), TransportError> {
        let result = match self.role {
            Role::Client { serial, poll_delay } => self.run_client(serial, poll_delay).await,
            Role::Server => self.run_server().await,
        };

        if result.is_ok() {
            info!("{}: session stopped", self.establish.describe());
        }
        result
    }

    async fn run_client(&mut self, serial: u32, poll_delay: Duration) -> Result<(), TransportError> {
        let request = packet::encode_request(serial);
        let serial_field = self.serial_field;
        let mut link: Option<E::Link> = None;
        let mut connected_once = false;

        info!(
            "polling datalogger {} at {} every {}s",
            serial,
            self.establish.describe(),
            poll_delay.as_secs()
        );

        loop {
            match self.state {
                State::Disconnected => {
                    if let Some(mut l) = link.take() {
                        l.close();
                    }
                    if connected_once {
                        info!(
                            "{}: reconnecting in {}s",
                            self.establish.describe(),
                            poll_delay.as_secs()
                        );
                        if !self.pause(poll_delay).await {
                            break;
                        }
                    }
                    self.transition(State::Connecting);
                }

                State::Connecting => {
                    match until_shutdown(&mut self.shutdown, self.establish.establish()).await {
                        None => break,
                        Some(Ok(l)) => {
                            self.announce(ChannelData::Connected(l.peer()));
                            link = Some(l);
                            connected_once = true;
                            self.transition(State::Active);
                        }
                        Some(Err(e)) if !connected_once => {
                            error!("{}: {}", self.establish.describe(), e);
                            return Err(e);
                        }
                        Some(Err(e)) => {
                            warn!("{}: {}", self.establish.describe(), e);
                            self.transition(State::Disconnected);
                        }
                    }
                }

                State::Active => {
                    let Some(l) = link.as_mut() else {
                        self.transition(State::Disconnected);
                        continue;
                    };
                    let peer = l.peer();

                    let exchange =
                        until_shutdown(&mut self.shutdown, request_reading(l, &request, serial_field));
                    match exchange.await {
                        None => break,
                        Some(Exchange::Reading(reading)) => {
                            self.emit(reading);
                            self.transition(State::Draining);
                        }
                        Some(Exchange::Invalid(e)) => {
                            warn!("{}: invalid packet: {}", peer, e);
                            if !self.pause(poll_delay).await {
                                break;
                            }
                        }
                        Some(Exchange::Ignored(len)) => {
                            debug!("{}: ignoring {} byte response", peer, len);
                            if !self.pause(poll_delay).await {
                                break;
                            }
                        }
                        Some(Exchange::Lost(e)) => {
                            self.lost(peer, &e);
                            self.transition(State::Disconnected);
                        }
                    }
                }

                State::Draining => {
                    let Some(l) = link.as_mut() else {
                        self.transition(State::Disconnected);
                        continue;
                    };
                    let peer = l.peer();

                    match until_shutdown(&mut self.shutdown, l.recv(ACK_LEN)).await {
                        None => break,
                        Some(Ok(ack)) => debug!("{}: discarding {} byte ack", peer, ack.len()),
                        Some(Err(e)) if e.is_disconnect() => {
                            self.lost(peer, &e);
                            self.transition(State::Disconnected);
                            continue;
                        }
                        Some(Err(e)) => debug!("{}: no ack: {}", peer, e),
                    }

                    if !self.pause(poll_delay).await {
                        break;
                    }
                    self.transition(State::Active);
                }
            }
        }

        if let Some(mut l) = link.take() {
            l.close();
        }
        Ok(())
    }

    async fn run_server(&mut self) -> Result<(), TransportError> {
        let serial_field = self.serial_field;
        let mut link: Option<E::Link> = None;

        info!("waiting for dataloggers on {}", self.establish.describe());
        self.transition(State::Connecting);

        loop {
            match self.state {
                State::Disconnected => {
                    if let Some(mut l) = link.take() {
                        l.close();
                    }
                    self.transition(State::Connecting);
                }

                State::Connecting => {
                    match until_shutdown(&mut self.shutdown, self.establish.establish()).await {
                        None => break,
                        Some(Ok(l)) => {
                            self.announce(ChannelData::Connected(l.peer()));
                            link = Some(l);
                            self.transition(State::Active);
                        }
                        Some(Err(e)) => {
                            error!("{}: {}", self.establish.describe(), e);
                            return Err(e);
                        }
                    }
                }

                State::Active => {
                    let Some(l) = link.as_mut() else {
                        self.transition(State::Disconnected);
                        continue;
                    };
                    let peer = l.peer();

                    match until_shutdown(&mut self.shutdown, receive_reading(l, serial_field)).await {
                        None => break,
                        Some(Exchange::Reading(reading)) => self.emit(reading),
                        Some(Exchange::Invalid(e)) => warn!("{}: invalid packet: {}", peer, e),
                        Some(Exchange::Ignored(len)) => {
                            debug!("{}: ignoring {} byte packet", peer, len)
                        }
                        // an idle datalogger is not a lost one
                        Some(Exchange::Lost(e)) if e.is_timeout() => debug!("{}: {}", peer, e),
                        Some(Exchange::Lost(e)) => {
                            self.lost(peer, &e);
                            self.transition(State::Disconnected);
                        }
                    }
                }

                State::Draining => self.transition(State::Active),
            }
        }

        if let Some(mut l) = link.take() {
            l.close();
        }
        Ok(())
    }

    fn transition(&mut self, next: State) {
        debug!("{}: {:?} -> {:?}", self.establish.describe(), self.state, next);
        self.state = next;
    }

    /// Sleep between polls. Returns false if we were told to shut down.
    async fn pause(&mut self, delay: Duration) -> bool {
        until_shutdown(&mut self.shutdown, tokio::time::sleep(delay))
            .await
            .is_some()
    }

    fn lost(&self, peer: std::net::SocketAddr, e: &TransportError) {
        if e.is_disconnect() {
            info!("{}: disconnected", peer);
        } else {
            warn!("{}: {}", peer, e);
        }
        self.announce(ChannelData::Disconnect(peer));
    }

    fn emit(&self, reading: Reading) {
        debug!(
            "reading from datalogger {} ({:?})",
            reading.logger_serial, reading.inverter_serial
        );
        if let Err(e) = self.channels.from_inverter.send(ChannelData::Reading(reading)) {
            warn!("no sinks for reading: {}", e);
        }
    }

    fn announce(&self, message: ChannelData) {
        // nobody has to be listening for connection state
        let _ = self.channels.from_inverter.send(message);
    }
}

async fn request_reading<L: Link>(
    link: &mut L,
    request: &RequestFrame,
    serial_field: SerialField,
) -> Exchange {
    if let Err(e) = link.send(request.as_bytes()).await {
        return Exchange::Lost(e);
    }
    receive_reading(link, serial_field).await
}

async fn receive_reading<L: Link>(link: &mut L, serial_field: SerialField) -> Exchange {
    match link.recv(FRAME_LEN).await {
        Err(e) => Exchange::Lost(e),
        Ok(frame) if frame.len() == FRAME_LEN => {
            match packet::decode_reading(&frame, serial_field) {
                Ok(reading) => Exchange::Reading(reading),
                Err(e) => Exchange::Invalid(e),
            }
        }
        Ok(frame) => Exchange::Ignored(frame.len()),
    }
}

/// Race `fut` against the shutdown signal. `None` means shutdown won.
async fn until_shutdown<F: Future>(
    shutdown: &mut broadcast::Receiver<()>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        _ = shutdown.recv() => None,
        out = fut => Some(out),
    }
}
