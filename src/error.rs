use std::net::SocketAddr;
use thiserror::Error;

/// Failures the transport layer can report to a session.
///
/// Establishment failures (`Resolution`, `Socket`, `Bind`, `Connect`,
/// `Accept`) are kept apart from failures on an established connection
/// (`Io`, `Disconnected`) so the session can tell "never got going" from
/// "lost the peer".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("resolving {host}:{port}: {source}")]
    Resolution {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("creating socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("binding {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("accepting on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // short transfers and timeouts land here too
    #[error("i/o with {peer}: {source}")]
    Io {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{peer} closed the connection")]
    Disconnected { peer: SocketAddr },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::TimedOut)
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is {0} bytes, expected {expected}", expected = crate::datalogger::packet::FRAME_LEN)]
    BadLength(usize),
}
