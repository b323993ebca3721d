use crate::error::TransportError;
use crate::prelude::*;

use {
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    net2::TcpStreamExt,
    serde::Deserialize,
    std::net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket},
};

const IO_TIMEOUT_SECS: u64 = 10; // idle timeout for connect, send and receive
const TCP_KEEPALIVE_SECS: u64 = 60; // TCP keepalive interval
const LISTEN_BACKLOG: i32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stream,
    Datagram,
}

/// Socket knobs applied to every endpoint, whichever way it was opened.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    pub io_timeout: Duration,
    pub nodelay: bool,
    pub reuse_address: bool,
    pub keepalive: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(IO_TIMEOUT_SECS),
            nodelay: true,
            reuse_address: true,
            keepalive: Some(Duration::from_secs(TCP_KEEPALIVE_SECS)),
        }
    }
}

// Link / Establish {{{
/// A connected peer we can exchange frames with.
#[async_trait]
pub trait Link: Send {
    fn peer(&self) -> SocketAddr;

    /// Send the whole of `bytes`; a short write is an error.
    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// One read of at most `max_len` bytes. A zero byte read on a stream is
    /// reported as `TransportError::Disconnected`.
    async fn recv(&mut self, max_len: usize) -> Result<Bytes, TransportError>;

    /// Release the socket. Safe to call more than once.
    fn close(&mut self);
}

/// Something that hands out new links: dialling out for a client session,
/// accepting for a server session.
#[async_trait]
pub trait Establish: Send {
    type Link: Link;

    fn describe(&self) -> String;

    async fn establish(&mut self) -> Result<Self::Link, TransportError>;
} // }}}

#[derive(Clone, Debug, Default)]
pub struct Transport {
    options: SocketOptions,
}

impl Transport {
    pub fn new(options: SocketOptions) -> Self {
        Self { options }
    }

    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        kind: TransportKind,
    ) -> Result<Connection, TransportError> {
        let addr = Self::resolve(Some(host), port).await?;
        debug!("{}:{} resolved to {}", host, port, addr);

        match kind {
            TransportKind::Stream => self.connect_stream(addr).await,
            TransportKind::Datagram => self.connect_datagram(addr).await,
        }
    }

    pub async fn listen(&self, port: u16) -> Result<Listener, TransportError> {
        let addr = Self::resolve(None, port).await?;
        let socket_err = |source| TransportError::Socket { addr, source };
        let bind_err = |source| TransportError::Bind { addr, source };

        let builder = if addr.is_ipv4() {
            net2::TcpBuilder::new_v4()
        } else {
            net2::TcpBuilder::new_v6()
        }
        .map_err(socket_err)?;

        if self.options.reuse_address {
            builder.reuse_address(true).map_err(socket_err)?;
        }
        builder.bind(addr).map_err(bind_err)?;
        let std_listener = builder.listen(LISTEN_BACKLOG).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(socket_err)?;

        let inner = TcpListener::from_std(std_listener).map_err(socket_err)?;
        let local_addr = inner.local_addr().unwrap_or(addr);
        info!("listening on {}", local_addr);

        Ok(Listener {
            inner,
            local_addr,
            options: self.options.clone(),
        })
    }

    // No host means the wildcard address we listen on. IPv4 is preferred
    // when a name resolves to both families.
    async fn resolve(host: Option<&str>, port: u16) -> Result<SocketAddr, TransportError> {
        let host = host.unwrap_or("0.0.0.0");
        let resolution_err = |source| TransportError::Resolution {
            host: host.to_owned(),
            port,
            source,
        };

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(resolution_err)?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                resolution_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })
    }

    async fn connect_stream(&self, addr: SocketAddr) -> Result<Connection, TransportError> {
        let socket_err = |source| TransportError::Socket { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(socket_err)?;

        if self.options.reuse_address {
            socket.set_reuseaddr(true).map_err(socket_err)?;
        }

        let stream =
            match tokio::time::timeout(self.options.io_timeout, socket.connect(addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
                Err(_) => {
                    return Err(TransportError::Connect {
                        addr,
                        source: timed_out("connect", self.options.io_timeout),
                    })
                }
            };

        let stream = configure_stream(&self.options, stream, addr)?;
        info!("connected to {}", addr);

        Ok(Connection::new(addr, Socket::Tcp(stream), self.options.io_timeout))
    }

    async fn connect_datagram(&self, addr: SocketAddr) -> Result<Connection, TransportError> {
        let socket_err = |source| TransportError::Socket { addr, source };

        let (builder, local): (_, SocketAddr) = if addr.is_ipv4() {
            (net2::UdpBuilder::new_v4(), (Ipv4Addr::UNSPECIFIED, 0).into())
        } else {
            (net2::UdpBuilder::new_v6(), (Ipv6Addr::UNSPECIFIED, 0).into())
        };
        let builder = builder.map_err(socket_err)?;

        if self.options.reuse_address {
            builder.reuse_address(true).map_err(socket_err)?;
        }
        let std_socket = builder.bind(local).map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;
        std_socket.set_nonblocking(true).map_err(socket_err)?;

        let socket = UdpSocket::from_std(std_socket).map_err(socket_err)?;
        socket
            .connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        info!("associated with {} (udp)", addr);

        Ok(Connection::new(addr, Socket::Udp(socket), self.options.io_timeout))
    }
}

fn configure_stream(
    options: &SocketOptions,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<TcpStream, TransportError> {
    let socket_err = |source| TransportError::Socket { addr: peer, source };

    let std_stream = stream.into_std().map_err(socket_err)?;
    if let Some(keepalive) = options.keepalive {
        if let Err(e) = std_stream.set_keepalive(Some(keepalive)) {
            warn!("{}: failed to set TCP keepalive: {}", peer, e);
        }
    }

    let stream = TcpStream::from_std(std_stream).map_err(socket_err)?;
    if options.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("{}: failed to set TCP_NODELAY: {}", peer, e);
        }
    }

    Ok(stream)
}

fn timed_out(operation: &str, after: Duration) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("{} timed out after {} seconds", operation, after.as_secs()),
    )
}

// Listener {{{
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    options: SocketOptions,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next datalogger to connect. The listening socket stays
    /// open and can accept again afterwards.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, peer) =
            self.inner
                .accept()
                .await
                .map_err(|source| TransportError::Accept {
                    addr: self.local_addr,
                    source,
                })?;

        let stream = configure_stream(&self.options, stream, peer)?;
        info!("accepted connection from {}", peer);

        Ok(Connection::new(peer, Socket::Tcp(stream), self.options.io_timeout))
    }
}

#[async_trait]
impl Establish for Listener {
    type Link = Connection;

    fn describe(&self) -> String {
        format!("listener on {}", self.local_addr)
    }

    async fn establish(&mut self) -> Result<Connection, TransportError> {
        self.accept().await
    }
} // }}}

// Dialer {{{
/// Reconnects to the same datalogger every time it is asked.
pub struct Dialer {
    transport: Transport,
    host: String,
    port: u16,
    kind: TransportKind,
}

impl Dialer {
    pub fn new(transport: Transport, host: &str, port: u16, kind: TransportKind) -> Self {
        Self {
            transport,
            host: host.to_owned(),
            port,
            kind,
        }
    }
}

#[async_trait]
impl Establish for Dialer {
    type Link = Connection;

    fn describe(&self) -> String {
        match self.kind {
            TransportKind::Stream => format!("{}:{}", self.host, self.port),
            TransportKind::Datagram => format!("{}:{} (udp)", self.host, self.port),
        }
    }

    async fn establish(&mut self) -> Result<Connection, TransportError> {
        self.transport.connect(&self.host, self.port, self.kind).await
    }
} // }}}

// Connection {{{
enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

pub struct Connection {
    peer: SocketAddr,
    io_timeout: Duration,
    socket: Option<Socket>,
}

impl Connection {
    fn new(peer: SocketAddr, socket: Socket, io_timeout: Duration) -> Self {
        Self {
            peer,
            io_timeout,
            socket: Some(socket),
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn socket(&mut self) -> Result<&mut Socket, TransportError> {
        let peer = self.peer;
        self.socket.as_mut().ok_or_else(|| TransportError::Io {
            peer,
            source: std::io::Error::new(std::io::ErrorKind::NotConnected, "connection is closed"),
        })
    }
}

#[async_trait]
impl Link for Connection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let peer = self.peer;
        let io_timeout = self.io_timeout;
        let socket = self.socket()?;

        let write = async {
            match socket {
                Socket::Tcp(stream) => stream.write(bytes).await,
                Socket::Udp(socket) => socket.send(bytes).await,
            }
        };

        let sent = match tokio::time::timeout(io_timeout, write).await {
            Ok(Ok(n)) => n,
            Ok(Err(source)) => return Err(TransportError::Io { peer, source }),
            Err(_) => {
                return Err(TransportError::Io {
                    peer,
                    source: timed_out("send", io_timeout),
                })
            }
        };

        if sent == 0 && !bytes.is_empty() {
            return Err(TransportError::Disconnected { peer });
        }
        if sent != bytes.len() {
            return Err(TransportError::Io {
                peer,
                source: std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short write: sent {} of {} bytes", sent, bytes.len()),
                ),
            });
        }

        debug!("{}: TX {:02x?}", peer, bytes);
        Ok(sent)
    }

    async fn recv(&mut self, max_len: usize) -> Result<Bytes, TransportError> {
        let peer = self.peer;
        let io_timeout = self.io_timeout;
        let socket = self.socket()?;
        let stream = matches!(socket, Socket::Tcp(_));
        let mut buf = BytesMut::zeroed(max_len);

        let read = async {
            match socket {
                Socket::Tcp(stream) => stream.read(&mut buf[..]).await,
                Socket::Udp(socket) => socket.recv(&mut buf[..]).await,
            }
        };

        let len = match tokio::time::timeout(io_timeout, read).await {
            Ok(Ok(n)) => n,
            Ok(Err(source)) => return Err(TransportError::Io { peer, source }),
            Err(_) => {
                return Err(TransportError::Io {
                    peer,
                    source: timed_out("receive", io_timeout),
                })
            }
        };

        // UDP has no orderly close
        if len == 0 && stream {
            return Err(TransportError::Disconnected { peer });
        }

        buf.truncate(len);
        debug!("{}: RX {} bytes", peer, len);
        Ok(buf.freeze())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("{}: closed", self.peer);
        }
    }
} // }}}
