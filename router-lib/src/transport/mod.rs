//! Route endpoints.
//!
//! Transports are thin wrappers around `std` files and sockets. Blocking socket operations
//! use a short poll interval so the route threads can notice a stop request promptly.
mod file;
mod tcp;
mod udp;

pub use file::{FileSink, FileSource};
pub use tcp::{TcpClientSink, TcpClientSource, TcpServerSink, TcpServerSource};
pub use udp::{UdpSink, UdpSource};

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::Result;

/// How long blocking reads and accepts wait before returning control to the caller.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a [Source::read].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The buffer holds a chunk of stream data.
    Data,
    /// Nothing arrived within the poll interval.
    Idle,
    /// The source is exhausted; the run should finish.
    EndOfStream,
    /// A new peer connected; subsequent data starts a new stream.
    Connected(SocketAddr),
    /// The current peer went away. The source keeps waiting for a new peer.
    Disconnected,
}

/// Outcome of a [Sink::write].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// All bytes were handed to the transport.
    Written,
    /// The peer went away before the write completed. The sink waits for a new peer in
    /// [Sink::poll_ready] and the same bytes should be written again.
    Disconnected,
}

/// Byte stream feeding a route.
pub trait Source: Send {
    /// Read the next chunk into `buf`, replacing its contents.
    ///
    /// Datagram sources produce exactly one datagram per chunk. `buf` is only meaningful
    /// when [ReadStatus::Data] is returned.
    ///
    /// # Errors
    /// Any transport error, which ends the run.
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus>;

    /// Release the underlying descriptor. Calling more than once has no effect.
    fn close(&mut self);
}

/// Destination of a route.
pub trait Sink: Send {
    /// Returns `false` if the sink cannot accept data yet, e.g., a server waiting for a
    /// peer. Implementations wait at most [POLL_INTERVAL].
    ///
    /// # Errors
    /// Any transport error, which ends the run.
    fn poll_ready(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    /// Write all of `buf` or fail; partial writes are never reported as
    /// [WriteStatus::Written].
    ///
    /// # Errors
    /// Any transport error, which ends the run.
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus>;

    /// Release the underlying descriptor. Calling more than once has no effect.
    fn close(&mut self);
}

pub(crate) fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{address} did not resolve to an address"),
        )
    })
}

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Open the endpoint described by `config` as a route source.
///
/// # Errors
/// [Error::Io](crate::Error::Io) if the file cannot be opened, the address does not
/// resolve, or the socket cannot be bound or connected.
pub fn open_source(config: &EndpointConfig, read_size: usize) -> Result<Box<dyn Source>> {
    Ok(match config {
        EndpointConfig::File { path } => Box::new(FileSource::open(path, read_size)?),
        EndpointConfig::Udp { address } => Box::new(UdpSource::bind(address)?),
        EndpointConfig::TcpClient { address } => {
            Box::new(TcpClientSource::connect(address, read_size)?)
        }
        EndpointConfig::TcpServer { address } => {
            Box::new(TcpServerSource::bind(address, read_size)?)
        }
    })
}

/// Open the endpoint described by `config` as a route sink.
///
/// # Errors
/// [Error::Io](crate::Error::Io) if the file cannot be created, the address does not
/// resolve, or the socket cannot be bound or connected.
pub fn open_sink(config: &EndpointConfig) -> Result<Box<dyn Sink>> {
    Ok(match config {
        EndpointConfig::File { path } => Box::new(FileSink::create(path)?),
        EndpointConfig::Udp { address } => Box::new(UdpSink::connect(address)?),
        EndpointConfig::TcpClient { address } => Box::new(TcpClientSink::connect(address)?),
        EndpointConfig::TcpServer { address } => Box::new(TcpServerSink::bind(address)?),
    })
}
