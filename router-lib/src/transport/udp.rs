use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::debug;

use super::{is_timeout, resolve, ReadStatus, Sink, Source, WriteStatus, POLL_INTERVAL};

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_535;

/// Receives datagrams on a bound address. Each datagram is one chunk.
pub struct UdpSource {
    socket: Option<UdpSocket>,
}

impl UdpSource {
    /// # Errors
    /// If the address does not resolve or cannot be bound.
    pub fn bind(address: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(resolve(address)?)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        debug!(addr = ?socket.local_addr(), "bound udp source");
        Ok(UdpSource {
            socket: Some(socket),
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    /// If the source is closed or the address cannot be determined.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "udp source closed")),
        }
    }
}

impl Source for UdpSource {
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(ReadStatus::EndOfStream);
        };
        buf.resize(MAX_DATAGRAM, 0);
        match socket.recv_from(buf) {
            Ok((n, peer)) => {
                buf.truncate(n);
                debug!(%peer, len = n, "received datagram");
                Ok(ReadStatus::Data)
            }
            Err(err) if is_timeout(&err) => Ok(ReadStatus::Idle),
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        self.socket.take();
    }
}

/// Sends each write as a single datagram to a fixed destination.
pub struct UdpSink {
    socket: Option<UdpSocket>,
    dest: SocketAddr,
}

impl UdpSink {
    /// Bind an ephemeral local port of the same address family as `address`.
    ///
    /// # Errors
    /// If the address does not resolve or a local socket cannot be bound.
    pub fn connect(address: &str) -> io::Result<Self> {
        let dest = resolve(address)?;
        let local: SocketAddr = if dest.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        debug!(%dest, "opened udp sink");
        Ok(UdpSink {
            socket: Some(socket),
            dest,
        })
    }
}

impl Sink for UdpSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "udp sink closed"));
        };
        let sent = socket.send_to(buf, self.dest)?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", buf.len()),
            ));
        }
        Ok(WriteStatus::Written)
    }

    fn close(&mut self) {
        self.socket.take();
    }
}
