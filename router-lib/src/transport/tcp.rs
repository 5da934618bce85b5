use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;

use tracing::{debug, info};

use super::{is_timeout, resolve, ReadStatus, Sink, Source, WriteStatus, POLL_INTERVAL};

fn closed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{what} closed"))
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

fn read_chunk(stream: &mut TcpStream, buf: &mut Vec<u8>, read_size: usize) -> io::Result<usize> {
    buf.resize(read_size, 0);
    let n = stream.read(buf)?;
    buf.truncate(n);
    Ok(n)
}

fn shutdown(stream: &TcpStream) {
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        debug!("tcp shutdown: {err}");
    }
}

/// Reads from a connection to a remote server. The run ends when the server disconnects,
/// whether it closes the connection or resets it.
pub struct TcpClientSource {
    stream: Option<TcpStream>,
    read_size: usize,
}

impl TcpClientSource {
    /// # Errors
    /// If the address does not resolve or the connection fails.
    pub fn connect(address: &str, read_size: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(resolve(address)?)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        info!(peer = ?stream.peer_addr(), "connected tcp source");
        Ok(TcpClientSource {
            stream: Some(stream),
            read_size,
        })
    }
}

impl Source for TcpClientSource {
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(ReadStatus::EndOfStream);
        };
        match read_chunk(stream, buf, self.read_size) {
            Ok(0) => {
                self.close();
                Ok(ReadStatus::EndOfStream)
            }
            Ok(_) => Ok(ReadStatus::Data),
            Err(err) if is_timeout(&err) => Ok(ReadStatus::Idle),
            Err(err) if is_disconnect(&err) => {
                debug!("tcp source server dropped: {err}");
                self.close();
                Ok(ReadStatus::EndOfStream)
            }
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            shutdown(&stream);
        }
    }
}

/// Accepts one client at a time and reads from it.
///
/// When the client disconnects the source goes back to accepting; the run continues
/// until stopped.
pub struct TcpServerSource {
    listener: Option<TcpListener>,
    conn: Option<TcpStream>,
    read_size: usize,
}

impl TcpServerSource {
    /// # Errors
    /// If the address does not resolve or cannot be bound.
    pub fn bind(address: &str, read_size: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(resolve(address)?)?;
        listener.set_nonblocking(true)?;
        info!(addr = ?listener.local_addr(), "listening for tcp source");
        Ok(TcpServerSource {
            listener: Some(listener),
            conn: None,
            read_size,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    /// If the source is closed or the address cannot be determined.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(closed("tcp server source")),
        }
    }
}

impl Source for TcpServerSource {
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(ReadStatus::EndOfStream);
        };

        let Some(stream) = self.conn.as_mut() else {
            return match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(POLL_INTERVAL))?;
                    self.conn = Some(stream);
                    Ok(ReadStatus::Connected(peer))
                }
                Err(err) if is_timeout(&err) => {
                    thread::sleep(POLL_INTERVAL);
                    Ok(ReadStatus::Idle)
                }
                Err(err) => Err(err),
            };
        };

        match read_chunk(stream, buf, self.read_size) {
            Ok(0) => {
                self.conn.take();
                Ok(ReadStatus::Disconnected)
            }
            Ok(_) => Ok(ReadStatus::Data),
            Err(err) if is_timeout(&err) => Ok(ReadStatus::Idle),
            Err(err) if is_disconnect(&err) => {
                debug!("tcp source client dropped: {err}");
                self.conn.take();
                Ok(ReadStatus::Disconnected)
            }
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.conn.take() {
            shutdown(&stream);
        }
        self.listener.take();
    }
}

/// Writes to a connection to a remote server.
pub struct TcpClientSink {
    stream: Option<TcpStream>,
}

impl TcpClientSink {
    /// # Errors
    /// If the address does not resolve or the connection fails.
    pub fn connect(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(resolve(address)?)?;
        stream.set_nodelay(true)?;
        info!(peer = ?stream.peer_addr(), "connected tcp sink");
        Ok(TcpClientSink {
            stream: Some(stream),
        })
    }
}

impl Sink for TcpClientSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        match self.stream.as_mut() {
            Some(stream) => stream.write_all(buf).map(|()| WriteStatus::Written),
            None => Err(closed("tcp client sink")),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            shutdown(&stream);
        }
    }
}

/// Waits for a single client and writes to it.
///
/// Data is held back until a client connects. When the client goes away the sink accepts
/// the next one. A disconnect is only noticed when a write fails, so bytes accepted by the
/// kernel after the peer closed, but before its reset arrived, are lost.
pub struct TcpServerSink {
    listener: Option<TcpListener>,
    conn: Option<TcpStream>,
}

impl TcpServerSink {
    /// # Errors
    /// If the address does not resolve or cannot be bound.
    pub fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(resolve(address)?)?;
        listener.set_nonblocking(true)?;
        info!(addr = ?listener.local_addr(), "listening for tcp sink client");
        Ok(TcpServerSink {
            listener: Some(listener),
            conn: None,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    /// If the sink is closed or the address cannot be determined.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(closed("tcp server sink")),
        }
    }
}

impl Sink for TcpServerSink {
    fn poll_ready(&mut self) -> io::Result<bool> {
        if self.conn.is_some() {
            return Ok(true);
        }
        let Some(listener) = self.listener.as_ref() else {
            return Err(closed("tcp server sink"));
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                info!(%peer, "tcp sink client connected");
                self.conn = Some(stream);
                Ok(true)
            }
            Err(err) if is_timeout(&err) => {
                thread::sleep(POLL_INTERVAL);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        let Some(stream) = self.conn.as_mut() else {
            return Err(closed("tcp server sink"));
        };
        match stream.write_all(buf) {
            Ok(()) => Ok(WriteStatus::Written),
            Err(err) if is_disconnect(&err) => {
                info!("tcp sink client disconnected: {err}");
                self.conn.take();
                Ok(WriteStatus::Disconnected)
            }
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.conn.take() {
            shutdown(&stream);
        }
        self.listener.take();
    }
}
