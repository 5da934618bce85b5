#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ccsds_router::spacepacket::SEQ_UNSEGMENTED;
use ccsds_router::transport::{ReadStatus, Sink, Source, WriteStatus};
use ccsds_router::{Apid, EndpointConfig, Endian, PrimaryHeader, RouteConfig};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Config whose endpoints are never opened; use with `start_route_with`.
pub fn memory_config() -> RouteConfig {
    RouteConfig::builder()
        .source(EndpointConfig::File {
            path: "memory-in".into(),
        })
        .sink(EndpointConfig::File {
            path: "memory-out".into(),
        })
        .build()
}

/// Space packet with `data` as its data field.
pub fn packet(apid: Apid, seq: u16, data: &[u8], endian: Endian) -> Vec<u8> {
    let ph = PrimaryHeader {
        apid,
        sequence_flags: SEQ_UNSEGMENTED,
        sequence_id: seq,
        len_minus1: u16::try_from(data.len() - 1).unwrap(),
        ..PrimaryHeader::default()
    };
    let mut dat = ph.encode(endian).to_vec();
    dat.extend_from_slice(data);
    dat
}

/// Packet with a big-endian 4 byte seconds, 2 byte 1/65536 subseconds timestamp at
/// the start of the data field.
pub fn timestamped(apid: Apid, seq: u16, secs: u32, subsecs: u16) -> Vec<u8> {
    let mut data = secs.to_be_bytes().to_vec();
    data.extend_from_slice(&subsecs.to_be_bytes());
    data.extend_from_slice(&[0xaa; 4]);
    packet(apid, seq, &data, Endian::Big)
}

/// Source fed by the test through a channel. Dropping the sender ends the stream.
pub struct ChannelSource(Receiver<Vec<u8>>);

impl ChannelSource {
    pub fn new() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = bounded(1024);
        (tx, ChannelSource(rx))
    }

    /// Source that yields `chunks` then ends.
    pub fn from_chunks<I: IntoIterator<Item = Vec<u8>>>(chunks: I) -> Self {
        let (tx, source) = Self::new();
        for chunk in chunks {
            tx.send(chunk).unwrap();
        }
        source
    }
}

impl Source for ChannelSource {
    fn read(&mut self, buf: &mut Vec<u8>) -> io::Result<ReadStatus> {
        match self.0.recv_timeout(Duration::from_millis(10)) {
            Ok(chunk) => {
                *buf = chunk;
                Ok(ReadStatus::Data)
            }
            Err(RecvTimeoutError::Timeout) => Ok(ReadStatus::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadStatus::EndOfStream),
        }
    }

    fn close(&mut self) {}
}

/// Records every write with the instant it happened.
#[derive(Clone, Default)]
pub struct MemorySink {
    writes: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
}

impl MemorySink {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, dat)| dat.clone())
            .collect()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.writes.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn len(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl Sink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        self.writes
            .lock()
            .unwrap()
            .push((Instant::now(), buf.to_vec()));
        Ok(WriteStatus::Written)
    }

    fn close(&mut self) {}
}

/// Fails every write.
pub struct BrokenSink;

impl Sink for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<WriteStatus> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is broken"))
    }

    fn close(&mut self) {}
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
