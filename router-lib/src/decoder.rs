//! Splitting a raw byte stream into frames.
//!
//! Bytes are provided with [FrameDecoder::push] as they are read and decoded frames are
//! pulled by iterating the decoder until it returns `None`, meaning it needs more input.
//!
//! # Example
//! ```
//! use ccsds_router::decoder::{Decoded, FrameDecoder};
//! use ccsds_router::Endian;
//! use std::time::Instant;
//!
//! let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 4096);
//! decoder.push(&[0x08, 0x07, 0xc0, 0x00, 0x00, 0x00, 0xff], Instant::now());
//!
//! let Some(Decoded::Frame(frame)) = decoder.next() else { panic!("expected a frame") };
//! assert_eq!(frame.apid(), Some(7));
//! assert!(decoder.next().is_none());
//! ```
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::{PacketSize, RouteConfig};
use crate::event::DropReason;
use crate::spacepacket::{Apid, Endian, PrimaryHeader};

/// A delimited unit of the source stream.
///
/// In variable-length mode `payload` is a complete CCSDS space packet and `primary` its
/// decoded header. In fixed-length mode `payload` is a block of exactly the configured
/// size, `primary` is `None`, and `header`/`footer` are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    pub footer: Vec<u8>,
    pub primary: Option<PrimaryHeader>,
    /// When the last byte of this frame was read from the source.
    pub received_at: Instant,
}

impl Frame {
    #[must_use]
    pub fn apid(&self) -> Option<Apid> {
        self.primary.map(|ph| ph.apid)
    }

    /// Total number of bytes this frame occupied in the source stream.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        self.header.len() + self.payload.len() + self.footer.len()
    }
}

/// Output of the [FrameDecoder].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// A frame was discarded. `len` is the packet length it declared.
    Dropped { reason: DropReason, len: usize },
    /// A plausible header was found after skipping `skipped` bytes.
    Resynced { skipped: usize },
    /// `skipped` bytes were scanned without finding a plausible header. Scanning
    /// continues.
    ResyncExhausted { skipped: usize },
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Fixed(usize),
    Variable {
        header_len: usize,
        footer_len: usize,
        endian: Endian,
        max_packet_size: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Synced,
    /// Scanning forward one byte at a time; bytes skipped since the last report.
    Resync { skipped: usize },
}

/// Incremental frame decoder.
///
/// Fixed-length mode never inspects the data, so a stream that does not begin on a block
/// boundary produces misaligned blocks for its whole length.
///
/// Variable-length mode reads the primary header after `header_len` framing bytes and
/// expects `footer_len` framing bytes after the packet. A packet longer than the maximum
/// packet size is dropped and the decoder scans forward byte by byte for the next position
/// holding a plausible header, i.e., version 0 and a length within the maximum. Every
/// `resync_limit` bytes skipped without success produce [Decoded::ResyncExhausted].
#[derive(Debug)]
pub struct FrameDecoder {
    mode: Mode,
    resync_limit: usize,
    state: State,
    buf: Vec<u8>,
    // Offset of the first unconsumed byte in buf
    pos: usize,
    received_at: Instant,
}

impl FrameDecoder {
    #[must_use]
    pub fn fixed(size: usize) -> Self {
        Self::new(Mode::Fixed(size))
    }

    #[must_use]
    pub fn variable(
        header_len: usize,
        footer_len: usize,
        endian: Endian,
        max_packet_size: usize,
    ) -> Self {
        Self::new(Mode::Variable {
            header_len,
            footer_len,
            endian,
            max_packet_size,
        })
    }

    #[must_use]
    pub fn from_config(config: &RouteConfig) -> Self {
        let decoder = match config.packet_size {
            PacketSize::Fixed(size) => Self::fixed(size),
            PacketSize::Variable => Self::variable(
                config.framing.header_len,
                config.framing.footer_len,
                config.header_endian,
                config.max_packet_size,
            ),
        };
        decoder.with_resync_limit(config.resync_limit)
    }

    fn new(mode: Mode) -> Self {
        FrameDecoder {
            mode,
            resync_limit: RouteConfig::DEFAULT_RESYNC_LIMIT,
            state: State::Synced,
            buf: Vec::new(),
            pos: 0,
            received_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_resync_limit(mut self, limit: usize) -> Self {
        self.resync_limit = limit.max(1);
        self
    }

    /// Add bytes read from the source at `received_at`.
    pub fn push(&mut self, chunk: &[u8], received_at: Instant) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
        self.received_at = received_at;
    }

    /// Number of buffered bytes not yet decoded.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Discard buffered data at the end of a stream. Returns the number of bytes of the
    /// incomplete frame that were dropped, if any.
    pub fn finish(&mut self) -> Option<usize> {
        let pending = self.pending();
        self.reset();
        if pending > 0 {
            debug!(pending, "dropping incomplete frame at end of stream");
            Some(pending)
        } else {
            None
        }
    }

    /// Clear all run state, e.g., when a new connection starts a new stream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.state = State::Synced;
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let dat = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        dat
    }

    fn next_fixed(&mut self, size: usize) -> Option<Decoded> {
        if self.pending() < size {
            return None;
        }
        Some(Decoded::Frame(Frame {
            header: Vec::new(),
            payload: self.take(size),
            footer: Vec::new(),
            primary: None,
            received_at: self.received_at,
        }))
    }

    fn next_variable(
        &mut self,
        header_len: usize,
        footer_len: usize,
        endian: Endian,
        max_packet_size: usize,
    ) -> Option<Decoded> {
        loop {
            if self.pending() < header_len + PrimaryHeader::LEN {
                return None;
            }
            let start = self.pos + header_len;
            // can't fail, length checked above
            let primary = PrimaryHeader::decode(&self.buf[start..], endian)?;
            let packet_len = primary.packet_len();

            if let State::Resync { skipped } = self.state {
                if primary.version != 0 || packet_len > max_packet_size {
                    self.pos += 1;
                    let skipped = skipped + 1;
                    if skipped >= self.resync_limit {
                        self.state = State::Resync { skipped: 0 };
                        return Some(Decoded::ResyncExhausted { skipped });
                    }
                    self.state = State::Resync { skipped };
                    continue;
                }
                self.state = State::Synced;
                trace!(skipped, apid = primary.apid, "found plausible header");
                return Some(Decoded::Resynced { skipped });
            }

            if packet_len > max_packet_size {
                debug!(
                    apid = primary.apid,
                    packet_len, max_packet_size, "oversized packet; resynchronizing"
                );
                self.pos += 1;
                self.state = State::Resync { skipped: 1 };
                return Some(Decoded::Dropped {
                    reason: DropReason::Oversized,
                    len: packet_len,
                });
            }

            let total = header_len + packet_len + footer_len;
            if self.pending() < total {
                return None;
            }

            let header = self.take(header_len);
            let payload = self.take(packet_len);
            let footer = self.take(footer_len);
            return Some(Decoded::Frame(Frame {
                header,
                payload,
                footer,
                primary: Some(primary),
                received_at: self.received_at,
            }));
        }
    }
}

impl Iterator for FrameDecoder {
    type Item = Decoded;

    fn next(&mut self) -> Option<Self::Item> {
        match self.mode {
            Mode::Fixed(size) => self.next_fixed(size),
            Mode::Variable {
                header_len,
                footer_len,
                endian,
                max_packet_size,
            } => self.next_variable(header_len, footer_len, endian, max_packet_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spacepacket::SEQ_UNSEGMENTED;

    fn packet(apid: Apid, seq: u16, data: &[u8], endian: Endian) -> Vec<u8> {
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

    fn frames(decoder: &mut FrameDecoder) -> Vec<Frame> {
        decoder
            .filter_map(|d| match d {
                Decoded::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fixed_blocks() {
        let mut decoder = FrameDecoder::fixed(4);
        decoder.push(&[1, 2, 3, 4, 5, 6, 7, 8, 9], Instant::now());

        let got = frames(&mut decoder);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].payload, [1, 2, 3, 4]);
        assert_eq!(got[1].payload, [5, 6, 7, 8]);
        assert!(got[0].primary.is_none());
        assert_eq!(decoder.pending(), 1);
        assert_eq!(decoder.finish(), Some(1));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn variable_packet_split_across_chunks() {
        let dat = packet(7, 1, &[0xaa; 10], Endian::Big);
        let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 1024);

        decoder.push(&dat[..3], Instant::now());
        assert!(decoder.next().is_none());
        decoder.push(&dat[3..9], Instant::now());
        assert!(decoder.next().is_none());
        decoder.push(&dat[9..], Instant::now());

        let got = frames(&mut decoder);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, dat);
        assert_eq!(got[0].apid(), Some(7));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn variable_with_framing() {
        let mut dat = vec![0x1a, 0xcf];
        dat.extend(packet(9, 0, &[1, 2, 3], Endian::Big));
        dat.push(0xee);
        let mut decoder = FrameDecoder::variable(2, 1, Endian::Big, 1024);
        decoder.push(&dat, Instant::now());

        let got = frames(&mut decoder);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].header, [0x1a, 0xcf]);
        assert_eq!(got[0].payload.len(), 9);
        assert_eq!(got[0].footer, [0xee]);
        assert_eq!(got[0].wire_len(), dat.len());
    }

    #[test]
    fn little_endian_matches_big_endian() {
        let be = packet(1369, 4779, &[0u8; 32], Endian::Big);
        let le = packet(1369, 4779, &[0u8; 32], Endian::Little);

        let mut be_decoder = FrameDecoder::variable(0, 0, Endian::Big, 1024);
        be_decoder.push(&be, Instant::now());
        let mut le_decoder = FrameDecoder::variable(0, 0, Endian::Little, 1024);
        le_decoder.push(&le, Instant::now());

        let be_frames = frames(&mut be_decoder);
        let le_frames = frames(&mut le_decoder);
        assert_eq!(be_frames.len(), 1);
        assert_eq!(le_frames.len(), 1);
        assert_eq!(be_frames[0].primary, le_frames[0].primary);
        // bytes are passed through as received
        assert_eq!(le_frames[0].payload, le);
    }

    #[test]
    fn oversized_packet_resyncs_to_next_header() {
        let first = packet(1, 0, &[0xff; 8], Endian::Big);
        let big = packet(2, 0, &[0xff; 200], Endian::Big);
        let last = packet(3, 0, &[0xff; 8], Endian::Big);
        let mut dat = first.clone();
        dat.extend(&big);
        dat.extend(&last);

        let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 64);
        decoder.push(&dat, Instant::now());
        let got: Vec<Decoded> = decoder.by_ref().collect();

        assert!(matches!(&got[0], Decoded::Frame(f) if f.apid() == Some(1)));
        assert_eq!(
            got[1],
            Decoded::Dropped {
                reason: DropReason::Oversized,
                len: 206
            }
        );
        // 0xff bytes never look like a version 0 header
        assert_eq!(got[2], Decoded::Resynced { skipped: big.len() });
        assert!(matches!(&got[3], Decoded::Frame(f) if f.apid() == Some(3)));
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn resync_exhaustion_is_reported_and_scanning_continues() {
        let oversized = packet(2, 0, &[0xff; 100], Endian::Big);
        let good = packet(5, 0, &[0xff; 4], Endian::Big);
        let mut dat = oversized.clone();
        dat.extend(&good);

        let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 32).with_resync_limit(40);
        decoder.push(&dat, Instant::now());
        let got: Vec<Decoded> = decoder.by_ref().collect();

        assert!(matches!(got[0], Decoded::Dropped { reason: DropReason::Oversized, .. }));
        let exhausted = got
            .iter()
            .filter(|d| matches!(d, Decoded::ResyncExhausted { skipped: 40 }))
            .count();
        assert_eq!(exhausted, 2);
        assert!(matches!(got.last(), Some(Decoded::Frame(f)) if f.apid() == Some(5)));
    }

    #[test]
    fn from_config_fixed_ignores_framing() {
        use crate::config::{EndpointConfig, FramingConfig};

        let config = RouteConfig::builder()
            .source(EndpointConfig::File {
                path: "a".into(),
            })
            .sink(EndpointConfig::File {
                path: "b".into(),
            })
            .packet_size(PacketSize::Fixed(3))
            .framing(FramingConfig::builder().header_len(2).build())
            .build();
        let mut decoder = FrameDecoder::from_config(&config);
        decoder.push(&[1, 2, 3, 4, 5, 6], Instant::now());

        let got = frames(&mut decoder);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|f| f.header.is_empty() && f.footer.is_empty()));
    }
}
