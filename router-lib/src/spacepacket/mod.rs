//! CCSDS space packet primary header handling.
mod timestamp;

pub use timestamp::{Timestamp, TimestampField};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type Apid = u16;

/// Sequence flags of a packet that is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// Byte order of multi-byte header and timestamp fields.
///
/// CCSDS specifies big-endian; little-endian is supported for ground systems that write
/// the primary header in host order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Endian {
    fn word(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Big => u16::from_be_bytes([buf[0], buf[1]]),
            Endian::Little => u16::from_le_bytes([buf[0], buf[1]]),
        }
    }

    /// Unsigned integer from up to 8 bytes of `buf`.
    ///
    /// # Panics
    /// If `buf` is longer than 8 bytes.
    #[must_use]
    pub fn uint(self, buf: &[u8]) -> u64 {
        assert!(buf.len() <= 8, "integer fields are at most 8 bytes");
        let mut bytes = [0u8; 8];
        match self {
            Endian::Big => {
                bytes[8 - buf.len()..].copy_from_slice(buf);
                u64::from_be_bytes(bytes)
            }
            Endian::Little => {
                bytes[..buf.len()].copy_from_slice(buf);
                u64::from_le_bytes(bytes)
            }
        }
    }
}

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping, [SEQ_UNSEGMENTED] for standalone packets.
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    pub const APID_MAX: Apid = 0x7ff;

    /// Decode from bytes using the byte order `endian`. Returns `None` if there are not
    /// enough bytes to construct the header.
    ///
    /// A little-endian header stores each of the three 16-bit header words least
    /// significant byte first; bit layout within each word is unchanged.
    #[must_use]
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = endian.word(&buf[0..2]);
        let d2 = endian.word(&buf[2..4]);
        let d3 = endian.word(&buf[4..6]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Encode to header bytes in byte order `endian`.
    #[must_use]
    pub fn encode(&self, endian: Endian) -> [u8; Self::LEN] {
        let d1 = (u16::from(self.version & 0x7) << 13)
            | (u16::from(self.type_flag & 0x1) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7ff);
        let d2 = (u16::from(self.sequence_flags & 0x3) << 14) | (self.sequence_id & 0x3fff);
        let d3 = self.len_minus1;

        let mut buf = [0u8; Self::LEN];
        for (i, word) in [d1, d2, d3].into_iter().enumerate() {
            let bytes = match endian {
                Endian::Big => word.to_be_bytes(),
                Endian::Little => word.to_le_bytes(),
            };
            buf[i * 2..i * 2 + 2].copy_from_slice(&bytes);
        }
        buf
    }

    /// Total packet length in bytes, including this header.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.len_minus1 as usize + 1
    }
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let expected = if last + 1 > PrimaryHeader::SEQ_MAX {
        0
    } else {
        last + 1
    };
    if cur != expected {
        if last + 1 > cur {
            return cur + PrimaryHeader::SEQ_MAX - last;
        }
        return cur - last - 1;
    }
    0
}
