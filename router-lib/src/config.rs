//! Route configuration.
//!
//! A [RouteConfig] is an immutable snapshot of everything a run needs. Changing any value
//! requires stopping the route and starting a new one.
use std::collections::BTreeSet;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::schedule::TimingPolicy;
use crate::spacepacket::{Apid, Endian, PrimaryHeader};
use crate::{Error, Result};

/// Largest possible CCSDS space packet: 6 header bytes plus 65536 data bytes.
pub const MAX_CCSDS_PACKET_LEN: usize = PrimaryHeader::LEN + 65536;

/// How packet boundaries are found in the source stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PacketSize {
    /// Framing header, CCSDS packet sized by its primary header, framing footer.
    #[default]
    Variable,
    /// Blocks of exactly this many bytes; no header parsing or framing bytes.
    Fixed(usize),
}

/// Protocol-agnostic framing bytes wrapping each packet and whether they are forwarded.
///
/// Framing only applies in [PacketSize::Variable] mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FramingConfig {
    /// Number of bytes preceding each packet.
    #[builder(default)]
    pub header_len: usize,
    /// Number of bytes following each packet.
    #[builder(default)]
    pub footer_len: usize,
    /// Write the framing header bytes to the sink along with the packet.
    #[builder(default)]
    pub forward_header: bool,
    /// Write the framing footer bytes to the sink along with the packet.
    #[builder(default)]
    pub forward_footer: bool,
}

/// A route endpoint.
///
/// For a UDP source `address` is the local address to bind; for a UDP sink it is the
/// destination. TCP client endpoints connect to `address`; TCP server endpoints listen on
/// it and serve one connection at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum EndpointConfig {
    File { path: PathBuf },
    Udp { address: String },
    TcpClient { address: String },
    TcpServer { address: String },
}

impl std::fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointConfig::File { path } => write!(f, "file:{}", path.display()),
            EndpointConfig::Udp { address } => write!(f, "udp:{address}"),
            EndpointConfig::TcpClient { address } => write!(f, "tcp-client:{address}"),
            EndpointConfig::TcpServer { address } => write!(f, "tcp-server:{address}"),
        }
    }
}

/// All parameters for one route run.
///
/// # Example
/// ```
/// use ccsds_router::{EndpointConfig, PacketSize, RouteConfig};
///
/// let config = RouteConfig::builder()
///     .source(EndpointConfig::File { path: "in.dat".into() })
///     .sink(EndpointConfig::File { path: "out.dat".into() })
///     .packet_size(PacketSize::Fixed(128))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RouteConfig {
    pub source: EndpointConfig,
    pub sink: EndpointConfig,
    /// Largest packet, in bytes including the primary header, allowed through the route.
    #[builder(default = MAX_CCSDS_PACKET_LEN)]
    #[cfg_attr(feature = "serde", serde(default = "default_max_packet_size"))]
    pub max_packet_size: usize,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub packet_size: PacketSize,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub framing: FramingConfig,
    /// APIDs allowed through the route. Empty allows all.
    #[builder(default, setter(into))]
    #[cfg_attr(feature = "serde", serde(default))]
    pub allowed_apids: BTreeSet<Apid>,
    /// Byte order of the primary header.
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub header_endian: Endian,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub timing: TimingPolicy,
    /// Number of bytes the decoder skips looking for a plausible header before reporting
    /// the stream as unsynchronizable. Scanning continues after the report.
    #[builder(default = RouteConfig::DEFAULT_RESYNC_LIMIT)]
    #[cfg_attr(feature = "serde", serde(default = "default_resync_limit"))]
    pub resync_limit: usize,
    /// Number of decoded frames buffered between the reader and writer.
    #[builder(default = RouteConfig::DEFAULT_QUEUE_DEPTH)]
    #[cfg_attr(feature = "serde", serde(default = "default_queue_depth"))]
    pub queue_depth: usize,
    /// Bytes requested from stream sources per read.
    #[builder(default = RouteConfig::DEFAULT_READ_SIZE)]
    #[cfg_attr(feature = "serde", serde(default = "default_read_size"))]
    pub read_size: usize,
}

#[cfg(feature = "serde")]
fn default_max_packet_size() -> usize {
    MAX_CCSDS_PACKET_LEN
}

#[cfg(feature = "serde")]
fn default_resync_limit() -> usize {
    RouteConfig::DEFAULT_RESYNC_LIMIT
}

#[cfg(feature = "serde")]
fn default_queue_depth() -> usize {
    RouteConfig::DEFAULT_QUEUE_DEPTH
}

#[cfg(feature = "serde")]
fn default_read_size() -> usize {
    RouteConfig::DEFAULT_READ_SIZE
}

impl RouteConfig {
    pub const DEFAULT_RESYNC_LIMIT: usize = 65536;
    pub const DEFAULT_QUEUE_DEPTH: usize = 100;
    pub const DEFAULT_READ_SIZE: usize = 4096;

    /// Check the configuration for values that cannot produce a working route.
    ///
    /// # Errors
    /// [Error::Config] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < PrimaryHeader::LEN + 1 {
            return Err(Error::Config(format!(
                "max packet size must be at least {}; got {}",
                PrimaryHeader::LEN + 1,
                self.max_packet_size
            )));
        }
        if let PacketSize::Fixed(size) = self.packet_size {
            if size == 0 {
                return Err(Error::Config("fixed packet size must be non-zero".into()));
            }
            if size > self.max_packet_size {
                return Err(Error::Config(format!(
                    "fixed packet size {size} exceeds max packet size {}",
                    self.max_packet_size
                )));
            }
        }
        if let Some(apid) = self
            .allowed_apids
            .iter()
            .find(|a| **a > PrimaryHeader::APID_MAX)
        {
            return Err(Error::Config(format!(
                "APID {apid} is larger than the 11-bit maximum {}",
                PrimaryHeader::APID_MAX
            )));
        }
        for (name, len) in [
            ("header", self.framing.header_len),
            ("footer", self.framing.footer_len),
        ] {
            if len > MAX_CCSDS_PACKET_LEN {
                return Err(Error::Config(format!(
                    "framing {name} length {len} exceeds {MAX_CCSDS_PACKET_LEN}"
                )));
            }
        }
        if let TimingPolicy::Replay(field) = &self.timing {
            let offset = field.seconds_offset.max(field.subseconds_offset);
            if offset > self.max_packet_size {
                return Err(Error::Config(format!(
                    "timestamp offset {offset} is beyond the max packet size {}",
                    self.max_packet_size
                )));
            }
        }
        if self.resync_limit == 0 {
            return Err(Error::Config("resync limit must be non-zero".into()));
        }
        if self.queue_depth == 0 {
            return Err(Error::Config("queue depth must be non-zero".into()));
        }
        if self.read_size == 0 {
            return Err(Error::Config("read size must be non-zero".into()));
        }
        if self.source == self.sink {
            if let EndpointConfig::File { path } = &self.source {
                return Err(Error::Config(format!(
                    "source and sink are the same file: {}",
                    path.display()
                )));
            }
        }
        self.timing.validate()
    }

    /// Framing lengths in effect; always zero in fixed-length mode.
    #[must_use]
    pub fn effective_framing(&self) -> FramingConfig {
        match self.packet_size {
            PacketSize::Variable => self.framing,
            PacketSize::Fixed(_) => FramingConfig::default(),
        }
    }
}

/// Serde support for [Duration](std::time::Duration) values written as floating point
/// seconds.
#[cfg(feature = "serde")]
pub(crate) mod secs_f64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_f64(dur.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(de)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|err| D::Error::custom(format!("invalid duration {secs}: {err}")))
    }
}
