//! Routing of CCSDS space packets between files, UDP sockets, and TCP connections.
//!
//! A route reads a raw byte stream from a [Source](transport::Source), splits it into
//! frames, drops frames by APID or size, holds each accepted frame until the configured
//! [TimingPolicy] says it may leave, and writes it, with or without its framing bytes,
//! to a [Sink](transport::Sink).
//!
//! ```no_run
//! use ccsds_router::{start_route, EndpointConfig, RouteConfig, TimingPolicy};
//! use std::time::Duration;
//!
//! let config = RouteConfig::builder()
//!     .source(EndpointConfig::File { path: "packets.dat".into() })
//!     .sink(EndpointConfig::Udp { address: "127.0.0.1:9000".into() })
//!     .timing(TimingPolicy::Throttle { interval: Duration::from_millis(100) })
//!     .build();
//!
//! let handle = start_route(config).unwrap();
//! let summary = handle.join().unwrap();
//! println!("emitted {} packets", summary.stats.emitted);
//! ```
mod error;

pub mod config;
pub mod decoder;
pub mod event;
pub mod filter;
pub mod framer;
pub mod route;
pub mod schedule;
pub mod spacepacket;
pub mod stats;
pub mod transport;

pub use config::{EndpointConfig, FramingConfig, PacketSize, RouteConfig};
pub use decoder::{Frame, FrameDecoder};
pub use error::{Error, Result};
pub use event::{DropReason, RouteEvent};
pub use route::{start_route, start_route_with, RunHandle, RunSummary};
pub use schedule::{Scheduler, TimingPolicy};
pub use spacepacket::{Apid, Endian, PrimaryHeader};
pub use stats::RunStats;
