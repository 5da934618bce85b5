//! Structured route events.
//!
//! Events are delivered on a bounded channel with `try_send`, so the pipeline never blocks
//! on a slow consumer. When the channel is full the event is only logged. Every event is
//! mirrored to `tracing`.
use std::fmt::Display;
use std::net::SocketAddr;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, trace};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::spacepacket::Apid;

/// Why a frame, or part of a stream, did not reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DropReason {
    /// No plausible header could be found within the resync limit.
    Malformed,
    /// Packet length exceeds the configured maximum.
    Oversized,
    /// APID not in the allow list.
    ApidFiltered,
    /// Partial frame left over when the stream ended or the connection dropped.
    Incomplete,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::Malformed => "malformed",
            DropReason::Oversized => "oversized",
            DropReason::ApidFiltered => "apid filtered",
            DropReason::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Started,
    /// A frame passed the filter and was queued for the sink.
    Accepted { apid: Option<Apid>, len: usize },
    /// A frame was written to the sink.
    Emitted { apid: Option<Apid>, len: usize },
    /// A frame or run of bytes was dropped. `len` is the declared or observed byte count.
    Dropped { reason: DropReason, len: usize },
    /// The decoder found a plausible header after skipping `skipped` bytes.
    Resynced { skipped: usize },
    Connected { peer: SocketAddr },
    Disconnected,
    Paused,
    Resumed,
    /// A transport failed; the run ends.
    TransportError { message: String },
    Stopped,
}

/// Sending half of the route event channel.
#[derive(Debug, Clone)]
pub(crate) struct Events {
    tx: Sender<RouteEvent>,
}

impl Events {
    const BUFFER_SIZE: usize = 4096;

    pub(crate) fn new() -> (Self, Receiver<RouteEvent>) {
        let (tx, rx) = crossbeam::channel::bounded(Self::BUFFER_SIZE);
        (Events { tx }, rx)
    }

    pub(crate) fn send(&self, event: RouteEvent) {
        match &event {
            RouteEvent::Started => info!("route started"),
            RouteEvent::Stopped => info!("route stopped"),
            RouteEvent::Accepted { apid, len } => trace!(?apid, len, "accepted"),
            RouteEvent::Emitted { apid, len } => trace!(?apid, len, "emitted"),
            RouteEvent::Dropped { reason, len } => debug!(%reason, len, "dropped"),
            RouteEvent::Resynced { skipped } => debug!(skipped, "resynchronized"),
            RouteEvent::Connected { peer } => info!(%peer, "connected"),
            RouteEvent::Disconnected => info!("disconnected"),
            RouteEvent::Paused => info!("paused"),
            RouteEvent::Resumed => info!("resumed"),
            RouteEvent::TransportError { message } => error!("transport error: {message}"),
        }
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            trace!(?event, "event channel full");
        }
    }
}
