//! Run statistics.
//!
//! Every byte range the decoder discards and every frame the filter rejects is counted in
//! one of the `dropped_*` counters. Accepted frames are emitted unless the run is stopped
//! while they are still queued.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::event::DropReason;
use crate::spacepacket::{missing_packets, Apid, PrimaryHeader};

/// Statistics for a single APID, counted when packets are emitted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ApidStats {
    pub packets: u64,
    pub bytes: u64,
    pub last_sequence: u16,
    /// Gaps in the sequence count between consecutive emitted packets.
    pub missing: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RunStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Frames produced by the decoder.
    pub decoded: u64,
    /// Frames that passed the filter.
    pub accepted: u64,
    /// Frames written to the sink.
    pub emitted: u64,
    pub dropped_oversized: u64,
    pub dropped_apid: u64,
    pub dropped_malformed: u64,
    pub dropped_incomplete: u64,
    /// Bytes skipped while resynchronizing after a bad header.
    pub bytes_skipped: u64,
    pub resyncs: u64,
    /// Replay frames emitted immediately because they were too short for a timestamp.
    pub replay_untimed: u64,
    /// Replay anchor resets caused by packet time going backwards.
    pub replay_reanchored: u64,
    pub connections: u64,
    pub apids: BTreeMap<Apid, ApidStats>,
}

impl RunStats {
    /// Total frames dropped for any reason.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped_oversized + self.dropped_apid + self.dropped_malformed + self.dropped_incomplete
    }

    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Oversized => self.dropped_oversized += 1,
            DropReason::ApidFiltered => self.dropped_apid += 1,
            DropReason::Malformed => self.dropped_malformed += 1,
            DropReason::Incomplete => self.dropped_incomplete += 1,
        }
    }

    pub(crate) fn record_emit(&mut self, primary: Option<&PrimaryHeader>, len: usize) {
        self.emitted += 1;
        self.bytes_written += len as u64;
        let Some(ph) = primary else {
            return;
        };
        let first = !self.apids.contains_key(&ph.apid);
        let apid = self.apids.entry(ph.apid).or_default();
        if !first {
            apid.missing += u64::from(missing_packets(ph.sequence_id, apid.last_sequence));
        }
        apid.packets += 1;
        apid.bytes += len as u64;
        apid.last_sequence = ph.sequence_id;
    }
}

/// [RunStats] shared between the route threads and the [RunHandle](crate::RunHandle).
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<Mutex<RunStats>>);

impl SharedStats {
    pub(crate) fn update<F: FnOnce(&mut RunStats)>(&self, f: F) {
        let mut stats = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    pub(crate) fn snapshot(&self) -> RunStats {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
