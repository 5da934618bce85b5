use std::collections::BTreeSet;

use crate::config::RouteConfig;
use crate::decoder::Frame;
use crate::event::DropReason;
use crate::spacepacket::Apid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(DropReason),
}

/// Accepts or rejects decoded frames by size and APID.
///
/// The size check repeats the decoder's check for variable-length frames and is the only
/// size check for fixed-length frames. Fixed-length frames carry no APID and are never
/// APID filtered.
#[derive(Debug, Clone)]
pub struct Filter {
    max_packet_size: usize,
    allowed_apids: BTreeSet<Apid>,
}

impl Filter {
    #[must_use]
    pub fn new(max_packet_size: usize, allowed_apids: BTreeSet<Apid>) -> Self {
        Filter {
            max_packet_size,
            allowed_apids,
        }
    }

    #[must_use]
    pub fn from_config(config: &RouteConfig) -> Self {
        Self::new(config.max_packet_size, config.allowed_apids.clone())
    }

    #[must_use]
    pub fn check(&self, frame: &Frame) -> Verdict {
        if frame.payload.len() > self.max_packet_size {
            return Verdict::Reject(DropReason::Oversized);
        }
        if let Some(apid) = frame.apid() {
            if !self.allowed_apids.is_empty() && !self.allowed_apids.contains(&apid) {
                return Verdict::Reject(DropReason::ApidFiltered);
            }
        }
        Verdict::Accept
    }
}
