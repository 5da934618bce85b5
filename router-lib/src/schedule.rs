//! Packet emission timing.
//!
//! The [Scheduler] decides the instant at which an accepted [Frame] may be written to the
//! sink. It never sleeps and never drops; the route writer suspends until the returned
//! instant and then reports the actual emission instant back with
//! [Scheduler::emitted].
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::decoder::Frame;
use crate::spacepacket::TimestampField;
use crate::{Error, Result};

/// When accepted packets are released to the sink.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "policy", rename_all = "snake_case"))]
pub enum TimingPolicy {
    /// As fast as possible.
    #[default]
    ForwardThrough,
    /// Reproduce the spacing between packets implied by a timestamp embedded in each
    /// packet.
    Replay(TimestampField),
    /// Hold every packet for a fixed time after it was received.
    Delay {
        #[cfg_attr(
            feature = "serde",
            serde(rename = "delay_secs", with = "crate::config::secs_f64")
        )]
        duration: Duration,
    },
    /// Leave at least `interval` between consecutive emissions.
    Throttle {
        #[cfg_attr(
            feature = "serde",
            serde(rename = "interval_secs", with = "crate::config::secs_f64")
        )]
        interval: Duration,
    },
}

impl TimingPolicy {
    /// # Errors
    /// [Error::Config] for a zero throttle interval or an invalid replay timestamp field.
    pub fn validate(&self) -> Result<()> {
        match self {
            TimingPolicy::ForwardThrough | TimingPolicy::Delay { .. } => Ok(()),
            TimingPolicy::Replay(field) => field.validate(),
            TimingPolicy::Throttle { interval } => {
                if interval.is_zero() {
                    Err(Error::Config("throttle interval must be non-zero".into()))
                } else {
                    Ok(())
                }
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TimingPolicy::ForwardThrough => "forward_through",
            TimingPolicy::Replay(_) => "replay",
            TimingPolicy::Delay { .. } => "delay",
            TimingPolicy::Throttle { .. } => "throttle",
        }
    }
}

/// Wall-clock instant paired with the packet time it corresponds to.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    wall: Instant,
    domain: Duration,
}

/// Run state for one [TimingPolicy].
#[derive(Debug)]
pub struct Scheduler {
    policy: TimingPolicy,
    last_emission: Option<Instant>,
    anchor: Option<Anchor>,
    last_stamp: Option<Duration>,
    untimed: u64,
    reanchored: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new(policy: TimingPolicy) -> Self {
        Scheduler {
            policy,
            last_emission: None,
            anchor: None,
            last_stamp: None,
            untimed: 0,
            reanchored: 0,
        }
    }

    /// Compute the emission instant for `frame`, given the current instant `now`.
    ///
    /// The result is never earlier than `now`.
    pub fn target(&mut self, frame: &Frame, now: Instant) -> Instant {
        match &self.policy {
            TimingPolicy::ForwardThrough => now,
            TimingPolicy::Delay { duration } => frame
                .received_at
                .checked_add(*duration)
                .unwrap_or(now)
                .max(now),
            TimingPolicy::Throttle { interval } => match self.last_emission {
                Some(last) => last.checked_add(*interval).unwrap_or(now).max(now),
                None => now,
            },
            TimingPolicy::Replay(field) => match field.decode(&frame.payload) {
                Some(stamp) => self.replay_target(stamp, now),
                None => {
                    self.untimed += 1;
                    trace!(len = frame.payload.len(), "no timestamp; emitting immediately");
                    now
                }
            },
        }
    }

    fn replay_target(&mut self, stamp: Duration, now: Instant) -> Instant {
        let regressed = self.last_stamp.is_some_and(|last| stamp < last);
        self.last_stamp = Some(stamp);

        let anchor = match self.anchor {
            Some(anchor) if !regressed => anchor,
            _ => {
                if regressed {
                    self.reanchored += 1;
                    debug!(?stamp, "packet time went backwards; resetting replay anchor");
                }
                self.anchor = Some(Anchor {
                    wall: now,
                    domain: stamp,
                });
                return now;
            }
        };

        anchor
            .wall
            .checked_add(stamp.saturating_sub(anchor.domain))
            .unwrap_or(now)
            .max(now)
    }

    /// Record that a frame was written to the sink at `at`.
    pub fn emitted(&mut self, at: Instant) {
        self.last_emission = Some(at);
    }

    /// Forget the replay anchor after the route was paused. The next timestamped packet
    /// is emitted immediately and becomes the new anchor.
    pub fn resumed(&mut self) {
        self.anchor = None;
        self.last_stamp = None;
    }

    /// Number of replay frames emitted immediately because no timestamp could be read.
    #[must_use]
    pub fn untimed(&self) -> u64 {
        self.untimed
    }

    /// Number of times the replay anchor was reset by a timestamp regression.
    #[must_use]
    pub fn reanchored(&self) -> u64 {
        self.reanchored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(received_at: Instant, payload: Vec<u8>) -> Frame {
        Frame {
            header: Vec::new(),
            payload,
            footer: Vec::new(),
            primary: None,
            received_at,
        }
    }

    fn stamped(secs: u32, subsecs: u16, received_at: Instant) -> Frame {
        let mut payload = vec![0x08, 0x07, 0xc0, 0x00, 0x00, 0x07];
        payload.extend_from_slice(&secs.to_be_bytes());
        payload.extend_from_slice(&subsecs.to_be_bytes());
        frame_at(received_at, payload)
    }

    #[test]
    fn forward_through_is_now() {
        let now = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::ForwardThrough);
        let frame = frame_at(now, vec![0; 7]);

        assert_eq!(sched.target(&frame, now), now);
        sched.emitted(now);
        assert_eq!(sched.target(&frame, now), now);
    }

    #[test]
    fn delay_is_per_packet() {
        let t0 = Instant::now();
        let delay = Duration::from_millis(250);
        let mut sched = Scheduler::new(TimingPolicy::Delay { duration: delay });

        let first = frame_at(t0, vec![0; 7]);
        let second = frame_at(t0 + Duration::from_millis(10), vec![0; 7]);

        assert_eq!(sched.target(&first, t0), t0 + delay);
        sched.emitted(t0 + delay);
        // not cumulative; relative to when the second frame was received
        assert_eq!(
            sched.target(&second, t0 + delay),
            t0 + Duration::from_millis(10) + delay
        );
    }

    #[test]
    fn delay_already_elapsed_is_now() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Delay {
            duration: Duration::from_millis(5),
        });
        let late = t0 + Duration::from_secs(1);

        assert_eq!(sched.target(&frame_at(t0, vec![0; 7]), late), late);
    }

    #[test]
    fn throttle_spaces_burst() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(100);
        let mut sched = Scheduler::new(TimingPolicy::Throttle { interval });

        let mut emissions = Vec::new();
        for _ in 0..5 {
            let frame = frame_at(t0, vec![0; 7]);
            // all frames ready at t0; the writer emits exactly at the target
            let at = sched.target(&frame, t0);
            sched.emitted(at);
            emissions.push(at);
        }

        assert_eq!(emissions[0], t0);
        for pair in emissions.windows(2) {
            assert!(pair[1] - pair[0] >= interval, "{pair:?}");
        }
    }

    #[test]
    fn throttle_never_anticipates() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(100);
        let mut sched = Scheduler::new(TimingPolicy::Throttle { interval });
        sched.emitted(t0);

        let later = t0 + Duration::from_secs(5);
        assert_eq!(sched.target(&frame_at(later, vec![0; 7]), later), later);
    }

    #[test]
    fn replay_follows_packet_time() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));

        let targets: Vec<Instant> = (0..3)
            .map(|secs| sched.target(&stamped(100 + secs, 0, t0), t0))
            .collect();

        assert_eq!(targets[0], t0);
        assert_eq!(targets[1], t0 + Duration::from_secs(1));
        assert_eq!(targets[2], t0 + Duration::from_secs(2));
    }

    #[test]
    fn replay_uses_subseconds() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));

        assert_eq!(sched.target(&stamped(5, 0, t0), t0), t0);
        assert_eq!(
            sched.target(&stamped(5, 0x4000, t0), t0),
            t0 + Duration::from_millis(250)
        );
    }

    #[test]
    fn replay_does_not_compound_drift() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));
        sched.target(&stamped(0, 0, t0), t0);

        // writer ran late for the second packet
        let late = t0 + Duration::from_millis(1300);
        assert_eq!(sched.target(&stamped(1, 0, t0), late), late);
        sched.emitted(late);
        // third target still comes from the anchor
        assert_eq!(
            sched.target(&stamped(2, 0, t0), late),
            t0 + Duration::from_secs(2)
        );
    }

    #[test]
    fn replay_regression_resets_anchor() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));

        sched.target(&stamped(0, 0, t0), t0);
        sched.target(&stamped(2, 0, t0), t0);

        let t1 = t0 + Duration::from_millis(500);
        assert_eq!(sched.target(&stamped(1, 0, t0), t1), t1);
        assert_eq!(sched.reanchored(), 1);
        assert_eq!(
            sched.target(&stamped(3, 0, t0), t1),
            t1 + Duration::from_secs(2)
        );
    }

    #[test]
    fn replay_untimed_packet_is_immediate() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));
        sched.target(&stamped(0, 0, t0), t0);

        assert_eq!(sched.target(&frame_at(t0, vec![0; 7]), t0), t0);
        assert_eq!(sched.untimed(), 1);
        // anchor untouched
        assert_eq!(
            sched.target(&stamped(4, 0, t0), t0),
            t0 + Duration::from_secs(4)
        );
    }

    #[test]
    fn replay_resume_starts_new_anchor() {
        let t0 = Instant::now();
        let mut sched = Scheduler::new(TimingPolicy::Replay(TimestampField::default()));
        sched.target(&stamped(0, 0, t0), t0);

        let t1 = t0 + Duration::from_secs(30);
        sched.resumed();
        assert_eq!(sched.target(&stamped(1, 0, t0), t1), t1);
        assert_eq!(
            sched.target(&stamped(3, 0, t0), t1),
            t1 + Duration::from_secs(2)
        );
        assert_eq!(sched.reanchored(), 0);
    }

    #[test]
    fn validate_policies() {
        assert!(TimingPolicy::ForwardThrough.validate().is_ok());
        assert!(TimingPolicy::Delay {
            duration: Duration::ZERO
        }
        .validate()
        .is_ok());
        assert!(TimingPolicy::Throttle {
            interval: Duration::ZERO
        }
        .validate()
        .is_err());
        assert!(TimingPolicy::Replay(TimestampField::default())
            .validate()
            .is_ok());
    }
}
