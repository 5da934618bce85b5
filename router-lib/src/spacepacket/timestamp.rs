use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Endian;
use crate::{Error, Result};

/// Location and encoding of a packet timestamp made of an unsigned seconds field and an
/// optional unsigned subseconds field.
///
/// Offsets are byte offsets from the first byte of the primary header, so a timestamp at
/// the start of the secondary header has `seconds_offset` 6.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimestampField {
    pub seconds_offset: usize,
    /// Width of the seconds field, 1 to 8 bytes.
    pub seconds_width: usize,
    pub subseconds_offset: usize,
    /// Width of the subseconds field, 0 to 8 bytes. Zero disables subseconds.
    pub subseconds_width: usize,
    /// Seconds per subsecond tick, e.g., `1.0 / 65536.0` for a 16-bit binary fraction or
    /// `1e-6` for a microsecond counter.
    pub subseconds_resolution: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub endian: Endian,
}

impl Default for TimestampField {
    /// CCSDS unsegmented time with 4 coarse and 2 fine bytes directly after the primary
    /// header.
    fn default() -> Self {
        TimestampField {
            seconds_offset: 6,
            seconds_width: 4,
            subseconds_offset: 10,
            subseconds_width: 2,
            subseconds_resolution: 1.0 / 65536.0,
            endian: Endian::Big,
        }
    }
}

/// Raw timestamp field values read from a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u64,
    pub subseconds: u64,
}

impl TimestampField {
    /// Check field widths and resolution.
    ///
    /// # Errors
    /// [Error::Config] for a seconds width outside 1..=8, a subseconds width above 8, or a
    /// subseconds resolution that is not a positive finite number while subseconds are used.
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.seconds_width) {
            return Err(Error::Config(format!(
                "timestamp seconds width must be 1 to 8 bytes; got {}",
                self.seconds_width
            )));
        }
        if self.subseconds_width > 8 {
            return Err(Error::Config(format!(
                "timestamp subseconds width must be 0 to 8 bytes; got {}",
                self.subseconds_width
            )));
        }
        if self.subseconds_width > 0
            && !(self.subseconds_resolution.is_finite() && self.subseconds_resolution > 0.0)
        {
            return Err(Error::Config(format!(
                "timestamp subseconds resolution must be positive; got {}",
                self.subseconds_resolution
            )));
        }
        Ok(())
    }

    /// Read the raw timestamp fields from `packet`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `packet` ends before either field.
    pub fn extract(&self, packet: &[u8]) -> Result<Timestamp> {
        let seconds_end = self.seconds_offset.saturating_add(self.seconds_width);
        let subseconds_end = self.subseconds_offset.saturating_add(self.subseconds_width);
        let minimum = if self.subseconds_width == 0 {
            seconds_end
        } else {
            seconds_end.max(subseconds_end)
        };
        if packet.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: packet.len(),
                minimum,
            });
        }

        Ok(Timestamp {
            seconds: self.endian.uint(&packet[self.seconds_offset..seconds_end]),
            subseconds: if self.subseconds_width == 0 {
                0
            } else {
                self.endian
                    .uint(&packet[self.subseconds_offset..subseconds_end])
            },
        })
    }

    /// Read the timestamp from `packet` as time since the packet time epoch.
    ///
    /// Returns `None` if the packet is too short or the value does not fit a [Duration].
    #[must_use]
    pub fn decode(&self, packet: &[u8]) -> Option<Duration> {
        let stamp = self.extract(packet).ok()?;
        let fraction = if self.subseconds_width == 0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(stamp.subseconds as f64 * self.subseconds_resolution)
                .ok()?
        };
        Duration::from_secs(stamp.seconds).checked_add(fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_time(secs: u32, subsecs: u16) -> Vec<u8> {
        let mut dat = vec![0x08, 0x07, 0xc0, 0x00, 0x00, 0x07];
        dat.extend_from_slice(&secs.to_be_bytes());
        dat.extend_from_slice(&subsecs.to_be_bytes());
        dat
    }

    #[test]
    fn decode_default_field() {
        let field = TimestampField::default();
        let dat = packet_with_time(10, 0x8000);

        assert_eq!(field.decode(&dat), Some(Duration::from_millis(10_500)));
    }

    #[test]
    fn extract_little_endian() {
        let field = TimestampField {
            endian: Endian::Little,
            ..TimestampField::default()
        };
        let mut dat = vec![0u8; 6];
        dat.extend_from_slice(&[0x0a, 0, 0, 0, 0x01, 0]);

        let stamp = field.extract(&dat).unwrap();
        assert_eq!(stamp, Timestamp { seconds: 10, subseconds: 1 });
    }

    #[test]
    fn extract_short_packet() {
        let field = TimestampField::default();
        let zult = field.extract(&[0u8; 8]);

        assert!(
            matches!(zult, Err(Error::NotEnoughData { actual: 8, minimum: 12 })),
            "got {zult:?}"
        );
        assert_eq!(field.decode(&[0u8; 8]), None);
    }

    #[test]
    fn extract_offset_past_any_packet() {
        let field = TimestampField {
            seconds_offset: usize::MAX,
            ..TimestampField::default()
        };
        let zult = field.extract(&[0u8; 16]);

        assert!(
            matches!(zult, Err(Error::NotEnoughData { actual: 16, minimum: usize::MAX })),
            "got {zult:?}"
        );
    }

    #[test]
    fn seconds_only_ignores_resolution() {
        let field = TimestampField {
            subseconds_width: 0,
            subseconds_resolution: 0.0,
            ..TimestampField::default()
        };
        field.validate().unwrap();
        assert_eq!(field.decode(&packet_with_time(3, 0xffff)), Some(Duration::from_secs(3)));
        // the unused subseconds offset does not need to be inside the packet
        assert_eq!(field.decode(&packet_with_time(3, 0)[..10]), Some(Duration::from_secs(3)));
    }

    #[test]
    fn validate_rejects_bad_widths() {
        let bad = [
            TimestampField {
                seconds_width: 0,
                ..TimestampField::default()
            },
            TimestampField {
                seconds_width: 9,
                ..TimestampField::default()
            },
            TimestampField {
                subseconds_width: 9,
                ..TimestampField::default()
            },
            TimestampField {
                subseconds_resolution: 0.0,
                ..TimestampField::default()
            },
            TimestampField {
                subseconds_resolution: f64::NAN,
                ..TimestampField::default()
            },
        ];
        for field in bad {
            assert!(field.validate().is_err(), "expected {field:?} to be invalid");
        }
    }
}
