//! The timestamp pair this whole crate exists to ship to consumers.

/// A nanosecond-resolution instant in the GPS/UTC epoch.
///
/// Deliberately not [`std::time::SystemTime`]: that type carries no
/// guarantee its internal representation is seconds-since-epoch plus
/// nanoseconds, and extracting those components back out is exactly the
/// lossy, platform-specific operation we need to avoid performing twice
/// (once to build it, once to tear it back down for the wire format).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsTimestamp {
    /// Seconds since the Unix epoch. Signed to match `time_t`.
    pub sec: i64,
    /// Nanoseconds within the second, `0..1_000_000_000`.
    pub nsec: u32,
}

impl GpsTimestamp {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Microseconds within the second, the field legacy consumers read
    /// when they don't bother with the nanosecond fields.
    pub const fn usec(self) -> i32 {
        (self.nsec / 1_000) as i32
    }

    /// Nanoseconds since the Unix epoch, saturating rather than panicking
    /// on overflow — this is only used for offset arithmetic, never for
    /// anything that must reject out-of-range input.
    fn total_nanos(self) -> i128 {
        self.sec as i128 * 1_000_000_000 + self.nsec as i128
    }
}

/// Pairs the GPS-derived wall-clock instant of an event (`real`) with the
/// local instant at which this process observed it (`clock`).
///
/// `real - clock` is the instantaneous offset the consumer daemon will
/// apply to its own clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeDrift {
    pub real: GpsTimestamp,
    pub clock: GpsTimestamp,
}

impl TimeDrift {
    pub const fn new(real: GpsTimestamp, clock: GpsTimestamp) -> Self {
        Self { real, clock }
    }

    /// `(real - clock)` in seconds, as the chrony SOCK driver wants it.
    ///
    /// This float loses precision below a nanosecond and cannot usefully
    /// represent an offset of more than a few seconds; callers that see a
    /// large offset here should trust the refclock channel instead.
    pub fn offset_secs(self) -> f64 {
        (self.real.total_nanos() - self.clock.total_nanos()) as f64 / 1e9
    }
}
