//! Rational time and tape pulses.

/// A length of time expressed as `length / clock_rate` seconds.
///
/// Keeping the rational form avoids cumulative rounding when summing event
/// lengths that were authored against different clocks, e.g. flux timings
/// against a disk controller clock versus index holes against rotation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub length: u32,
    pub clock_rate: u32,
}

impl Time {
    pub const ZERO: Self = Self {
        length: 0,
        clock_rate: 1,
    };

    #[must_use]
    pub const fn new(length: u32, clock_rate: u32) -> Self {
        Self { length, clock_rate }
    }

    /// This length measured in seconds.
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        f64::from(self.length) / f64::from(self.clock_rate)
    }

    /// This length measured in ticks of `clock_rate` Hz, rounded down.
    #[must_use]
    pub fn as_ticks(self, clock_rate: u64) -> u64 {
        u64::from(self.length) * clock_rate / u64::from(self.clock_rate)
    }
}

/// The level of a tape pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseType {
    Zero,
    High,
    Low,
}

/// One tape pulse: a level held for a length of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub pulse_type: PulseType,
    pub length: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_scale_between_clocks() {
        // 1/300th of a second at 8 MHz.
        let t = Time::new(1, 300);
        assert_eq!(t.as_ticks(8_000_000), 26_666);
    }
}
