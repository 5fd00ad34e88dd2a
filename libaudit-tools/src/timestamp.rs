use std::fmt;
use std::ops::Sub;

pub const MICROS_PER_SEC: u32 = 1_000_000;

/// Capture timestamp, a single count of microseconds since the epoch.
///
/// Capture formats only provide microsecond resolution; audit records carry
/// nanoseconds, so `as_nanos` pads the low digits with zeros. Arithmetic is
/// saturating, never panicking, and a single integer means there is no
/// carry handling to get wrong.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// Build from the second/microsecond pair of a capture header
    pub fn new(secs: u32, micros: u32) -> Timestamp {
        Timestamp {
            micros: i64::from(secs) * i64::from(MICROS_PER_SEC) + i64::from(micros),
        }
    }

    pub fn from_micros(micros: i64) -> Timestamp {
        Timestamp { micros }
    }

    /// True for the zero value, which marks "not seen yet"
    #[inline]
    pub fn is_null(self) -> bool {
        self.micros == 0
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.micros
    }

    /// Value in nanoseconds, the unit audit records use
    #[inline]
    pub fn as_nanos(self) -> i64 {
        self.micros.saturating_mul(1_000)
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, other: Timestamp) -> Timestamp {
        Timestamp {
            micros: self.micros.saturating_sub(other.micros),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let secs = self.micros.div_euclid(i64::from(MICROS_PER_SEC));
        let sub = self.micros.rem_euclid(i64::from(MICROS_PER_SEC));
        write!(f, "{}.{:06}", secs, sub)
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn timestamp_sub() {
        let t1 = Timestamp::new(1234, 5678);
        let t2 = Timestamp::new(1234, 6789);
        assert_eq!((t2 - t1).as_micros(), 1111);
        assert_eq!((Timestamp::new(0, 0) - t1).as_micros(), -1_234_005_678);
    }

    #[test]
    fn timestamp_nanos() {
        let t = Timestamp::new(3, 500);
        assert_eq!(t.as_nanos(), 3_000_500_000);
    }

    #[test]
    fn timestamp_display() {
        assert_eq!(Timestamp::new(12, 345).to_string(), "12.000345");
    }
}
