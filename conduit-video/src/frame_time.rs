//! A presentation timestamp expressed as an exact rational, grounded in
//! `FrameTime.h`'s `Time = boost::rational<int64_t>`. An exact rational
//! (rather than a float or a fixed-point nanosecond count) is what lets frame
//! durations like 1001/30000 accumulate without drift across a long session.

use std::fmt;
use std::ops::{Add, Mul};

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

/// An exact `numerator / denominator` point in time, always kept in lowest
/// terms with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameTime {
    numerator: i64,
    denominator: i64,
}

impl FrameTime {
    /// # Panics
    /// Panics if `denominator` is zero.
    pub fn new(numerator: i64, denominator: i64) -> Self {
        assert!(denominator != 0, "FrameTime denominator must not be zero");
        let sign = if denominator < 0 { -1 } else { 1 };
        let g = gcd(numerator, denominator);
        FrameTime {
            numerator: sign * numerator / g,
            denominator: sign * denominator / g,
        }
    }

    pub const fn zero() -> Self {
        FrameTime {
            numerator: 0,
            denominator: 1,
        }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    pub fn to_seconds(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Add for FrameTime {
    type Output = FrameTime;

    fn add(self, rhs: FrameTime) -> FrameTime {
        FrameTime::new(
            self.numerator * rhs.denominator + rhs.numerator * self.denominator,
            self.denominator * rhs.denominator,
        )
    }
}

impl Mul<i64> for FrameTime {
    type Output = FrameTime;

    fn mul(self, rhs: i64) -> FrameTime {
        FrameTime::new(self.numerator * rhs, self.denominator)
    }
}

impl fmt::Display for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_to_lowest_terms() {
        let t = FrameTime::new(2, 4);
        assert_eq!((t.numerator(), t.denominator()), (1, 2));
    }

    #[test]
    fn accumulates_without_drift() {
        let frame_duration = FrameTime::new(1001, 30000);
        let mut t = FrameTime::zero();
        for _ in 0..30 {
            t = t + frame_duration;
        }
        assert_eq!(t, FrameTime::new(1001, 1000));
    }

    #[test]
    fn negative_denominator_normalizes_sign() {
        let t = FrameTime::new(1, -2);
        assert_eq!((t.numerator(), t.denominator()), (-1, 2));
    }

    #[test]
    fn scales_by_integer_factor() {
        let frame_duration = FrameTime::new(1, 25);
        let end = frame_duration * 9;
        assert_eq!(end, FrameTime::new(9, 25));
    }
}
