//! Frequency values for simulation-throughput reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A frequency value stored in Hertz.
///
/// The runtime reports the rate at which it executes logical simulation
/// steps; values display using the largest unit that keeps the mantissa
/// above one (GHz, MHz, KHz, or Hz).
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frequency(f64);

impl Frequency {
    /// Creates a new frequency from a value in Hertz.
    pub fn new(hz: f64) -> Self {
        Self(hz)
    }

    /// Computes the frequency of `steps` events over `secs` seconds.
    ///
    /// A zero or negative interval reports zero Hertz rather than dividing
    /// by zero.
    pub fn from_rate(steps: u64, secs: f64) -> Self {
        if secs <= 0.0 {
            Self(0.0)
        } else {
            Self(steps as f64 / secs)
        }
    }

    /// Returns the frequency in Hertz.
    pub fn hz(&self) -> f64 {
        self.0
    }

    /// Returns the frequency in megahertz.
    pub fn mhz(&self) -> f64 {
        self.0 / 1_000_000.0
    }
}

impl fmt::Debug for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frequency({self})")
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hz = self.0;
        if hz >= 1_000_000_000.0 {
            write!(f, "{:.1}GHz", hz / 1_000_000_000.0)
        } else if hz >= 1_000_000.0 {
            write!(f, "{:.1}MHz", hz / 1_000_000.0)
        } else if hz >= 1_000.0 {
            write!(f, "{:.1}KHz", hz / 1_000.0)
        } else {
            write!(f, "{hz:.0}Hz")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_units() {
        assert_eq!(format!("{}", Frequency::new(2_500_000_000.0)), "2.5GHz");
        assert_eq!(format!("{}", Frequency::new(50_000_000.0)), "50.0MHz");
        assert_eq!(format!("{}", Frequency::new(32_000.0)), "32.0KHz");
        assert_eq!(format!("{}", Frequency::new(7.0)), "7Hz");
    }

    #[test]
    fn from_rate() {
        let f = Frequency::from_rate(1000, 2.0);
        assert_eq!(f.hz(), 500.0);
    }

    #[test]
    fn zero_interval_is_zero_hz() {
        let f = Frequency::from_rate(1000, 0.0);
        assert_eq!(f.hz(), 0.0);
    }
}
