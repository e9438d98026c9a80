//! Output data rate: a whole-number divider of the 5 Hz block rate.

use platform::config::BLOCK_RATE_HZ;

/// Largest divider (0.01 Hz).
pub const MAX_DIVIDER: u16 = 500;

/// Rejected rate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RateError {
    /// Zero, negative or NaN.
    NotPositive,
}

/// Emit one ratio line every `divider` block updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputRate {
    divider: u16,
}

impl OutputRate {
    /// Full block rate.
    pub const MAX: Self = Self { divider: 1 };

    /// Fastest rate not above `requested_hz`.
    ///
    /// The flag is set when the request lies outside `0.01..=5` Hz and was
    /// clamped to the nearest end.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // bounded to 1..=500 before the cast
    pub fn from_hz(requested_hz: f32) -> Result<(Self, bool), RateError> {
        if !(requested_hz > 0.0) {
            return Err(RateError::NotPositive);
        }
        if requested_hz > BLOCK_RATE_HZ {
            return Ok((Self::MAX, true));
        }

        let start = libm::floorf(BLOCK_RATE_HZ / requested_hz).clamp(1.0, f32::from(MAX_DIVIDER));
        let mut divider = start as u16;
        while BLOCK_RATE_HZ / f32::from(divider) > requested_hz && divider < MAX_DIVIDER {
            divider = divider.saturating_add(1);
        }
        let clamped = BLOCK_RATE_HZ / f32::from(divider) > requested_hz;
        Ok((Self { divider }, clamped))
    }

    /// Rate from a value read back from flash, ignoring clamping.
    pub fn from_stored_hz(hz: f32) -> Result<Self, RateError> {
        Self::from_hz(hz).map(|(rate, _)| rate)
    }

    /// Block updates per emitted line.
    pub fn divider(self) -> u16 {
        self.divider
    }

    /// Effective rate in Hz.
    pub fn hz(self) -> f32 {
        BLOCK_RATE_HZ / f32::from(self.divider)
    }
}

impl Default for OutputRate {
    fn default() -> Self {
        Self { divider: 5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_rates_are_kept() {
        for (hz, divider) in [(5.0, 1), (1.0, 5), (0.5, 10), (0.01, 500)] {
            let (rate, clamped) = OutputRate::from_hz(hz).unwrap();
            assert_eq!(rate.divider(), divider, "{hz} Hz");
            assert!(!clamped);
        }
    }

    #[test]
    fn test_inexact_rate_rounds_down() {
        let (rate, clamped) = OutputRate::from_hz(2.0).unwrap();
        assert_eq!(rate.divider(), 3);
        assert!(rate.hz() <= 2.0);
        assert!(!clamped);
    }

    #[test]
    fn test_out_of_range_requests_clamp() {
        assert_eq!(OutputRate::from_hz(50.0).unwrap(), (OutputRate::MAX, true));
        let (rate, clamped) = OutputRate::from_hz(0.001).unwrap();
        assert_eq!(rate.divider(), MAX_DIVIDER);
        assert!(clamped);
    }

    #[test]
    fn test_non_positive_rejected() {
        assert_eq!(OutputRate::from_hz(0.0), Err(RateError::NotPositive));
        assert_eq!(OutputRate::from_hz(-1.0), Err(RateError::NotPositive));
        assert_eq!(OutputRate::from_hz(f32::NAN), Err(RateError::NotPositive));
    }

    #[test]
    fn test_default_is_one_hertz() {
        assert_eq!(OutputRate::default().hz(), 1.0);
    }
}
