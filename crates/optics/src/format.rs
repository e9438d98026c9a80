//! Number rendering for CLI output in the printf style host tools parse.
//!
//! Rust's `{:e}` prints `1.2340e1`; host scripts expect `1.2340E+01`.

use core::fmt::{self, Write};

use heapless::String;

/// `%.<precision>E`: mantissa, uppercase `E`, signed exponent of at least two digits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sci {
    /// Value to print.
    pub value: f64,
    /// Digits after the decimal point.
    pub precision: usize,
}

impl Sci {
    /// Print `value` with `precision` fraction digits.
    pub fn new(value: impl Into<f64>, precision: usize) -> Self {
        Self { value: value.into(), precision }
    }
}

impl fmt::Display for Sci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_nan() {
            return f.write_str("NAN");
        }
        if self.value.is_infinite() {
            return f.write_str(if self.value < 0.0 { "-INF" } else { "INF" });
        }

        let mut buf: String<64> = String::new();
        write!(buf, "{:.*e}", self.precision, self.value).map_err(|_| fmt::Error)?;
        let (mantissa, exponent) = buf.split_once('e').ok_or(fmt::Error)?;
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        f.write_str(mantissa)?;
        f.write_char('E')?;
        f.write_char(sign)?;
        if digits.len() < 2 {
            f.write_char('0')?;
        }
        f.write_str(digits)
    }
}

/// `%.<precision>f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fixed {
    /// Value to print.
    pub value: f64,
    /// Digits after the decimal point.
    pub precision: usize,
}

impl Fixed {
    /// Print `value` with `precision` fraction digits.
    pub fn new(value: impl Into<f64>, precision: usize) -> Self {
        Self { value: value.into(), precision }
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_nan() {
            return f.write_str("nan");
        }
        if self.value.is_infinite() {
            return f.write_str(if self.value < 0.0 { "-inf" } else { "inf" });
        }
        write!(f, "{:.*}", self.precision, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sci_matches_printf() {
        assert_eq!(Sci::new(12.34f32, 4).to_string(), "1.2340E+01");
        assert_eq!(Sci::new(-0.005f64, 4).to_string(), "-5.0000E-03");
        assert_eq!(Sci::new(0.0f32, 5).to_string(), "0.00000E+00");
        assert_eq!(Sci::new(6.02e23f64, 2).to_string(), "6.02E+23");
        assert_eq!(Sci::new(1e-120f64, 1).to_string(), "1.0E-120");
    }

    #[test]
    fn test_sci_non_finite() {
        assert_eq!(Sci::new(f64::NAN, 4).to_string(), "NAN");
        assert_eq!(Sci::new(f64::NEG_INFINITY, 4).to_string(), "-INF");
    }

    #[test]
    fn test_fixed_precision() {
        assert_eq!(Fixed::new(1.0f32, 5).to_string(), "1.00000");
        assert_eq!(Fixed::new(0.2f64, 5).to_string(), "0.20000");
        assert_eq!(Fixed::new(f64::INFINITY, 2).to_string(), "inf");
    }
}
