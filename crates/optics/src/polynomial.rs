//! Fifth-order instrument polynomials (INS1, INS2).

/// Number of coefficients, `p0` through `p5`.
pub const COEFFICIENTS: usize = 6;

/// `p0 + p1·x + … + p5·x⁵`, coefficients in ascending order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Polynomial(pub [f32; COEFFICIENTS]);

impl Polynomial {
    /// `y = x`.
    pub const IDENTITY: Self = Self([0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);

    /// Evaluate at `x` (Horner's scheme, f64 accumulation).
    pub fn eval(&self, x: f32) -> f32 {
        let x = f64::from(x);
        let y = self
            .0
            .iter()
            .rev()
            .fold(0.0f64, |acc, p| acc * x + f64::from(*p));
        #[allow(clippy::cast_possible_truncation)] // instrument values fit f32
        let y = y as f32;
        y
    }

    /// Coefficient `k`, zero when out of range.
    pub fn coefficient(&self, k: usize) -> f32 {
        self.0.get(k).copied().unwrap_or(0.0)
    }

    /// Replace coefficient `k`. Out-of-range indices are ignored.
    pub fn set_coefficient(&mut self, k: usize, value: f32) {
        if let Some(p) = self.0.get_mut(k) {
            *p = value;
        }
    }
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passes_through() {
        for x in [-3.5f32, 0.0, 1.0, 1234.5] {
            assert_eq!(Polynomial::default().eval(x), x);
        }
    }

    #[test]
    fn test_horner_matches_expanded_form() {
        let p = Polynomial([1.0, -2.0, 0.5, 0.0, 0.0, 0.25]);
        let x = 2.0f32;
        let expected = 1.0 - 2.0 * x + 0.5 * x * x + 0.25 * x.powi(5);
        assert!((p.eval(x) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_coefficient_access_ignores_out_of_range() {
        let mut p = Polynomial::IDENTITY;
        p.set_coefficient(0, -0.028);
        p.set_coefficient(9, 5.0);
        assert_eq!(p.coefficient(0), -0.028);
        assert_eq!(p.coefficient(9), 0.0);
    }
}
