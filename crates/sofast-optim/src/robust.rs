//! Huber down-weighting for the robust surface fits.

use sofast_core::Real;

/// MAD to standard deviation for Gaussian noise.
const MAD_TO_SIGMA: Real = 1.4826;
/// Huber tuning constant for 95% Gaussian efficiency.
const HUBER_K: Real = 1.345;

/// Huber threshold on residual magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Huber {
    pub delta: Real,
}

impl Huber {
    /// Threshold scaled from the median absolute residual.
    ///
    /// `None` when there is nothing to scale from, i.e. no residuals or all
    /// of them numerically zero.
    pub fn from_residuals(residuals: &[Real]) -> Option<Self> {
        let mut mags: Vec<Real> = residuals.iter().map(|r| r.abs()).collect();
        if mags.is_empty() {
            return None;
        }
        let mid = mags.len() / 2;
        let (_, median, _) = mags.select_nth_unstable_by(mid, Real::total_cmp);
        let sigma = MAD_TO_SIGMA * *median;
        (sigma > 1e-15).then(|| Self {
            delta: HUBER_K * sigma,
        })
    }

    /// IRLS weight of residual `r`.
    pub fn weight(&self, r: Real) -> Real {
        let r = r.abs();
        if r <= self.delta {
            1.0
        } else {
            self.delta / r
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outliers_are_down_weighted() {
        let h = Huber { delta: 1.0 };
        assert_eq!(h.weight(0.5), 1.0);
        assert!((h.weight(-4.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn scale_follows_the_median() {
        let h = Huber::from_residuals(&[1.0, -2.0, 0.5, 100.0]).unwrap();
        assert!((h.delta - HUBER_K * MAD_TO_SIGMA * 2.0).abs() < 1e-12);
        assert!(Huber::from_residuals(&[0.0, 0.0, 0.0]).is_none());
        assert!(Huber::from_residuals(&[]).is_none());
    }
}
