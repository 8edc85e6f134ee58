use crate::Float;

/// Natural log of `sqrt(2π)`.
pub const LN_SQRT_2PI: Float = 0.918_938_533_204_672_7;

/// The error function, via the Abramowitz & Stegun 7.1.26 rational
/// approximation (absolute error below 1.5e-7 everywhere).
pub fn erf(x: Float) -> Float {
    const A1: Float = 0.254829592;
    const A2: Float = -0.284496736;
    const A3: Float = 1.421413741;
    const A4: Float = -1.453152027;
    const A5: Float = 1.061405429;
    const P: Float = 0.3275911;
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// The standard normal cumulative distribution function.
pub fn normal_cdf(z: Float) -> Float {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Log-density of a Normal distribution `N(mu, sigma)` at `x`, without any
/// range truncation.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn normal_logpdf(x: Float, mu: Float, sigma: Float) -> Float {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - LN_SQRT_2PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_erf_reference_values() {
        // the rational approximation is only accurate to 1.5e-7, even at zero
        assert_abs_diff_eq!(erf(0.0), 0.0, epsilon = 1.5e-7);
        assert_relative_eq!(erf(1.0), 0.8427007929497149, epsilon = 1e-6);
        assert_relative_eq!(erf(-1.0), -0.8427007929497149, epsilon = 1e-6);
        assert_relative_eq!(erf(2.0), 0.9953222650189527, epsilon = 1e-6);
        assert!(erf(6.0) > 0.999999);
    }

    #[test]
    fn test_normal_cdf() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-7);
        assert_relative_eq!(normal_cdf(1.96), 0.9750021, epsilon = 1e-5);
        assert_relative_eq!(
            normal_cdf(1.0) - normal_cdf(-1.0),
            0.6826894921370859,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_normal_logpdf() {
        assert_relative_eq!(normal_logpdf(0.0, 0.0, 1.0), -LN_SQRT_2PI);
        // symmetric around the mean
        assert_relative_eq!(
            normal_logpdf(1.3, 0.0, 2.0),
            normal_logpdf(-1.3, 0.0, 2.0)
        );
    }
}
