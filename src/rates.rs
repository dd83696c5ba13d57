//! Among-site rate heterogeneity.
//!
//! A [`SiteRates`] is a mixture of rate categories plus an optional
//! proportion of invariant sites. The variable categories are scaled so that
//! the overall mean rate, invariant sites included, stays at one.

/// One rate category of the variable part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCategory {
    pub rate: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteRates {
    /// Variable-site categories; rates already divided by `1 - p_invar`.
    pub categories: Vec<RateCategory>,
    pub p_invar: f64,
}

impl SiteRates {
    /// A single category of rate one.
    pub fn uniform(p_invar: f64) -> Self {
        Self::from_parts(vec![1.0], vec![1.0], p_invar)
    }

    /// Discrete gamma with `k` equal-weight categories of mean rate.
    pub fn gamma(shape: f64, k: usize, p_invar: f64) -> Self {
        let k = k.max(1);
        Self::from_parts(vec![1.0 / k as f64; k], discrete_gamma(shape, k), p_invar)
    }

    /// Free rates with explicit weights and rates (mean one).
    pub fn free(weights: Vec<f64>, rates: Vec<f64>, p_invar: f64) -> Self {
        Self::from_parts(weights, rates, p_invar)
    }

    fn from_parts(weights: Vec<f64>, rates: Vec<f64>, p_invar: f64) -> Self {
        let p_invar = p_invar.clamp(0.0, 0.999);
        let scale = 1.0 / (1.0 - p_invar);
        let categories = weights
            .into_iter()
            .zip(rates)
            .map(|(weight, rate)| RateCategory { rate: rate * scale, weight })
            .collect();
        SiteRates { categories, p_invar }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Mean rate over all sites, invariant ones included.
    pub fn mean_rate(&self) -> f64 {
        (1.0 - self.p_invar) * self.categories.iter().map(|c| c.rate * c.weight).sum::<f64>()
    }
}

/// Mean rates of `k` equal-probability categories of a gamma distribution
/// with shape `alpha` and mean one.
///
/// Category boundaries are the `i/k` quantiles; the mean within each slice
/// follows from `P(alpha + 1, ·)` evaluated at the scaled boundaries.
pub fn discrete_gamma(alpha: f64, k: usize) -> Vec<f64> {
    if k <= 1 {
        return vec![1.0];
    }
    let kf = k as f64;
    // Boundaries on the rate scale (rate parameter = alpha).
    let cuts: Vec<f64> = (1..k).map(|i| gamma_quantile(alpha, i as f64 / kf) / alpha).collect();
    let mut rates = Vec::with_capacity(k);
    let mut prev = 0.0;
    for i in 0..k {
        let upper = if i + 1 < k { regularized_gamma_p(alpha + 1.0, cuts[i] * alpha) } else { 1.0 };
        rates.push((upper - prev) * kf);
        prev = upper;
    }
    let mean: f64 = rates.iter().sum::<f64>() / kf;
    if mean > 0.0 {
        rates.iter_mut().for_each(|r| *r /= mean);
    }
    rates
}

/// `x` such that `P(a, x) = p` for the unit-scale gamma, by bracketing bisection.
pub fn gamma_quantile(a: f64, p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    let mut lo = 0.0;
    let mut hi = a.max(1.0);
    while regularized_gamma_p(a, hi) < p {
        hi *= 2.0;
        if hi > 1e8 {
            break;
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if regularized_gamma_p(a, mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-14 * hi.max(1e-300) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Regularized lower incomplete gamma `P(a, x)`.
pub fn regularized_gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_series(a, x)
    } else {
        1.0 - gamma_continued_fraction(a, x)
    }
}

fn gamma_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut del = sum;
    for _ in 0..1000 {
        ap += 1.0;
        del *= x / ap;
        sum += del;
        if del.abs() < sum.abs() * 1e-16 {
            break;
        }
    }
    (sum.ln() - x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..1000 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < 1e-16 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Natural log of the gamma function (Lanczos approximation, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + G + 0.5;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ln_gamma_known_values() {
        assert!(ln_gamma(1.0).abs() <= 1e-10);
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() <= 1e-8);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() <= 1e-8);
    }

    #[test]
    fn incomplete_gamma_exponential_case() {
        // a = 1 is the exponential distribution.
        for x in [0.1, 1.0, 3.0] {
            assert!((regularized_gamma_p(1.0, x) - (1.0 - (-x).exp())).abs() <= 1e-10);
        }
    }

    #[test]
    fn quantile_inverts_cdf() {
        for a in [0.3, 1.0, 4.5] {
            for p in [0.1, 0.5, 0.9] {
                let x = gamma_quantile(a, p);
                assert!((regularized_gamma_p(a, x) - p).abs() <= 1e-9);
            }
        }
    }

    #[test]
    fn discrete_gamma_has_mean_one_and_increases() {
        for alpha in [0.1, 0.5, 1.0, 10.0] {
            let rates = discrete_gamma(alpha, 4);
            assert!((rates.iter().sum::<f64>() / 4.0 - 1.0).abs() <= 1e-10);
            assert!(rates.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn discrete_gamma_reference_values() {
        // Yang (1994), alpha = 0.5, four categories, mean rates.
        let rates = discrete_gamma(0.5, 4);
        let expected = [0.0334, 0.2519, 0.8203, 2.8944];
        for (r, e) in rates.iter().zip(expected) {
            assert!((*r - e).abs() <= 1e-3);
        }
    }

    #[test]
    fn invariant_sites_keep_mean_rate() {
        let sr = SiteRates::gamma(0.7, 4, 0.3);
        assert!((sr.mean_rate() - 1.0).abs() <= 1e-10);
        let sr = SiteRates::free(vec![0.5, 0.5], vec![0.4, 1.6], 0.2);
        assert!((sr.mean_rate() - 1.0).abs() <= 1e-12);
    }
}
