//! Descriptive statistics and the correlation significance test.
//!
//! Distribution functions come from `statrs`.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1 denominator). None below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    if variance.is_finite() {
        Some(variance.sqrt())
    } else {
        None
    }
}

/// True when every value is the same, within floating-point noise.
pub fn is_constant(values: &[f64]) -> bool {
    match sample_std_dev(values) {
        Some(sd) => sd <= f64::EPSILON * 16.0,
        None => true,
    }
}

/// Pearson product-moment correlation of two equal-length series.
/// None if the lengths differ, fewer than two pairs, or either side is flat.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom <= 0.0 || !denom.is_finite() {
        return None;
    }
    Some((sxy / denom).clamp(-1.0, 1.0))
}

/// Two-sided p-value of `r` over `n` pairs under H0: ρ = 0.
///
/// t = r·√((n−2)/(1−r²)) with n−2 degrees of freedom. A perfect correlation
/// gives p = 0; fewer than three pairs give p = 1.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 || !r.is_finite() {
        return 1.0;
    }
    let r2 = r * r;
    if r2 >= 1.0 {
        return 0.0;
    }

    let df = n as f64 - 2.0;
    let t = r * (df / (1.0 - r2)).sqrt();

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Significance shrunk towards zero for small samples: s · n / (n + k).
pub fn shrunk_confidence(significance: f64, n: usize, shrinkage: f64) -> f64 {
    let n = n as f64;
    let denom = n + shrinkage.max(0.0);
    if denom <= 0.0 {
        return 0.0;
    }
    (significance * n / denom).clamp(0.0, 1.0)
}

/// Normal-approximation 95% confidence interval for a mean.
/// Collapses to the mean itself when the spread is unknown.
pub fn mean_ci95(mean: f64, std_dev: f64, n: usize) -> (f64, f64) {
    if n < 2 || std_dev <= 0.0 || !std_dev.is_finite() {
        return (mean, mean);
    }
    let z = match Normal::new(0.0, 1.0) {
        Ok(standard) => standard.inverse_cdf(0.975),
        Err(_) => 1.959_963_984_540_054,
    };
    let half = z * std_dev / (n as f64).sqrt();
    (mean - half, mean + half)
}
