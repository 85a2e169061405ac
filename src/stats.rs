// stats.rs
//
// Descriptive statistics that skip missing values, plus the rank statistics used to
// compare eigengenes with experimental factors.

use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{PreprocessError, Result};

fn present(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

pub fn min(values: &[f64]) -> Option<f64> {
    present(values).fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}

pub fn max(values: &[f64]) -> Option<f64> {
    present(values).fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = present(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = present(values).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn range(values: &[f64]) -> Option<f64> {
    Some(max(values)? - min(values)?)
}

/// Sample variance (n - 1 denominator) of the non-missing values.
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let (ss, n) = present(values).fold((0.0, 0usize), |(s, n), v| (s + (v - m).powi(2), n + 1));
    if n < 2 {
        None
    } else {
        Some(ss / (n - 1) as f64)
    }
}

/// Coefficient of variation: sample standard deviation over the mean.
pub fn cv(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let sd = variance(values)?.sqrt();
    Some(sd / m)
}

/// Ranks (1-based) with ties given their average rank. NaN inputs are not allowed.
pub fn rank_average_ties(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx.sqrt() * syy.sqrt())
}

/// Spearman rank correlation over the pairs where both values are finite.
///
/// Returns NaN when fewer than 3 complete pairs remain or either side is constant.
pub fn spearman_rank_correlation(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(PreprocessError::DimensionMismatch {
            expected: format!("{} values", x.len()),
            got: format!("{} values", y.len()),
        });
    }
    let (xv, yv): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();
    if xv.len() < 3 {
        return Ok(f64::NAN);
    }
    Ok(pearson(&rank_average_ties(&xv), &rank_average_ties(&yv)))
}

/// One-way Kruskal-Wallis test of `values` split by `groups`; returns the p-value.
///
/// Uses the tie-corrected H statistic and its chi-squared approximation with
/// k - 1 degrees of freedom. When every value is tied the p-value is 1.
pub fn kruskal_wallis(values: &[f64], groups: &[i64]) -> Result<f64> {
    if values.len() != groups.len() {
        return Err(PreprocessError::DimensionMismatch {
            expected: format!("{} group labels", values.len()),
            got: format!("{} group labels", groups.len()),
        });
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err(PreprocessError::InvalidArgument(
            "Kruskal-Wallis input must not contain missing values".to_string(),
        ));
    }

    let ranks = rank_average_ties(values);
    let mut rank_sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for (&g, &r) in groups.iter().zip(&ranks) {
        let entry = rank_sums.entry(g).or_insert((0.0, 0));
        entry.0 += r;
        entry.1 += 1;
    }
    let k = rank_sums.len();
    if k < 2 {
        return Err(PreprocessError::InvalidArgument(format!(
            "Kruskal-Wallis needs at least two groups, got {}",
            k
        )));
    }

    let n = values.len() as f64;
    let h: f64 = 12.0 / (n * (n + 1.0))
        * rank_sums
            .values()
            .map(|&(sum, count)| sum * sum / count as f64)
            .sum::<f64>()
        - 3.0 * (n + 1.0);

    // tie correction
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        i = j + 1;
    }
    let correction = 1.0 - tie_term / (n * n * n - n);
    if correction <= 0.0 {
        return Ok(1.0);
    }
    let h = (h / correction).max(0.0);

    let chi2 = ChiSquared::new((k - 1) as f64)
        .map_err(|e| PreprocessError::Numerical(format!("chi-squared distribution: {}", e)))?;
    Ok(chi2.sf(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_descriptives_skip_missing() {
        let v = [3.0, f64::NAN, 1.0, 2.0];
        assert_eq!(min(&v), Some(1.0));
        assert_eq!(max(&v), Some(3.0));
        assert_eq!(mean(&v), Some(2.0));
        assert_eq!(median(&v), Some(2.0));
        assert_eq!(range(&v), Some(2.0));
        assert_relative_eq!(cv(&v).unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(mean(&[f64::NAN]), None);
    }

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(rank_average_ties(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn test_spearman_monotone_and_pairwise_deletion() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 8.0, 16.0, 32.0];
        assert_relative_eq!(spearman_rank_correlation(&x, &y).unwrap(), 1.0, epsilon = 1e-12);

        let y_rev = [5.0, 4.0, f64::NAN, 2.0, 1.0];
        assert_relative_eq!(spearman_rank_correlation(&x, &y_rev).unwrap(), -1.0, epsilon = 1e-12);

        let too_few = [1.0, f64::NAN, f64::NAN, f64::NAN, 2.0];
        assert!(spearman_rank_correlation(&x, &too_few).unwrap().is_nan());
        assert!(spearman_rank_correlation(&x, &y[..3]).is_err());
    }

    #[test]
    fn test_kruskal_wallis_separated_groups() {
        // three well separated groups of three: H = 7.2, p = exp(-3.6)
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let groups = [1, 1, 1, 2, 2, 2, 3, 3, 3];
        let p = kruskal_wallis(&values, &groups).unwrap();
        assert_relative_eq!(p, (-3.6f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn test_kruskal_wallis_degenerate_inputs() {
        assert_eq!(kruskal_wallis(&[1.0, 1.0, 1.0], &[1, 2, 3]).unwrap(), 1.0);
        assert!(kruskal_wallis(&[1.0, 2.0], &[1, 1]).is_err());
        assert!(kruskal_wallis(&[1.0, f64::NAN], &[1, 2]).is_err());
    }
}
