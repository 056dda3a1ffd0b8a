//! NaN-aware rolling and expanding window statistics.
//!
//! All functions take a single series (one matrix column widened to `f64`) and return a
//! series of the same length. Missing inputs (`NaN`) contribute nothing to a window; a
//! window produces a value only once it holds at least `min_periods` observations.

/// Shift a series forward by `periods` steps, filling the head with `NaN`.
///
/// `out[t] = values[t - periods]`, so nothing at row `t` depends on rows `>= t - periods + 1`.
pub fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if periods < values.len() {
        out[periods..].copy_from_slice(&values[..values.len() - periods]);
    }
    out
}

/// Replace leading `NaN` values with the first defined value.
pub fn backfill_leading(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    if let Some(first) = values.iter().position(|v| !v.is_nan()) {
        let fill = values[first];
        for v in &mut out[..first] {
            *v = fill;
        }
    }
    out
}

/// Mean of the defined values, `NaN` when there are none.
pub fn nan_mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Median of the defined values, `NaN` when there are none.
pub fn nan_median<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut valid: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    valid.sort_by(|a, b| a.total_cmp(b));
    median_of_sorted(&valid)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        f64::NAN
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Running power sums of the defined values in a window.
#[derive(Debug, Default, Clone, Copy)]
struct PowerSums {
    n: usize,
    s1: f64,
    s2: f64,
    s3: f64,
    s4: f64,
}

impl PowerSums {
    fn push(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        let x2 = x * x;
        self.n += 1;
        self.s1 += x;
        self.s2 += x2;
        self.s3 += x2 * x;
        self.s4 += x2 * x2;
    }

    fn pop(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.n -= 1;
        if self.n == 0 {
            *self = Self::default();
            return;
        }
        let x2 = x * x;
        self.s1 -= x;
        self.s2 -= x2;
        self.s3 -= x2 * x;
        self.s4 -= x2 * x2;
    }

    fn mean(&self) -> f64 {
        self.s1 / self.n as f64
    }

    /// Biased central moments `(m2, m3, m4)`.
    fn central_moments(&self) -> (f64, f64, f64) {
        let n = self.n as f64;
        let mean = self.mean();
        let (e2, e3, e4) = (self.s2 / n, self.s3 / n, self.s4 / n);
        let m2 = (e2 - mean * mean).max(0.0);
        let m3 = e3 - 3.0 * mean * e2 + 2.0 * mean.powi(3);
        let m4 = e4 - 4.0 * mean * e3 + 6.0 * mean * mean * e2 - 3.0 * mean.powi(4);
        (m2, m3, m4.max(0.0))
    }
}

fn rolling_with<F>(values: &[f64], window: usize, min_periods: usize, stat: F) -> Vec<f64>
where
    F: Fn(&PowerSums) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    let min_periods = min_periods.max(1);
    let mut sums = PowerSums::default();
    for t in 0..values.len() {
        sums.push(values[t]);
        if t >= window {
            sums.pop(values[t - window]);
        }
        if sums.n >= min_periods {
            out[t] = stat(&sums);
        }
    }
    out
}

/// Rolling sum over `window` rows.
pub fn rolling_sum(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_with(values, window, min_periods, |s| s.s1)
}

/// Rolling arithmetic mean over `window` rows.
pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_with(values, window, min_periods, |s| s.mean())
}

/// Rolling sample standard deviation (n - 1 denominator).
pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_with(values, window, min_periods.max(2), |s| {
        let n = s.n as f64;
        let (m2, _, _) = s.central_moments();
        (m2 * n / (n - 1.0)).sqrt()
    })
}

/// Rolling bias-corrected sample skewness; needs at least three observations.
pub fn rolling_skew(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_with(values, window, min_periods.max(3), |s| {
        let n = s.n as f64;
        let (m2, m3, _) = s.central_moments();
        if m2 <= f64::EPSILON * f64::EPSILON {
            return f64::NAN;
        }
        (n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5)
    })
}

/// Rolling bias-corrected excess kurtosis; needs at least four observations.
pub fn rolling_kurt(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_with(values, window, min_periods.max(4), |s| {
        let n = s.n as f64;
        let (m2, _, m4) = s.central_moments();
        if m2 <= f64::EPSILON * f64::EPSILON {
            return f64::NAN;
        }
        let ratio = m4 / (m2 * m2);
        ((n + 1.0) * (n - 1.0) * ratio - 3.0 * (n - 1.0) * (n - 1.0)) / ((n - 2.0) * (n - 3.0))
    })
}

/// Insert into a sorted vector, keeping it sorted.
fn insert_sorted(sorted: &mut Vec<f64>, x: f64) {
    let idx = sorted.partition_point(|v| *v < x);
    sorted.insert(idx, x);
}

/// Remove one occurrence of `x` from a sorted vector.
fn remove_sorted(sorted: &mut Vec<f64>, x: f64) {
    let idx = sorted.partition_point(|v| *v < x);
    if idx < sorted.len() && sorted[idx] == x {
        sorted.remove(idx);
    }
}

/// Rolling median over `window` rows.
pub fn rolling_median(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    let min_periods = min_periods.max(1);
    let mut sorted: Vec<f64> = Vec::with_capacity(window);
    for t in 0..values.len() {
        if !values[t].is_nan() {
            insert_sorted(&mut sorted, values[t]);
        }
        if t >= window && !values[t - window].is_nan() {
            remove_sorted(&mut sorted, values[t - window]);
        }
        if sorted.len() >= min_periods {
            out[t] = median_of_sorted(&sorted);
        }
    }
    out
}

/// Median of all defined values seen so far.
pub fn expanding_median(values: &[f64], min_periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let min_periods = min_periods.max(1);
    let mut sorted: Vec<f64> = Vec::new();
    for (t, &x) in values.iter().enumerate() {
        if !x.is_nan() {
            insert_sorted(&mut sorted, x);
        }
        if sorted.len() >= min_periods {
            out[t] = median_of_sorted(&sorted);
        }
    }
    out
}

/// Exponentially weighted mean with smoothing `2 / (span + 1)`.
///
/// Missing inputs yield missing outputs without resetting the running state. Output
/// starts once `span` observations have been absorbed.
pub fn ewm_mean(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if span == 0 {
        return out;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut state: Option<f64> = None;
    let mut seen = 0usize;
    for (t, &x) in values.iter().enumerate() {
        if x.is_nan() {
            continue;
        }
        let next = match state {
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
            None => x,
        };
        state = Some(next);
        seen += 1;
        if seen >= span {
            out[t] = next;
        }
    }
    out
}
