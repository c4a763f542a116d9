// Least-squares trend lines over aggregated series

/// Slope and intercept of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Ordinary least squares over `(x, y)` samples. `None` for no samples.
    /// A zero denominator (one sample, or all x equal) gives slope 0.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let (mut n, mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (x, y) in points {
            n += 1.0;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_x2 += x * x;
        }
        if n == 0.0 {
            return None;
        }

        let denominator = n * sum_x2 - sum_x * sum_x;
        let slope = if denominator == 0.0 {
            0.0
        } else {
            (n * sum_xy - sum_x * sum_y) / denominator
        };
        let intercept = (sum_y - slope * sum_x) / n;
        Some(Self { slope, intercept })
    }
}

/// Trend of `values` fitted against their indices, evaluated at each index.
pub fn trend_line(values: &[f64]) -> Vec<f64> {
    let points = values.iter().enumerate().map(|(i, y)| (i as f64, *y));
    match LinearFit::from_points(points) {
        Some(fit) => (0..values.len()).map(|i| fit.at(i as f64)).collect(),
        None => Vec::new(),
    }
}

/// Like [`trend_line`] for bucket-aligned values: empty buckets are left out
/// of the fit but still get a trend value at their index. The output always
/// has one slot per input; it is all `None` when no bucket holds a value.
pub fn aligned_trend_line(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let points = values
        .iter()
        .enumerate()
        .filter_map(|(i, y)| y.map(|y| (i as f64, y)));
    match LinearFit::from_points(points) {
        Some(fit) => (0..values.len()).map(|i| Some(fit.at(i as f64))).collect(),
        None => vec![None; values.len()],
    }
}
