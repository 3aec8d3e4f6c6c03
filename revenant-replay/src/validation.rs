/// One sample of a replayed metric: what replay aimed for and what the
/// reproduction's own `/proc` capture actually observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_millis: i64,
    pub target: f64,
    pub actual: f64,
}

/// Accumulates `{t, target, actual}` triples for one metric family and
/// computes acceptance statistics on demand.
#[derive(Debug, Clone, Default)]
pub struct ValidationCollector {
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationStats {
    pub rmse: f64,
    pub mae: f64,
    pub within_5_percent: f64,
    pub within_10_percent: f64,
    pub correlation: f64,
    pub peak_error: f64,
}

impl ValidationStats {
    /// The acceptance bands below; any single miss fails the whole
    /// family.
    pub fn passes(&self) -> bool {
        self.rmse <= 5.0
            && self.correlation >= 0.95
            && self.within_5_percent >= 0.80
            && self.within_10_percent >= 0.95
            && self.peak_error <= 10.0
    }
}

impl ValidationCollector {
    pub fn new() -> Self {
        Self { samples: Vec::new() }
    }

    pub fn record(&mut self, timestamp_millis: i64, target: f64, actual: f64) {
        self.samples.push(Sample { timestamp_millis, target, actual });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> Option<ValidationStats> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;

        let mut sum_sq_error = 0.0;
        let mut sum_abs_error = 0.0;
        let mut within_5 = 0usize;
        let mut within_10 = 0usize;

        for sample in &self.samples {
            let error = sample.actual - sample.target;
            sum_sq_error += error * error;
            sum_abs_error += error.abs();

            let (w5, w10) = if sample.target == 0.0 {
                (sample.actual == 0.0, sample.actual == 0.0)
            } else {
                let relative = (error / sample.target).abs();
                (relative <= 0.05, relative <= 0.10)
            };
            if w5 {
                within_5 += 1;
            }
            if w10 {
                within_10 += 1;
            }
        }

        let rmse = (sum_sq_error / n).sqrt();
        let mae = sum_abs_error / n;
        let correlation = pearson_correlation(&self.samples);

        let max_target = self.samples.iter().map(|s| s.target).fold(f64::MIN, f64::max);
        let max_actual = self.samples.iter().map(|s| s.actual).fold(f64::MIN, f64::max);
        let peak_error = if max_target == 0.0 { 0.0 } else { (max_actual - max_target).abs() / max_target * 100.0 };

        Some(ValidationStats {
            rmse,
            mae,
            within_5_percent: within_5 as f64 / n,
            within_10_percent: within_10 as f64 / n,
            correlation,
            peak_error,
        })
    }
}

fn pearson_correlation(samples: &[Sample]) -> f64 {
    let n = samples.len() as f64;
    if n < 2.0 {
        return 1.0;
    }
    let mean_target = samples.iter().map(|s| s.target).sum::<f64>() / n;
    let mean_actual = samples.iter().map(|s| s.actual).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_target = 0.0;
    let mut var_actual = 0.0;
    for sample in samples {
        let dt = sample.target - mean_target;
        let da = sample.actual - mean_actual;
        cov += dt * da;
        var_target += dt * dt;
        var_actual += da * da;
    }

    let denom = (var_target * var_actual).sqrt();
    if denom == 0.0 {
        1.0
    } else {
        cov / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_reproduction_passes_every_band() {
        let mut collector = ValidationCollector::new();
        for (i, target) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            collector.record(i as i64 * 1000, target, target);
        }
        let stats = collector.stats().unwrap();
        assert_eq!(stats.rmse, 0.0);
        assert_eq!(stats.correlation, 1.0);
        assert!(stats.passes());
    }

    #[test]
    fn zero_target_counts_as_within_tolerance_only_when_actual_is_also_zero() {
        let mut collector = ValidationCollector::new();
        collector.record(0, 0.0, 0.0);
        collector.record(1000, 0.0, 1.0);
        let stats = collector.stats().unwrap();
        assert_eq!(stats.within_5_percent, 0.5);
    }

    #[test]
    fn a_large_miss_fails_the_rmse_band() {
        let mut collector = ValidationCollector::new();
        for i in 0..10 {
            collector.record(i * 1000, 50.0, 10.0);
        }
        let stats = collector.stats().unwrap();
        assert!(!stats.passes());
    }
}
