//! Incremental accumulation of dataset-level statistics.
//!
//! Scorers that pool measurements over many frames across many files return
//! one accumulator per worker fold; the folds are merged and reduced here,
//! never holding the raw samples. Merging is commutative and associative, so
//! fold assignment does not affect the result.

/// Online mean/standard-deviation accumulator over pooled samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1;
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for v in values {
            self.push(v);
        }
    }

    /// Combine with the accumulator of another fold.
    pub fn merge(&mut self, other: &RunningStats) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.count += other.count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of the pooled samples, `None` when no sample survived.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    /// Population standard deviation, `None` when no sample survived.
    ///
    /// `sumsq/n - mean^2` can round to a tiny negative value for
    /// near-constant data; that residue is clamped to zero before the sqrt.
    pub fn std(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self.sum_sq / self.count as f64 - mean * mean;
        Some(var.max(0.0).sqrt())
    }
}

/// Count-weighted mean for per-file ratio metrics.
///
/// Each file contributes its per-file average weighted by the number of
/// valid underlying samples. A file with zero valid samples must not be
/// added at all; it is excluded from numerator and denominator alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedMean {
    weighted_sum: f64,
    total_weight: u64,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file's average with its valid-sample count as weight.
    /// Zero-weight contributions are ignored.
    pub fn add(&mut self, value: f64, weight: u64) {
        if weight == 0 {
            return;
        }
        self.weighted_sum += value * weight as f64;
        self.total_weight += weight;
    }

    pub fn merge(&mut self, other: &WeightedMean) {
        self.weighted_sum += other.weighted_sum;
        self.total_weight += other.total_weight;
    }

    pub fn is_empty(&self) -> bool {
        self.total_weight == 0
    }

    pub fn mean(&self) -> Option<f64> {
        if self.total_weight == 0 {
            return None;
        }
        Some(self.weighted_sum / self.total_weight as f64)
    }
}
