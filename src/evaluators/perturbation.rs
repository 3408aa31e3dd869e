//! Cycle-to-cycle pitch and amplitude perturbation.
//!
//! Jitter is the mean relative deviation between pitch periods of adjacent
//! voiced frames; shimmer is the mean absolute dB ratio between their peak
//! amplitudes. Excessive values indicate a rough or unstable vocoder;
//! near-zero values indicate over-smoothed, buzzy output. Per-file values
//! are averaged over the id set.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::audio::read_wav;
use crate::error::Result;
use crate::evaluators::{run_folds, EvalContext, Evaluator, Metric};
use crate::pitch;
use crate::stats::RunningStats;

fn analyze_file(path: &Path) -> Result<Option<(f64, f64)>> {
    let audio = read_wav(path)?;
    let f0 = pitch::track(&audio.samples, audio.sample_rate);
    let peaks = pitch::frame_peak(&audio.samples);

    let mut period_sum = 0.0;
    let mut period_dev_sum = 0.0;
    let mut shimmer_sum = 0.0;
    let mut pair_count = 0u64;

    for (window, peak_window) in f0.windows(2).zip(peaks.windows(2)) {
        let (Some(prev_f0), Some(next_f0)) = (window[0], window[1]) else {
            continue;
        };
        let (prev_peak, next_peak) = (peak_window[0], peak_window[1]);
        if prev_peak <= 0.0 || next_peak <= 0.0 {
            continue;
        }
        let prev_period = 1.0 / prev_f0;
        let next_period = 1.0 / next_f0;
        period_sum += (prev_period + next_period) / 2.0;
        period_dev_sum += (next_period - prev_period).abs();
        shimmer_sum += 20.0 * (next_peak / prev_peak).log10().abs();
        pair_count += 1;
    }

    if pair_count == 0 || period_sum == 0.0 {
        return Ok(None);
    }
    let jitter = period_dev_sum / period_sum;
    let shimmer = shimmer_sum / pair_count as f64;
    Ok(Some((jitter, shimmer)))
}

pub struct PerturbationEvaluator {
    ctx: Arc<EvalContext>,
}

impl PerturbationEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Self {
        Self { ctx }
    }
}

impl Evaluator for PerturbationEvaluator {
    fn info(&self) -> String {
        "perturbation evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        let mut files = Vec::new();
        for entry in &self.ctx.entries {
            if let Some(path) = self.ctx.working_audio(&self.ctx.generated_dir, &entry.id)? {
                files.push((entry.id.clone(), path));
            }
        }

        let results = run_folds(files, self.ctx.jobs, |(id, path)| {
            (id, analyze_file(&path))
        });

        let mut jitter = RunningStats::new();
        let mut shimmer = RunningStats::new();
        for (id, result) in results {
            match result {
                Ok(Some((file_jitter, file_shimmer))) => {
                    jitter.push(file_jitter);
                    shimmer.push(file_shimmer);
                }
                Ok(None) => warn!("{id} has no adjacent voiced frames, excluded"),
                Err(e) if self.ctx.ignore_errors => {
                    warn!("perturbation analysis failed for {id}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let mut metrics = Vec::new();
        match (jitter.mean(), shimmer.mean()) {
            (Some(jitter_mean), Some(shimmer_mean)) => {
                metrics.push(Metric::new("jitter", jitter_mean));
                metrics.push(Metric::new("shimmer", shimmer_mean));
            }
            _ => warn!("no utterances survived for perturbation, metrics omitted"),
        }
        Ok(metrics)
    }
}
