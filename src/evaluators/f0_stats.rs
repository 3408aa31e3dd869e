//! Pitch and loudness variation statistics.
//!
//! Pools log-F0, log-F0 delta and frame RMS over every voiced frame of
//! every utterance and reports their standard deviations. Flat, monotone
//! synthesis shows up as low `log_f0_std`; over-smoothed transitions as low
//! `log_f0_delta_std`.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::audio::read_wav;
use crate::error::Result;
use crate::evaluators::{run_folds, EvalContext, Evaluator, Metric};
use crate::pitch;
use crate::stats::RunningStats;

#[derive(Debug, Default)]
struct FileStats {
    log_f0: RunningStats,
    log_f0_delta: RunningStats,
    loudness: RunningStats,
}

fn process_file(path: &Path) -> Result<FileStats> {
    let audio = read_wav(path)?;
    let mut stats = FileStats::default();

    // compact the voiced frames, deltas are taken across unvoiced gaps
    let voiced: Vec<f64> = pitch::track(&audio.samples, audio.sample_rate)
        .into_iter()
        .flatten()
        .map(f64::ln)
        .collect();
    stats.log_f0.extend(voiced.iter().copied());
    stats
        .log_f0_delta
        .extend(voiced.windows(2).map(|w| w[1] - w[0]));
    stats
        .loudness
        .extend(pitch::frame_rms(&audio.samples));
    Ok(stats)
}

pub struct F0StatsEvaluator {
    ctx: Arc<EvalContext>,
}

impl F0StatsEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Self {
        Self { ctx }
    }
}

impl Evaluator for F0StatsEvaluator {
    fn info(&self) -> String {
        "pitch statistics evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        let mut files = Vec::new();
        for entry in &self.ctx.entries {
            if let Some(path) = self.ctx.working_audio(&self.ctx.generated_dir, &entry.id)? {
                files.push((entry.id.clone(), path));
            }
        }

        let results = run_folds(files, self.ctx.jobs, |(id, path)| {
            (id, process_file(&path))
        });

        let mut log_f0 = RunningStats::new();
        let mut log_f0_delta = RunningStats::new();
        let mut loudness = RunningStats::new();
        for (id, result) in results {
            match result {
                Ok(stats) => {
                    log_f0.merge(&stats.log_f0);
                    log_f0_delta.merge(&stats.log_f0_delta);
                    loudness.merge(&stats.loudness);
                }
                Err(e) if self.ctx.ignore_errors => {
                    warn!("pitch statistics failed for {id}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let mut metrics = Vec::new();
        for (name, stats) in [
            ("log_f0_std", &log_f0),
            ("log_f0_delta_std", &log_f0_delta),
            ("loudness_std", &loudness),
        ] {
            match stats.std() {
                Some(std) => metrics.push(Metric::new(name, std)),
                None => warn!("no frames survived for {name}, metric omitted"),
            }
        }
        Ok(metrics)
    }
}
