//! Perceptual quality scoring via MOS prediction models.
//!
//! Each registered predictor scores every working file and contributes one
//! `<name>_mos` metric, the unweighted mean over utterances.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::evaluators::{EvalContext, Evaluator, Metric};
use crate::stats::RunningStats;

/// A mean-opinion-score predictor.
pub trait MosPredictor: Send {
    /// Short name used as the metric prefix, e.g. `utmos` -> `utmos_mos`.
    fn name(&self) -> &str;

    fn predict(&mut self, path: &Path) -> Result<f64>;
}

fn default_predictors() -> Vec<Box<dyn MosPredictor>> {
    // No in-process MOS backend ships with the crate yet.
    Vec::new()
}

pub struct QualityEvaluator {
    ctx: Arc<EvalContext>,
    predictors: Vec<Box<dyn MosPredictor>>,
}

impl QualityEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Self {
        Self::with_predictors(ctx, default_predictors())
    }

    pub fn with_predictors(
        ctx: Arc<EvalContext>,
        predictors: Vec<Box<dyn MosPredictor>>,
    ) -> Self {
        Self { ctx, predictors }
    }
}

impl Evaluator for QualityEvaluator {
    fn info(&self) -> String {
        "quality evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        if self.predictors.is_empty() {
            warn!("no MOS prediction backend available, quality is not measured");
            return Ok(Vec::new());
        }

        let mut metrics = Vec::new();
        for predictor in &mut self.predictors {
            let mut stats = RunningStats::default();
            for entry in &self.ctx.entries {
                let Some(path) = self.ctx.working_audio(&self.ctx.generated_dir, &entry.id)?
                else {
                    continue;
                };
                match predictor.predict(&path) {
                    Ok(score) => stats.push(score),
                    Err(e) if self.ctx.ignore_errors => {
                        warn!("{} scoring failed for {}: {e}", predictor.name(), entry.id);
                    }
                    Err(e) => return Err(e),
                }
            }
            match stats.mean() {
                Some(mean) => {
                    metrics.push(Metric::new(format!("{}_mos", predictor.name()), mean));
                }
                None => warn!(
                    "no utterances survived for {} quality, metric omitted",
                    predictor.name()
                ),
            }
        }
        Ok(metrics)
    }
}
