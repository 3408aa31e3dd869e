//! Speaker similarity scoring.
//!
//! Embeds each generated utterance and its reference counterpart and scores
//! their cosine similarity. Reference embeddings are computed at most once
//! per reference id, however many generated utterances map to it. Each
//! registered extractor contributes one `<name>_secs` metric.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::evaluators::{EvalContext, Evaluator, Metric};
use crate::stats::RunningStats;

/// A speaker embedding extractor.
pub trait EmbeddingExtractor: Send {
    /// Short name used as the metric prefix, e.g. `ecapa` -> `ecapa_secs`.
    fn name(&self) -> &str;

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>>;
}

fn default_extractors() -> Vec<Box<dyn EmbeddingExtractor>> {
    // No in-process speaker embedding backend ships with the crate yet.
    Vec::new()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct SimilarityEvaluator {
    ctx: Arc<EvalContext>,
    extractors: Vec<Box<dyn EmbeddingExtractor>>,
}

impl SimilarityEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Result<Self> {
        Self::with_extractors(ctx, default_extractors())
    }

    pub fn with_extractors(
        ctx: Arc<EvalContext>,
        extractors: Vec<Box<dyn EmbeddingExtractor>>,
    ) -> Result<Self> {
        ctx.require_reference_dir("similarity")?;
        Ok(Self { ctx, extractors })
    }

    fn score_extractor(
        ctx: &EvalContext,
        extractor: &mut dyn EmbeddingExtractor,
        reference_dir: &Path,
    ) -> Result<Option<f64>> {
        let mut reference_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        let mut stats = RunningStats::default();

        for entry in &ctx.entries {
            let reference_id = ctx.reference_id(&entry.id).to_string();
            if !reference_embeddings.contains_key(&reference_id) {
                let Some(reference_path) = ctx.working_audio(reference_dir, &reference_id)?
                else {
                    continue;
                };
                match extractor.embed(&reference_path) {
                    Ok(embedding) => {
                        reference_embeddings.insert(reference_id.clone(), embedding);
                    }
                    Err(e) if ctx.ignore_errors => {
                        warn!("embedding reference {reference_id} failed: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let Some(generated_path) = ctx.working_audio(&ctx.generated_dir, &entry.id)? else {
                continue;
            };
            let generated_embedding = match extractor.embed(&generated_path) {
                Ok(embedding) => embedding,
                Err(e) if ctx.ignore_errors => {
                    warn!("embedding {} failed: {e}", entry.id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(reference_embedding) = reference_embeddings.get(&reference_id) {
                stats.push(cosine_similarity(&generated_embedding, reference_embedding));
            }
        }
        Ok(stats.mean())
    }
}

impl Evaluator for SimilarityEvaluator {
    fn info(&self) -> String {
        "speaker similarity evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        if self.extractors.is_empty() {
            warn!("no speaker embedding backend available, similarity is not measured");
            return Ok(Vec::new());
        }
        let reference_dir = self.ctx.require_reference_dir("similarity")?.to_path_buf();

        let mut metrics = Vec::new();
        for extractor in &mut self.extractors {
            match Self::score_extractor(&self.ctx, extractor.as_mut(), &reference_dir)? {
                Some(mean) => {
                    metrics.push(Metric::new(format!("{}_secs", extractor.name()), mean));
                }
                None => warn!(
                    "no utterances survived for {} similarity, metric omitted",
                    extractor.name()
                ),
            }
        }
        Ok(metrics)
    }
}
