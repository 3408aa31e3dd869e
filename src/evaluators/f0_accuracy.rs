//! Pitch reconstruction accuracy against reference audio.
//!
//! Compares the pitch track of each generated utterance with its reference
//! counterpart over the frames where both are voiced. Reports fine and
//! gross log-F0 error rates and the log-F0 correlation, each pooled over
//! files weighted by the number of jointly voiced frames. A file with no
//! jointly voiced frames contributes to nothing.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::audio::read_wav;
use crate::error::Result;
use crate::evaluators::{run_folds, EvalContext, Evaluator, Metric};
use crate::pitch;
use crate::stats::WeightedMean;

/// Absolute log-F0 deviation separating fine from gross errors.
const GROSS_THRESHOLD: f64 = 0.2;

#[derive(Debug, Default)]
struct FileAccuracy {
    fine: WeightedMean,
    gross: WeightedMean,
    correlation: WeightedMean,
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    let denom = (var_x * var_y).sqrt();
    if denom < f64::EPSILON {
        return None;
    }
    Some(cov / denom)
}

fn compare_tracks(generated: &Path, reference: &Path) -> Result<FileAccuracy> {
    let generated_audio = read_wav(generated)?;
    let reference_audio = read_wav(reference)?;
    let generated_f0 = pitch::track(&generated_audio.samples, generated_audio.sample_rate);
    let reference_f0 = pitch::track(&reference_audio.samples, reference_audio.sample_rate);

    let mut gen_log = Vec::new();
    let mut ref_log = Vec::new();
    for (g, r) in generated_f0.iter().zip(&reference_f0) {
        if let (Some(g), Some(r)) = (g, r) {
            gen_log.push(g.ln());
            ref_log.push(r.ln());
        }
    }

    let mut accuracy = FileAccuracy::default();
    let count = gen_log.len() as u64;
    if count == 0 {
        return Ok(accuracy);
    }

    let mut fine = 0u64;
    let mut gross = 0u64;
    for (g, r) in gen_log.iter().zip(&ref_log) {
        let diff = (g - r).abs();
        if diff >= GROSS_THRESHOLD {
            gross += 1;
        } else if diff > 0.0 {
            fine += 1;
        }
    }
    accuracy.fine.add(fine as f64 / count as f64, count);
    accuracy.gross.add(gross as f64 / count as f64, count);
    // correlation is undefined for a flat contour, such files only count
    // toward the error rates
    if let Some(correlation) = pearson(&gen_log, &ref_log) {
        accuracy.correlation.add(correlation, count);
    }
    Ok(accuracy)
}

pub struct F0AccuracyEvaluator {
    ctx: Arc<EvalContext>,
}

impl F0AccuracyEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Result<Self> {
        ctx.require_reference_dir("pitch accuracy")?;
        Ok(Self { ctx })
    }
}

impl Evaluator for F0AccuracyEvaluator {
    fn info(&self) -> String {
        "pitch accuracy evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        let reference_dir = self
            .ctx
            .require_reference_dir("pitch accuracy")?
            .to_path_buf();

        let mut pairs = Vec::new();
        for entry in &self.ctx.entries {
            let Some(generated) = self.ctx.working_audio(&self.ctx.generated_dir, &entry.id)?
            else {
                continue;
            };
            let reference_id = self.ctx.reference_id(&entry.id);
            let Some(reference) = self.ctx.working_audio(&reference_dir, reference_id)? else {
                continue;
            };
            pairs.push((entry.id.clone(), generated, reference));
        }

        let results = run_folds(pairs, self.ctx.jobs, |(id, generated, reference)| {
            (id, compare_tracks(&generated, &reference))
        });

        let mut fine = WeightedMean::new();
        let mut gross = WeightedMean::new();
        let mut correlation = WeightedMean::new();
        for (id, result) in results {
            match result {
                Ok(accuracy) => {
                    fine.merge(&accuracy.fine);
                    gross.merge(&accuracy.gross);
                    correlation.merge(&accuracy.correlation);
                }
                Err(e) if self.ctx.ignore_errors => {
                    warn!("pitch comparison failed for {id}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let mut metrics = Vec::new();
        for (name, pooled) in [
            ("f0_fine_errors", &fine),
            ("f0_gross_errors", &gross),
            ("f0_correlation", &correlation),
        ] {
            match pooled.mean() {
                Some(mean) => metrics.push(Metric::new(name, mean)),
                None => warn!("no jointly voiced frames for {name}, metric omitted"),
            }
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use tempfile::tempdir;

    use crate::audio::write_wav;
    use crate::manifest::ManifestEntry;

    /// A tone whose pitch glides between two frequencies, so the log-F0
    /// contour has nonzero variance and a defined correlation.
    fn write_glide(dir: &Path, id: &str, from: f64, to: f64) {
        let sample_rate = 16000u32;
        let seconds = 1.0;
        let n = (seconds * sample_rate as f64) as usize;
        let mut phase = 0.0f64;
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let progress = i as f64 / n as f64;
                let freq = from + (to - from) * progress;
                phase += 2.0 * std::f64::consts::PI * freq / sample_rate as f64;
                0.4 * phase.sin() as f32
            })
            .collect();
        write_wav(&dir.join(format!("{id}.wav")), &samples, sample_rate).unwrap();
    }

    fn context(generated: &Path, reference: &Path, ids: &[&str]) -> Arc<EvalContext> {
        Arc::new(EvalContext {
            entries: ids
                .iter()
                .map(|id| ManifestEntry {
                    id: id.to_string(),
                    text: String::new(),
                })
                .collect(),
            generated_dir: generated.to_path_buf(),
            reference_dir: Some(reference.to_path_buf()),
            mapping: None,
            ignore_errors: false,
            jobs: 2,
        })
    }

    fn metric(metrics: &[Metric], name: &str) -> f64 {
        metrics
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("{name} missing"))
            .value
    }

    #[test]
    fn self_comparison_is_perfect() {
        let dir = tempdir().unwrap();
        write_glide(dir.path(), "a", 150.0, 250.0);
        let mut eval =
            F0AccuracyEvaluator::new(context(dir.path(), dir.path(), &["a"])).unwrap();
        let metrics = eval.metrics().unwrap();
        assert_eq!(metric(&metrics, "f0_fine_errors"), 0.0);
        assert_eq!(metric(&metrics, "f0_gross_errors"), 0.0);
        assert!((metric(&metrics, "f0_correlation") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn shifted_pitch_registers_gross_errors() {
        let generated = tempdir().unwrap();
        let reference = tempdir().unwrap();
        // ln(320/150) and ln(420/250) both exceed the 0.2 threshold
        write_glide(generated.path(), "a", 320.0, 420.0);
        write_glide(reference.path(), "a", 150.0, 250.0);
        let mut eval =
            F0AccuracyEvaluator::new(context(generated.path(), reference.path(), &["a"]))
                .unwrap();
        let metrics = eval.metrics().unwrap();
        assert!(metric(&metrics, "f0_gross_errors") > 0.9);
        assert!(metric(&metrics, "f0_fine_errors") < 0.1);
    }

    #[test]
    fn unvoiced_files_are_excluded_entirely() {
        let dir = tempdir().unwrap();
        write_wav(&dir.path().join("quiet.wav"), &vec![0.0; 16000], 16000).unwrap();
        let mut eval =
            F0AccuracyEvaluator::new(context(dir.path(), dir.path(), &["quiet"])).unwrap();
        // zero surviving samples: every metric is omitted, not zero or NaN
        assert!(eval.metrics().unwrap().is_empty());
    }

    #[test]
    fn construction_fails_without_reference_dir() {
        let dir = tempdir().unwrap();
        let ctx = Arc::new(EvalContext {
            entries: Vec::new(),
            generated_dir: dir.path().to_path_buf(),
            reference_dir: None,
            mapping: None,
            ignore_errors: false,
            jobs: 1,
        });
        assert!(F0AccuracyEvaluator::new(ctx).is_err());
    }

    #[test]
    fn pearson_of_a_flat_contour_is_undefined() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        let corr = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((corr - 1.0).abs() < 1e-12);
    }
}
