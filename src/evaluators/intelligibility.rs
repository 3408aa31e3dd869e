//! Intelligibility scoring via automatic speech recognition.
//!
//! Transcribes every working file and pools a character error rate over the
//! whole id set: total edit distance divided by total reference characters,
//! so long utterances weigh more than short ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use edit_distance::edit_distance;
use tracing::warn;

use crate::error::Result;
use crate::evaluators::{EvalContext, Evaluator, Metric};

/// Speech recognizer. Returns one hypothesis per input path; a failed
/// utterance comes back as an empty string rather than an error.
pub trait Transcriber: Send {
    /// Short name used as the metric prefix, e.g. `whisper` -> `whisper_cer`.
    fn name(&self) -> &str;

    fn transcribe(&mut self, paths: &[PathBuf]) -> Result<Vec<String>>;
}

fn default_transcriber() -> Option<Box<dyn Transcriber>> {
    #[cfg(feature = "asr")]
    {
        whisper::WhisperTranscriber::from_env()
            .map(|t| Box::new(t) as Box<dyn Transcriber>)
    }
    #[cfg(not(feature = "asr"))]
    {
        None
    }
}

pub struct IntelligibilityEvaluator {
    ctx: Arc<EvalContext>,
    transcriber: Option<Box<dyn Transcriber>>,
}

impl IntelligibilityEvaluator {
    pub fn new(ctx: Arc<EvalContext>) -> Self {
        Self::with_transcriber(ctx, default_transcriber())
    }

    pub fn with_transcriber(
        ctx: Arc<EvalContext>,
        transcriber: Option<Box<dyn Transcriber>>,
    ) -> Self {
        Self { ctx, transcriber }
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pooled character error rate; `None` when there are no reference
/// characters to count against.
fn pooled_cer(pairs: &[(String, String)]) -> Option<f64> {
    let mut distance = 0usize;
    let mut chars = 0usize;
    for (reference, hypothesis) in pairs {
        distance += edit_distance(reference, hypothesis);
        chars += reference.chars().count();
    }
    (chars > 0).then(|| distance as f64 / chars as f64)
}

impl Evaluator for IntelligibilityEvaluator {
    fn info(&self) -> String {
        "intelligibility evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        let Some(transcriber) = self.transcriber.as_mut() else {
            warn!("no transcription backend available, intelligibility is not measured");
            return Ok(Vec::new());
        };

        let mut paths = Vec::new();
        let mut references = Vec::new();
        for entry in &self.ctx.entries {
            if let Some(path) = self.ctx.working_audio(&self.ctx.generated_dir, &entry.id)? {
                paths.push(path);
                references.push(normalize_text(&entry.text));
            }
        }
        if paths.is_empty() {
            warn!("no utterances survived for intelligibility, metric omitted");
            return Ok(Vec::new());
        }

        let hypotheses = transcriber.transcribe(&paths)?;
        let pairs: Vec<(String, String)> = references
            .into_iter()
            .zip(hypotheses.into_iter().map(|h| normalize_text(&h)))
            .collect();

        match pooled_cer(&pairs) {
            Some(cer) => Ok(vec![Metric::new(format!("{}_cer", transcriber.name()), cer)]),
            None => {
                warn!("reference texts are empty, intelligibility metric omitted");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(feature = "asr")]
mod whisper {
    use std::path::{Path, PathBuf};

    use tracing::{info, warn};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext};

    use crate::audio::read_wav;
    use crate::error::{EvalError, Result};

    use super::Transcriber;

    /// Environment variable pointing at a ggml whisper model file.
    pub const MODEL_ENV: &str = "SPEECH_EVAL_WHISPER_MODEL";

    pub struct WhisperTranscriber {
        ctx: WhisperContext,
    }

    impl WhisperTranscriber {
        pub fn from_env() -> Option<Self> {
            let path = match std::env::var(MODEL_ENV) {
                Ok(path) => path,
                Err(_) => {
                    warn!("{MODEL_ENV} is not set, whisper backend unavailable");
                    return None;
                }
            };
            match Self::new(Path::new(&path)) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("failed to load whisper model from {path}: {e}");
                    None
                }
            }
        }

        pub fn new(model_path: &Path) -> Result<Self> {
            info!("loading whisper model from {}", model_path.display());
            let ctx = WhisperContext::new(&model_path.to_string_lossy()).map_err(|e| {
                EvalError::Processing {
                    id: String::new(),
                    reason: format!("failed to load whisper model: {e}"),
                }
            })?;
            Ok(Self { ctx })
        }

        fn transcribe_one(&self, path: &Path) -> Result<String> {
            let audio = read_wav(path)?;
            let mut state = self.ctx.create_state().map_err(|e| EvalError::Processing {
                id: String::new(),
                reason: format!("failed to create whisper state: {e}"),
            })?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_language(Some("en"));
            state
                .full(params, &audio.samples)
                .map_err(|e| EvalError::Processing {
                    id: String::new(),
                    reason: format!("whisper inference failed: {e}"),
                })?;

            let segments = state.full_n_segments().map_err(|e| EvalError::Processing {
                id: String::new(),
                reason: format!("failed to read whisper segments: {e}"),
            })?;
            let mut text = String::new();
            for i in 0..segments {
                if let Ok(segment) = state.full_get_segment_text(i) {
                    text.push_str(&segment);
                }
            }
            Ok(text)
        }
    }

    impl Transcriber for WhisperTranscriber {
        fn name(&self) -> &str {
            "whisper"
        }

        fn transcribe(&mut self, paths: &[PathBuf]) -> Result<Vec<String>> {
            let mut hypotheses = Vec::with_capacity(paths.len());
            for path in paths {
                match self.transcribe_one(path) {
                    Ok(text) => hypotheses.push(text),
                    Err(e) => {
                        warn!("transcription of {} failed: {e}", path.display());
                        hypotheses.push(String::new());
                    }
                }
            }
            Ok(hypotheses)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use tempfile::tempdir;

    use crate::audio::write_wav;
    use crate::manifest::ManifestEntry;

    /// Looks hypotheses up by file stem.
    struct TableTranscriber {
        table: HashMap<String, String>,
    }

    impl Transcriber for TableTranscriber {
        fn name(&self) -> &str {
            "fake"
        }
        fn transcribe(&mut self, paths: &[PathBuf]) -> Result<Vec<String>> {
            Ok(paths
                .iter()
                .map(|p| {
                    let stem = p.file_stem().unwrap().to_string_lossy();
                    self.table.get(stem.as_ref()).cloned().unwrap_or_default()
                })
                .collect())
        }
    }

    fn write_silence(dir: &Path, id: &str) {
        write_wav(&dir.join(format!("{id}.wav")), &vec![0.0; 1600], 16000).unwrap();
    }

    fn context(dir: &Path, entries: Vec<ManifestEntry>, ignore_errors: bool) -> Arc<EvalContext> {
        Arc::new(EvalContext {
            entries,
            generated_dir: dir.to_path_buf(),
            reference_dir: None,
            mapping: None,
            ignore_errors,
            jobs: 2,
        })
    }

    fn entry(id: &str, text: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn exact_transcripts_give_zero_cer() {
        let dir = tempdir().unwrap();
        write_silence(dir.path(), "a");
        write_silence(dir.path(), "b");
        let table = HashMap::from([
            ("a".to_string(), "hello world".to_string()),
            ("b".to_string(), "good morning".to_string()),
        ]);
        let ctx = context(
            dir.path(),
            vec![entry("a", "hello world"), entry("b", "good morning")],
            false,
        );
        let mut eval = IntelligibilityEvaluator::with_transcriber(
            ctx,
            Some(Box::new(TableTranscriber { table })),
        );
        let metrics = eval.metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "fake_cer");
        assert_eq!(metrics[0].value, 0.0);
    }

    #[test]
    fn cer_pools_by_reference_length() {
        let dir = tempdir().unwrap();
        write_silence(dir.path(), "a");
        write_silence(dir.path(), "b");
        // "abcd" -> "abce": 1 edit over 4 chars; "xy" -> "xy": 0 over 2.
        // Pooled: 1 / 6, not the per-file mean of (0.25, 0.0).
        let table = HashMap::from([
            ("a".to_string(), "abce".to_string()),
            ("b".to_string(), "xy".to_string()),
        ]);
        let ctx = context(dir.path(), vec![entry("a", "abcd"), entry("b", "xy")], false);
        let mut eval = IntelligibilityEvaluator::with_transcriber(
            ctx,
            Some(Box::new(TableTranscriber { table })),
        );
        let metrics = eval.metrics().unwrap();
        assert!((metrics[0].value - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn case_and_spacing_are_normalized_before_scoring() {
        assert_eq!(normalize_text("  Hello   WORLD "), "hello world");
    }

    #[test]
    fn missing_working_file_follows_the_ignore_policy() {
        let dir = tempdir().unwrap();
        write_silence(dir.path(), "a");
        let table = HashMap::from([("a".to_string(), "hi".to_string())]);
        let entries = vec![entry("a", "hi"), entry("ghost", "boo")];

        let ctx = context(dir.path(), entries.clone(), false);
        let mut eval = IntelligibilityEvaluator::with_transcriber(
            ctx,
            Some(Box::new(TableTranscriber {
                table: table.clone(),
            })),
        );
        assert!(eval.metrics().is_err());

        let ctx = context(dir.path(), entries, true);
        let mut eval = IntelligibilityEvaluator::with_transcriber(
            ctx,
            Some(Box::new(TableTranscriber { table })),
        );
        let metrics = eval.metrics().unwrap();
        assert_eq!(metrics[0].value, 0.0);
    }

    #[test]
    fn no_backend_yields_no_metrics() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path(), vec![entry("a", "hi")], false);
        let mut eval = IntelligibilityEvaluator::with_transcriber(ctx, None);
        assert!(eval.metrics().unwrap().is_empty());
    }
}
