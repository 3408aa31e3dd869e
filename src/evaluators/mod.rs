//! Scorer registry and dispatch.
//!
//! A fixed catalogue of named scorers, a selection policy mapping a system
//! type to a scorer subset, and a dispatcher that runs each selected scorer
//! in order, timing it and concatenating its metrics. Registry and type
//! tables are immutable process-wide data.

pub mod f0_accuracy;
pub mod f0_stats;
pub mod intelligibility;
pub mod perturbation;
pub mod quality;
pub mod similarity;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::error::{EvalError, Result};
use crate::manifest::{ManifestEntry, ReferenceMapping};

/// One named scalar result.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Everything a scorer needs: the canonical id set, the working audio
/// directories, the reference mapping and the failure policy.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub entries: Vec<ManifestEntry>,
    pub generated_dir: PathBuf,
    pub reference_dir: Option<PathBuf>,
    pub mapping: Option<ReferenceMapping>,
    pub ignore_errors: bool,
    pub jobs: usize,
}

impl EvalContext {
    /// Reference id for a generated id; identity when no mapping was given.
    pub fn reference_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.mapping
            .as_ref()
            .and_then(|m| m.get(id))
            .map(String::as_str)
            .unwrap_or(id)
    }

    pub fn require_reference_dir(&self, scorer: &str) -> Result<&Path> {
        self.reference_dir.as_deref().ok_or_else(|| {
            EvalError::Config(format!(
                "original audio is required for {scorer} evaluation"
            ))
        })
    }

    /// Resolve a working file, applying the ignore-errors policy when it is
    /// absent: `Ok(None)` drops the utterance, `Err` aborts the run.
    pub fn working_audio(&self, dir: &Path, id: &str) -> Result<Option<PathBuf>> {
        match crate::audio::resolve_audio(dir, id) {
            Some(path) => Ok(Some(path)),
            None if self.ignore_errors => {
                warn!("{id} has no working audio in {}, skipping", dir.display());
                Ok(None)
            }
            None => Err(EvalError::Processing {
                id: id.to_string(),
                reason: format!("no working audio in {}", dir.display()),
            }),
        }
    }
}

/// A scorer: produces an ordered sequence of metrics for the whole id set.
pub trait Evaluator {
    /// Human-readable description for logs.
    fn info(&self) -> String;

    /// Run the scorer over the canonical id set.
    fn metrics(&mut self) -> Result<Vec<Metric>>;
}

impl std::fmt::Debug for dyn Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Evaluator({})", self.info())
    }
}

/// Generation paradigm under evaluation; selects the scorer subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SystemType {
    Tts,
    ZeroTts,
    ZeroVc,
    Vocoder,
    Custom,
}

impl SystemType {
    /// Scorer names for this paradigm, `None` for `Custom`.
    pub fn default_evaluators(&self) -> Option<&'static [&'static str]> {
        match self {
            SystemType::Tts => Some(&["intelligibility", "quality", "f0-stats"]),
            SystemType::ZeroTts | SystemType::ZeroVc => {
                Some(&["intelligibility", "quality", "similarity"])
            }
            SystemType::Vocoder => Some(&[
                "intelligibility",
                "quality",
                "f0-accuracy",
                "perturbation",
            ]),
            SystemType::Custom => None,
        }
    }
}

/// Every scorer name known to the registry.
pub const EVALUATOR_NAMES: [&str; 6] = [
    "intelligibility",
    "quality",
    "similarity",
    "f0-stats",
    "f0-accuracy",
    "perturbation",
];

fn requires_reference(name: &str) -> bool {
    matches!(name, "similarity" | "f0-accuracy")
}

/// Fail-fast validation of a scorer selection. Runs before any scorer (and
/// therefore any model) is constructed.
pub fn validate_selection(names: &[String], has_reference: bool) -> Result<()> {
    for name in names {
        if !EVALUATOR_NAMES.contains(&name.as_str()) {
            return Err(EvalError::Config(format!(
                "unknown evaluator '{name}', expected one of: {}",
                EVALUATOR_NAMES.join(", ")
            )));
        }
        if requires_reference(name) && !has_reference {
            return Err(EvalError::Config(format!(
                "evaluator '{name}' requires an original audio directory"
            )));
        }
    }
    Ok(())
}

/// Construct one scorer by registry name.
pub fn build_evaluator(name: &str, ctx: &Arc<EvalContext>) -> Result<Box<dyn Evaluator>> {
    match name {
        "intelligibility" => Ok(Box::new(intelligibility::IntelligibilityEvaluator::new(
            ctx.clone(),
        ))),
        "quality" => Ok(Box::new(quality::QualityEvaluator::new(ctx.clone()))),
        "similarity" => Ok(Box::new(similarity::SimilarityEvaluator::new(ctx.clone())?)),
        "f0-stats" => Ok(Box::new(f0_stats::F0StatsEvaluator::new(ctx.clone()))),
        "f0-accuracy" => Ok(Box::new(f0_accuracy::F0AccuracyEvaluator::new(
            ctx.clone(),
        )?)),
        "perturbation" => Ok(Box::new(perturbation::PerturbationEvaluator::new(
            ctx.clone(),
        ))),
        other => Err(EvalError::Config(format!("unknown evaluator '{other}'"))),
    }
}

/// Runs a list of scorers in order and concatenates their metrics.
///
/// Each scorer's invocation is isolated: under ignore-errors a failing
/// scorer is logged and the remaining scorers still run; otherwise the
/// failure aborts the run.
pub struct CombinedEvaluator {
    evaluators: Vec<Box<dyn Evaluator>>,
    ignore_errors: bool,
}

impl CombinedEvaluator {
    pub fn from_names(names: &[String], ctx: &Arc<EvalContext>) -> Result<Self> {
        validate_selection(names, ctx.reference_dir.is_some())?;
        let evaluators = names
            .iter()
            .map(|name| build_evaluator(name, ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            evaluators,
            ignore_errors: ctx.ignore_errors,
        })
    }

    pub fn with_evaluators(evaluators: Vec<Box<dyn Evaluator>>, ignore_errors: bool) -> Self {
        Self {
            evaluators,
            ignore_errors,
        }
    }
}

impl Evaluator for CombinedEvaluator {
    fn info(&self) -> String {
        "combined evaluation".to_string()
    }

    fn metrics(&mut self) -> Result<Vec<Metric>> {
        let mut metrics = Vec::new();
        for evaluator in &mut self.evaluators {
            let start = Instant::now();
            match evaluator.metrics() {
                Ok(batch) => metrics.extend(batch),
                Err(e) if self.ignore_errors => {
                    error!("{} failed: {e}", evaluator.info());
                }
                Err(e) => return Err(e),
            }
            info!(
                "it took {:.2}s to run {}",
                start.elapsed().as_secs_f64(),
                evaluator.info()
            );
        }
        Ok(metrics)
    }
}

/// Run `f` over `items` on a bounded pool of worker threads, one contiguous
/// fold per worker. A fold that panics contributes nothing; per-item errors
/// are values returned by `f`.
pub(crate) fn run_folds<T, R, F>(items: Vec<T>, jobs: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let jobs = jobs.max(1).min(items.len());
    let fold_size = items.len().div_ceil(jobs);

    let mut folds: Vec<Vec<T>> = Vec::with_capacity(jobs);
    let mut iter = items.into_iter();
    loop {
        let fold: Vec<T> = iter.by_ref().take(fold_size).collect();
        if fold.is_empty() {
            break;
        }
        folds.push(fold);
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = folds
            .into_iter()
            .map(|fold| {
                let f = &f;
                scope.spawn(move || fold.into_iter().map(f).collect::<Vec<R>>())
            })
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(fold_results) => results.extend(fold_results),
                Err(_) => warn!("worker fold panicked, its results are dropped"),
            }
        }
        results
    })
}
