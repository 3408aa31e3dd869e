//! End-to-end evaluation run.
//!
//! Reconciles the manifest, materializes working audio for the generated
//! and reference sides, builds the selected scorers and dispatches them,
//! then logs the metrics and optionally writes them to a YAML report.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EvalError, Result};
use crate::evaluators::{
    validate_selection, CombinedEvaluator, EvalContext, Evaluator, Metric, SystemType,
};
use crate::manifest::{reconcile, sort_ids_by_audio_size, ReconcileOptions};
use crate::materialize::{materialize, WORKING_SAMPLE_RATE};

/// Everything one evaluation run needs.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Manifest of `<id> <text>` lines.
    pub manifest: PathBuf,
    /// Directory of synthesized audio under evaluation.
    pub generated_audio: PathBuf,
    /// Directory of original audio, required by reference-based scorers.
    pub original_audio: Option<PathBuf>,
    /// Optional `<id> <reference-id>` mapping file.
    pub mapping: Option<PathBuf>,
    pub system_type: SystemType,
    /// Explicit scorer list, required for (and only for) `custom`.
    pub evaluators: Option<Vec<String>>,
    /// Drop missing or failing utterances instead of aborting.
    pub ignore_missing: bool,
    /// Optional YAML report path.
    pub out: Option<PathBuf>,
    /// Worker pool width for conversion and scoring.
    pub jobs: usize,
    /// Extra key/value pairs copied verbatim into the report.
    pub extra: BTreeMap<String, String>,
}

/// Resolve the scorer list for a run: the type table for standard
/// paradigms, the explicit list for `custom`.
pub fn select_evaluators(config: &EvalConfig) -> Result<Vec<String>> {
    let names: Vec<String> = match config.system_type.default_evaluators() {
        Some(defaults) => {
            if config.evaluators.is_some() {
                return Err(EvalError::Config(
                    "an explicit evaluator list is only valid with the custom system type"
                        .to_string(),
                ));
            }
            defaults.iter().map(|s| s.to_string()).collect()
        }
        None => config.evaluators.clone().ok_or_else(|| {
            EvalError::Config(
                "the custom system type requires an explicit evaluator list".to_string(),
            )
        })?,
    };
    if matches!(
        config.system_type,
        SystemType::ZeroTts | SystemType::ZeroVc
    ) && config.mapping.is_none()
    {
        return Err(EvalError::Config(
            "the zero-tts and zero-vc system types require a mapping file".to_string(),
        ));
    }
    validate_selection(&names, config.original_audio.is_some())?;
    Ok(names)
}

/// Run a full evaluation and return the metrics in scorer order.
pub async fn run_evaluation(config: &EvalConfig) -> Result<Vec<Metric>> {
    // fail on configuration before touching any audio
    let names = select_evaluators(config)?;

    let opts = ReconcileOptions {
        ignore_missing: config.ignore_missing,
        ..Default::default()
    };
    let (entries, mapping) = reconcile(
        &config.manifest,
        &config.generated_audio,
        config.mapping.as_deref(),
        config.original_audio.as_deref(),
        &opts,
    )?;
    info!("{} utterances to evaluate", entries.len());
    if entries.is_empty() {
        warn!("no utterances survived reconciliation, every metric will be omitted");
    }

    // schedule the slowest conversions first
    let entries = sort_ids_by_audio_size(&config.generated_audio, entries);
    let generated_ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
    let reference_ids: Vec<String> = match &mapping {
        Some(mapping) => {
            let mut seen = std::collections::HashSet::new();
            entries
                .iter()
                .filter_map(|e| mapping.get(&e.id))
                .filter(|id| seen.insert(id.to_string()))
                .cloned()
                .collect()
        }
        None => generated_ids.clone(),
    };

    let generated_working = materialize(
        Some(&config.generated_audio),
        &generated_ids,
        WORKING_SAMPLE_RATE,
        config.jobs,
    )
    .await?
    .ok_or_else(|| EvalError::Config("a generated audio directory is required".to_string()))?;
    let reference_working = materialize(
        config.original_audio.as_deref(),
        &reference_ids,
        WORKING_SAMPLE_RATE,
        config.jobs,
    )
    .await?;

    let ctx = Arc::new(EvalContext {
        entries,
        generated_dir: generated_working.path().to_path_buf(),
        reference_dir: reference_working.as_ref().map(|w| w.path().to_path_buf()),
        mapping,
        ignore_errors: config.ignore_missing,
        jobs: config.jobs,
    });

    let mut combined = CombinedEvaluator::from_names(&names, &ctx)?;
    let metrics = combined.metrics()?;
    for metric in &metrics {
        info!("{}: {:.4}", metric.name, metric.value);
    }

    if let Some(out) = &config.out {
        write_report(out, &metrics, &config.extra)?;
        info!("report written to {}", out.display());
    }
    Ok(metrics)
}

#[derive(Serialize)]
struct Report<'a> {
    metrics: BTreeMap<&'a str, f64>,
    date: String,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, String>,
}

fn write_report(
    path: &std::path::Path,
    metrics: &[Metric],
    extra: &BTreeMap<String, String>,
) -> Result<()> {
    let report = Report {
        metrics: metrics.iter().map(|m| (m.name.as_str(), m.value)).collect(),
        date: chrono::Utc::now().to_rfc3339(),
        extra,
    };
    let file = File::create(path)?;
    serde_yaml::to_writer(file, &report)?;
    Ok(())
}
