//! Objective evaluation of synthesized speech.
//!
//! Reconciles an id/text manifest against directories of generated (and
//! optionally original) audio, converts everything into a normalized
//! working format, and runs a configurable set of scorers producing
//! dataset-level metrics.

pub mod audio;
pub mod error;
pub mod evaluation;
pub mod evaluators;
pub mod manifest;
pub mod materialize;
pub mod pitch;
pub mod stats;

pub use error::{EvalError, Result};
pub use evaluation::{run_evaluation, EvalConfig};
pub use evaluators::{CombinedEvaluator, EvalContext, Evaluator, Metric, SystemType};
pub use manifest::{reconcile, ManifestEntry, ReferenceMapping};
pub use materialize::{materialize, WorkingDir, WORKING_SAMPLE_RATE};
