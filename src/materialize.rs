//! Audio materialization into the working format.
//!
//! Converts every referenced file into normalized mono wav at the target
//! sample rate inside a scratch directory. Conversions run on a bounded
//! worker pool; one bad file is logged and left out of the working
//! directory, it never fails the batch. Downstream scorers notice the
//! missing working file and apply their own ignore-errors policy.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::audio::normalize::speech_normalize;
use crate::audio::resample::resample;
use crate::audio::{decode_audio, resolve_audio, write_wav};
use crate::error::{EvalError, Result};

/// Working sample rate shared by every scorer.
pub const WORKING_SAMPLE_RATE: u32 = 16000;

/// Scratch directory of converted audio, exclusively owned by one
/// `materialize` call. The directory tree is removed when the handle is
/// dropped, on every exit path.
#[derive(Debug)]
pub struct WorkingDir {
    dir: TempDir,
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn convert_one(source_dir: &Path, id: &str, target_rate: u32, out_dir: &Path) -> Result<()> {
    let path = resolve_audio(source_dir, id).ok_or_else(|| EvalError::MissingInput {
        id: id.to_string(),
        dir: source_dir.to_path_buf(),
    })?;
    let mut audio = decode_audio(&path)?;
    speech_normalize(&mut audio.samples, audio.sample_rate);
    let samples = resample(&audio.samples, audio.sample_rate, target_rate)?;
    write_wav(&out_dir.join(format!("{id}.wav")), &samples, target_rate)
}

/// Convert `ids` from `source_dir` into a fresh working directory.
///
/// `None` source passes through as `None` so scorers that need no reference
/// skip this work entirely. Schedule the caller's ids largest-file-first
/// (see `manifest::sort_ids_by_audio_size`) to keep the pool busy at the
/// tail.
pub async fn materialize(
    source_dir: Option<&Path>,
    ids: &[String],
    target_rate: u32,
    jobs: usize,
) -> Result<Option<WorkingDir>> {
    let Some(source_dir) = source_dir else {
        return Ok(None);
    };
    let working = WorkingDir {
        dir: TempDir::new()?,
    };

    let source: PathBuf = source_dir.to_path_buf();
    let out: PathBuf = working.path().to_path_buf();

    stream::iter(ids.iter().cloned())
        .map(|id| {
            let source = source.clone();
            let out = out.clone();
            async move {
                let task_id = id.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    convert_one(&source, &task_id, target_rate, &out)
                });
                match handle.await {
                    Ok(Ok(())) => debug!("converted {id}"),
                    Ok(Err(e)) => warn!("failed to convert {id}: {e}"),
                    Err(e) => warn!("conversion task for {id} panicked: {e}"),
                }
            }
        })
        .buffer_unordered(jobs.max(1))
        .collect::<Vec<()>>()
        .await;

    Ok(Some(working))
}
