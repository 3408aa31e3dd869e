//! Manifest reconciliation.
//!
//! Reads the id/text manifest and the optional id-to-reference mapping,
//! filters both against what actually exists (and passes the duration gate)
//! on disk, and produces the canonical ordered id set used by every
//! downstream component. Order of first appearance in the manifest is the
//! canonical iteration order for the whole run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::audio::{probe_duration, resolve_audio};
use crate::error::{EvalError, Result};

/// Shortest utterance admitted to a run, seconds.
pub const MIN_DURATION_SECS: f64 = 0.3;
/// Longest utterance admitted to a run, seconds.
pub const MAX_DURATION_SECS: f64 = 40.0;

/// One manifest line: utterance id plus its reference text.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub id: String,
    pub text: String,
}

/// Maps a generated-utterance id to the reference id it is compared against.
pub type ReferenceMapping = HashMap<String, String>;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub ignore_missing: bool,
    pub min_duration: f64,
    pub max_duration: f64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            ignore_missing: false,
            min_duration: MIN_DURATION_SECS,
            max_duration: MAX_DURATION_SECS,
        }
    }
}

/// Existence + duration gate for one id in one directory.
fn quality_gate(dir: &Path, id: &str, opts: &ReconcileOptions) -> Result<()> {
    let path = resolve_audio(dir, id).ok_or_else(|| EvalError::MissingInput {
        id: id.to_string(),
        dir: dir.to_path_buf(),
    })?;
    let duration = probe_duration(&path).map_err(|e| EvalError::InvalidInput {
        id: id.to_string(),
        path: path.clone(),
        reason: format!("unreadable: {e}"),
    })?;
    if duration < opts.min_duration || duration > opts.max_duration {
        return Err(EvalError::InvalidInput {
            id: id.to_string(),
            path,
            reason: format!(
                "duration {duration:.2}s outside [{:.1}, {:.1}]",
                opts.min_duration, opts.max_duration
            ),
        });
    }
    Ok(())
}

// Applies the policy: drop with a warning under ignore_missing, abort otherwise.
fn gate_or_drop(dir: &Path, id: &str, opts: &ReconcileOptions) -> Result<bool> {
    match quality_gate(dir, id, opts) {
        Ok(()) => Ok(true),
        Err(e) if opts.ignore_missing => {
            warn!("{e}, skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Reconcile the manifest against the audio that exists on disk.
///
/// Returns the surviving entries in manifest order and, when a mapping file
/// was given, the filtered id-to-reference mapping. Every surviving id is
/// guaranteed to resolve to a duration-valid asset in `generated_dir`, and
/// to have a resolvable, duration-valid reference whenever one is required.
pub fn reconcile(
    manifest_path: &Path,
    generated_dir: &Path,
    mapping_path: Option<&Path>,
    reference_dir: Option<&Path>,
    opts: &ReconcileOptions,
) -> Result<(Vec<ManifestEntry>, Option<ReferenceMapping>)> {
    if mapping_path.is_some() && reference_dir.is_none() {
        return Err(EvalError::Config(
            "a mapping file requires a reference audio directory".to_string(),
        ));
    }

    let mut entries = Vec::new();
    let content = fs::read_to_string(manifest_path)?;
    for (idx, line) in content.lines().enumerate() {
        let (id, text) =
            line.split_once(char::is_whitespace)
                .ok_or_else(|| EvalError::ManifestParse {
                    path: manifest_path.to_path_buf(),
                    line: idx + 1,
                })?;
        if !gate_or_drop(generated_dir, id, opts)? {
            continue;
        }
        entries.push(ManifestEntry {
            id: id.to_string(),
            text: text.trim_start().to_string(),
        });
    }

    let Some(mapping_path) = mapping_path else {
        // identity comparison: re-apply the gate in the reference dir
        if let Some(reference_dir) = reference_dir {
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries {
                if gate_or_drop(reference_dir, &entry.id, opts)? {
                    kept.push(entry);
                }
            }
            return Ok((kept, None));
        }
        return Ok((entries, None));
    };
    let Some(reference_dir) = reference_dir else {
        return Err(EvalError::Config(
            "a mapping file requires a reference audio directory".to_string(),
        ));
    };

    let mapping = read_mapping(mapping_path)?;

    let mut kept = Vec::with_capacity(entries.len());
    let mut kept_mapping = ReferenceMapping::new();
    for entry in entries {
        let Some(ref_id) = mapping.get(&entry.id) else {
            let e = EvalError::MissingInput {
                id: entry.id.clone(),
                dir: mapping_path.to_path_buf(),
            };
            if opts.ignore_missing {
                warn!("mapping for {} is missing from {}, skipping", entry.id, mapping_path.display());
                continue;
            }
            return Err(e);
        };
        if !gate_or_drop(reference_dir, ref_id, opts)? {
            continue;
        }
        kept_mapping.insert(entry.id.clone(), ref_id.clone());
        kept.push(entry);
    }

    Ok((kept, Some(kept_mapping)))
}

/// Parse an `id ref_id` mapping file. Exactly two tokens per line;
/// the last occurrence of a duplicated id wins.
fn read_mapping(path: &Path) -> Result<ReferenceMapping> {
    let mut mapping = ReferenceMapping::new();
    let content = fs::read_to_string(path)?;
    for (idx, line) in content.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        let (Some(id), Some(ref_id), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(EvalError::ManifestParse {
                path: path.to_path_buf(),
                line: idx + 1,
            });
        };
        mapping.insert(id.to_string(), ref_id.to_string());
    }
    Ok(mapping)
}

/// Order ids by descending source file size so the slowest conversions are
/// scheduled first. A scheduling heuristic for the materializer pool, not a
/// correctness requirement; reconciliation itself never re-sorts.
pub fn sort_ids_by_audio_size(dir: &Path, mut entries: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    let size_of = |id: &str| -> u64 {
        resolve_audio(dir, id)
            .and_then(|p: PathBuf| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    };
    entries.sort_by_key(|e| std::cmp::Reverse(size_of(&e.id)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use tempfile::{tempdir, TempDir};

    fn tone(seconds: f64) -> Vec<f32> {
        let n = (seconds * 16000.0) as usize;
        (0..n)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    fn audio_dir(ids_and_secs: &[(&str, f64)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (id, secs) in ids_and_secs {
            write_wav(&dir.path().join(format!("{id}.wav")), &tone(*secs), 16000).unwrap();
        }
        dir
    }

    fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn keeps_manifest_order_minus_drops() {
        let gen = audio_dir(&[("a", 1.0), ("c", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(
            scratch.path(),
            "manifest.txt",
            &["a hello there", "b dropped one", "c final words"],
        );

        let opts = ReconcileOptions {
            ignore_missing: true,
            ..Default::default()
        };
        let (entries, mapping) =
            reconcile(&manifest, gen.path(), None, None, &opts).unwrap();
        assert!(mapping.is_none());
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(entries[0].text, "hello there");
    }

    #[test]
    fn missing_audio_fails_without_ignore() {
        let gen = audio_dir(&[("a", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(scratch.path(), "manifest.txt", &["a one", "b two"]);

        let err = reconcile(
            &manifest,
            gen.path(),
            None,
            None,
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::MissingInput { ref id, .. } if id == "b"));
    }

    #[test]
    fn duration_gate_drops_short_audio() {
        let gen = audio_dir(&[("ok", 1.0), ("blip", 0.1)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(scratch.path(), "manifest.txt", &["ok text", "blip text"]);

        let opts = ReconcileOptions {
            ignore_missing: true,
            ..Default::default()
        };
        let (entries, _) = reconcile(&manifest, gen.path(), None, None, &opts).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "ok");

        // and aborts when the policy says so
        let err = reconcile(
            &manifest,
            gen.path(),
            None,
            None,
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::InvalidInput { ref id, .. } if id == "blip"));
    }

    #[test]
    fn malformed_line_is_a_hard_error_even_with_ignore() {
        let gen = audio_dir(&[("a", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(scratch.path(), "manifest.txt", &["a text", "no-whitespace"]);

        let opts = ReconcileOptions {
            ignore_missing: true,
            ..Default::default()
        };
        let err = reconcile(&manifest, gen.path(), None, None, &opts).unwrap_err();
        assert!(matches!(err, EvalError::ManifestParse { line: 2, .. }));
    }

    #[test]
    fn reference_dir_without_mapping_regates_same_ids() {
        let gen = audio_dir(&[("a", 1.0), ("b", 1.0)]);
        let refs = audio_dir(&[("a", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(scratch.path(), "manifest.txt", &["a one", "b two"]);

        let opts = ReconcileOptions {
            ignore_missing: true,
            ..Default::default()
        };
        let (entries, mapping) =
            reconcile(&manifest, gen.path(), None, Some(refs.path()), &opts).unwrap();
        assert!(mapping.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "a");
    }

    #[test]
    fn mapping_requires_reference_dir() {
        let gen = audio_dir(&[("a", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest = write_lines(scratch.path(), "manifest.txt", &["a one"]);
        let mapping = write_lines(scratch.path(), "mapping.txt", &["a ref1"]);

        let err = reconcile(
            &manifest,
            gen.path(),
            Some(&mapping),
            None,
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn mapping_filters_and_last_duplicate_wins() {
        let gen = audio_dir(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let refs = audio_dir(&[("spk1", 1.0), ("spk2", 1.0)]);
        let scratch = tempdir().unwrap();
        let manifest =
            write_lines(scratch.path(), "manifest.txt", &["a one", "b two", "c three"]);
        // a mapped twice (last wins), b unmapped, c mapped to a missing ref
        let mapping = write_lines(
            scratch.path(),
            "mapping.txt",
            &["a spk1", "a spk2", "c gone"],
        );

        let opts = ReconcileOptions {
            ignore_missing: true,
            ..Default::default()
        };
        let (entries, mapping) = reconcile(
            &manifest,
            gen.path(),
            Some(&mapping),
            Some(refs.path()),
            &opts,
        )
        .unwrap();
        let mapping = mapping.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "a");
        assert_eq!(mapping.get("a").unwrap(), "spk2");
    }

    #[test]
    fn mapping_line_with_three_tokens_is_malformed() {
        let scratch = tempdir().unwrap();
        let path = write_lines(scratch.path(), "mapping.txt", &["a b c"]);
        let err = read_mapping(&path).unwrap_err();
        assert!(matches!(err, EvalError::ManifestParse { line: 1, .. }));
    }

    #[test]
    fn sorts_by_descending_file_size() {
        let gen = audio_dir(&[("short", 0.5), ("long", 3.0), ("mid", 1.5)]);
        let entries = vec![
            ManifestEntry { id: "short".into(), text: "s".into() },
            ManifestEntry { id: "long".into(), text: "l".into() },
            ManifestEntry { id: "mid".into(), text: "m".into() },
        ];
        let sorted = sort_ids_by_audio_size(gen.path(), entries);
        let ids: Vec<&str> = sorted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["long", "mid", "short"]);
    }
}
