//! Sample-rate conversion for the working audio format.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{EvalError, Result};

/// Resample mono audio to `target_rate`.
///
/// Skipped entirely when the rates already match, to avoid needless
/// quality loss.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| EvalError::Processing {
        id: String::new(),
        reason: format!("failed to create resampler: {e}"),
    })?;

    let waves_in = vec![samples.to_vec()];
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| EvalError::Processing {
            id: String::new(),
            reason: format!("resampling failed: {e}"),
        })?;

    Ok(waves_out.into_iter().next().unwrap_or_default())
}
