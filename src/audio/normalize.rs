//! Speech loudness normalization.
//!
//! Block-adaptive gain that raises quiet speech toward a target peak,
//! comparable to ffmpeg's `speechnorm` filter. Parameters are fixed for
//! every run; they are part of the working-format definition, not knobs.

/// Peak level the gain adapts toward.
const TARGET_PEAK: f64 = 0.95;
/// Upper bound on amplification.
const MAX_EXPANSION: f64 = 5.0;
/// Maximum gain change per sample; keeps adaptation fast but click-free.
const ADAPT_RATE: f64 = 3e-4;
/// Gain update granularity.
const BLOCK_MS: u32 = 10;

/// Normalize speech loudness in place.
pub fn speech_normalize(samples: &mut [f32], sample_rate: u32) {
    let block_len = ((sample_rate * BLOCK_MS) as usize / 1000).max(1);
    let mut gain = 1.0f64;

    let mut start = 0;
    while start < samples.len() {
        let end = (start + block_len).min(samples.len());
        let block = &mut samples[start..end];

        let peak = block
            .iter()
            .fold(0.0f64, |acc, &s| acc.max(s.abs() as f64));
        let desired = if peak > f64::EPSILON {
            (TARGET_PEAK / peak).min(MAX_EXPANSION)
        } else {
            // leave silence alone, decay any boost toward unity
            1.0
        };

        let max_step = ADAPT_RATE * block.len() as f64;
        let next_gain = gain + (desired - gain).clamp(-max_step, max_step);

        // linear gain ramp across the block
        let n = block.len() as f64;
        for (i, sample) in block.iter_mut().enumerate() {
            let g = gain + (next_gain - gain) * (i as f64 + 1.0) / n;
            *sample = ((*sample as f64) * g).clamp(-1.0, 1.0) as f32;
        }
        gain = next_gain;
        start = end;
    }
}
