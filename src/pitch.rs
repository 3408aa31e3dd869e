//! Frame-based pitch tracking and loudness features.
//!
//! Autocorrelation tracker with an FFT-accelerated ACF. Frames where no
//! sufficiently strong periodic peak is found in the 50-500 Hz search range
//! are reported as unvoiced (`None`).

use rustfft::{num_complex::Complex, FftPlanner};

/// Analysis frame length in samples (64 ms at 16 kHz).
pub const FRAME_LEN: usize = 1024;
/// Hop between analysis frames in samples.
pub const HOP_LEN: usize = 256;
/// Lowest pitch candidate considered, Hz.
pub const F0_MIN: f64 = 50.0;
/// Highest pitch candidate considered, Hz.
pub const F0_MAX: f64 = 500.0;

// Normalized ACF peak below this is treated as unvoiced.
const VOICING_THRESHOLD: f64 = 0.5;
// Frames quieter than this mean-square energy are unvoiced.
const ENERGY_FLOOR: f64 = 1e-6;

/// Per-frame fundamental frequency estimates, `None` for unvoiced frames.
pub fn track(samples: &[f32], sample_rate: u32) -> Vec<Option<f64>> {
    if samples.len() < FRAME_LEN {
        return Vec::new();
    }

    let fft_len = (2 * FRAME_LEN).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let lag_min = (sample_rate as f64 / F0_MAX).floor() as usize;
    let lag_max = ((sample_rate as f64 / F0_MIN).ceil() as usize).min(FRAME_LEN - 1);

    let mut f0 = Vec::with_capacity((samples.len() - FRAME_LEN) / HOP_LEN + 1);
    let mut buf = vec![Complex::new(0.0, 0.0); fft_len];

    let mut start = 0;
    while start + FRAME_LEN <= samples.len() {
        let frame = &samples[start..start + FRAME_LEN];
        for (slot, &s) in buf.iter_mut().zip(frame) {
            *slot = Complex::new(s as f64, 0.0);
        }
        for slot in buf.iter_mut().skip(FRAME_LEN) {
            *slot = Complex::new(0.0, 0.0);
        }

        // autocorrelation via power spectrum
        forward.process(&mut buf);
        for slot in buf.iter_mut() {
            *slot = Complex::new(slot.norm_sqr(), 0.0);
        }
        inverse.process(&mut buf);

        let r0 = buf[0].re / fft_len as f64;
        if r0 / FRAME_LEN as f64 <= ENERGY_FLOOR {
            f0.push(None);
            start += HOP_LEN;
            continue;
        }

        let mut best_lag = 0usize;
        let mut best_val = f64::MIN;
        for lag in lag_min..=lag_max {
            let val = buf[lag].re / fft_len as f64;
            if val > best_val {
                best_val = val;
                best_lag = lag;
            }
        }

        if best_lag == 0 || best_val / r0 < VOICING_THRESHOLD {
            f0.push(None);
        } else {
            // parabolic interpolation around the peak for sub-sample lag
            let lag = refine_peak(&buf, fft_len, best_lag, lag_min, lag_max);
            f0.push(Some(sample_rate as f64 / lag));
        }
        start += HOP_LEN;
    }
    f0
}

fn refine_peak(
    acf: &[Complex<f64>],
    fft_len: usize,
    lag: usize,
    lag_min: usize,
    lag_max: usize,
) -> f64 {
    if lag <= lag_min || lag >= lag_max {
        return lag as f64;
    }
    let scale = fft_len as f64;
    let left = acf[lag - 1].re / scale;
    let mid = acf[lag].re / scale;
    let right = acf[lag + 1].re / scale;
    let denom = left - 2.0 * mid + right;
    if denom.abs() < f64::EPSILON {
        return lag as f64;
    }
    let delta = 0.5 * (left - right) / denom;
    lag as f64 + delta.clamp(-1.0, 1.0)
}

/// Root-mean-square energy per analysis frame.
pub fn frame_rms(samples: &[f32]) -> Vec<f64> {
    if samples.len() < FRAME_LEN {
        return Vec::new();
    }
    let mut rms = Vec::with_capacity((samples.len() - FRAME_LEN) / HOP_LEN + 1);
    let mut start = 0;
    while start + FRAME_LEN <= samples.len() {
        let frame = &samples[start..start + FRAME_LEN];
        let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
        rms.push((energy / FRAME_LEN as f64).sqrt());
        start += HOP_LEN;
    }
    rms
}

/// Peak absolute amplitude per analysis frame.
pub fn frame_peak(samples: &[f32]) -> Vec<f64> {
    if samples.len() < FRAME_LEN {
        return Vec::new();
    }
    let mut peaks = Vec::with_capacity((samples.len() - FRAME_LEN) / HOP_LEN + 1);
    let mut start = 0;
    while start + FRAME_LEN <= samples.len() {
        let frame = &samples[start..start + FRAME_LEN];
        let peak = frame.iter().fold(0.0f64, |acc, &s| acc.max(s.abs() as f64));
        peaks.push(peak);
        start += HOP_LEN;
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, seconds: f64, amplitude: f32) -> Vec<f32> {
        let n = (sample_rate as f64 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * freq * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn tracks_steady_sine() {
        let samples = sine(220.0, 16000, 1.0, 0.5);
        let f0 = track(&samples, 16000);
        assert!(!f0.is_empty());
        let voiced: Vec<f64> = f0.iter().flatten().copied().collect();
        assert!(voiced.len() as f64 > 0.9 * f0.len() as f64);
        for value in voiced {
            assert!((value - 220.0).abs() < 5.0, "expected ~220 Hz, got {value}");
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        let samples = vec![0.0f32; 16000];
        let f0 = track(&samples, 16000);
        assert!(f0.iter().all(|v| v.is_none()));
    }

    #[test]
    fn noise_is_mostly_unvoiced() {
        // deterministic broadband noise
        let mut state = 0x12345678u32;
        let samples: Vec<f32> = (0..16000)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state as f32 / u32::MAX as f32 - 0.5) * 0.2
            })
            .collect();
        let f0 = track(&samples, 16000);
        let voiced = f0.iter().flatten().count();
        assert!(voiced < f0.len() / 2, "{voiced}/{} voiced", f0.len());
    }

    #[test]
    fn short_input_yields_empty_track() {
        let samples = vec![0.1f32; FRAME_LEN - 1];
        assert!(track(&samples, 16000).is_empty());
        assert!(frame_rms(&samples).is_empty());
    }

    #[test]
    fn rms_of_sine_matches_theory() {
        let samples = sine(100.0, 16000, 0.5, 0.8);
        let rms = frame_rms(&samples);
        assert!(!rms.is_empty());
        let expected = 0.8f64 / 2.0f64.sqrt();
        for value in rms {
            assert!((value - expected).abs() < 0.05);
        }
    }
}
