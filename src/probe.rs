//! Deterministic test signals and waveform comparison helpers.

use dasp_frame::{Frame, Stereo};
use dasp_signal::{self as signal, Signal};

/// Generate `frames` of an interleaved stereo sine at `frequency_hz`,
/// half amplitude on both channels.
pub fn stereo_tone(sample_rate: f64, frequency_hz: f64, frames: usize) -> Vec<f32> {
    let mut source = signal::rate(sample_rate).const_hz(frequency_hz).sine();
    let mut out = Vec::with_capacity(frames * 2);
    for _ in 0..frames {
        let sample = (source.next() * 0.5) as f32;
        let frame: Stereo<f32> = [sample, sample];
        out.extend_from_slice(&frame);
    }
    out
}

/// Interleaved stereo silence.
pub fn silence(frames: usize) -> Vec<f32> {
    let frame: Stereo<f32> = Frame::EQUILIBRIUM;
    let mut out = Vec::with_capacity(frames * 2);
    for _ in 0..frames {
        out.extend_from_slice(&frame);
    }
    out
}

/// Root-mean-square level of an interleaved signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|s| f64::from(*s) * f64::from(*s)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Normalized cross-correlation between two equally laid out signals.
/// Returns `0.0` when either signal carries no energy.
pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut energy_a = 0.0f64;
    let mut energy_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        energy_a += f64::from(*x).powi(2);
        energy_b += f64::from(*y).powi(2);
    }
    if energy_a == 0.0 || energy_b == 0.0 {
        0.0
    } else {
        (dot / (energy_a.sqrt() * energy_b.sqrt())) as f32
    }
}
