//! Frequency analyser that turns PCM audio into byte magnitude snapshots.
//!
//! Mirrors the behaviour of a browser audio analyser node with an FFT size of
//! 256: the newest 256 samples are Blackman-windowed and transformed, each
//! bin's magnitude is smoothed over time, converted to decibels and mapped
//! from `[MIN_DB, MAX_DB]` onto `0..=255`.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Samples per transform.
pub const FFT_SIZE: usize = 256;
/// Magnitude bins per snapshot.
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    /// Blackman window (pre-computed)
    window: Vec<f32>,
    /// Newest `FFT_SIZE` samples, oldest first.
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    bytes: Vec<u8>,
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyAnalyser {
    pub fn new() -> Self {
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / FFT_SIZE as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            fft: FftPlanner::new().plan_fft_forward(FFT_SIZE),
            window,
            history: std::iter::repeat(0.0).take(FFT_SIZE).collect(),
            smoothed: vec![0.0; BIN_COUNT],
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            bytes: vec![0; BIN_COUNT],
        }
    }

    /// Appends normalized PCM samples (`[-1, 1]`), keeping only the newest `FFT_SIZE`.
    pub fn push_samples(&mut self, pcm: &[f32]) {
        let keep = &pcm[pcm.len().saturating_sub(FFT_SIZE)..];
        for &sample in keep {
            if self.history.len() == FFT_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(sample);
        }
    }

    /// Computes a new snapshot from the current samples.
    ///
    /// Every call advances the time smoothing, so call it once per tick.
    pub fn byte_frequency_data(&mut self) -> &[u8] {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(self.history.iter()).zip(self.window.iter()) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let scale = 1.0 / FFT_SIZE as f32;
        for ((smoothed, bin), byte) in self.smoothed.iter_mut().zip(self.buffer.iter()).zip(self.bytes.iter_mut()) {
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * bin.norm() * scale;
            *byte = to_byte(*smoothed);
        }
        &self.bytes
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (db - MIN_DB) * (u8::MAX as f32 / (MAX_DB - MIN_DB));
    scaled.clamp(0.0, u8::MAX as f32) as u8
}
