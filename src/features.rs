/// Feature extraction module
///
/// Computes the two per-window features the classifier works on: RMS amplitude
/// (a loudness proxy) and band-limited spectral energy (how much of the
/// window's magnitude spectrum falls inside the configured frequency band).

use crate::audio_buffer::{AudioSample, SampleBuffer, MIN_BUFFER_LEN};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Frequency band of interest, in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    pub fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }
}

impl Default for FrequencyBand {
    fn default() -> Self {
        Self {
            low_hz: 100.0,
            high_hz: 1000.0,
        }
    }
}

/// Features of one analysis window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureSet {
    /// Root-mean-square amplitude, >= 0
    pub rms_amplitude: f64,

    /// Summed in-band magnitude spectrum divided by window length, >= 0
    pub band_energy: f64,
}

/// Root-mean-square of the samples; an empty slice has amplitude 0
pub fn rms(samples: &[AudioSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt()
}

/// Index of the non-negative-frequency bin closest to `freq_hz`
///
/// Bins are `0 .. n/2`, bin `i` sitting at `i * sample_rate / n`. Ties go to
/// the lower index.
pub fn nearest_bin(freq_hz: f64, n: usize, sample_rate: u32) -> usize {
    let last = (n / 2).max(1) - 1;
    let position = freq_hz * n as f64 / sample_rate as f64;

    // Round half down; negative and NaN positions land on bin 0
    let bin = (position - 0.5).ceil().max(0.0) as usize;
    bin.min(last)
}

/// Band-limited spectral energy of `samples`
///
/// Sums DFT magnitudes from the bin nearest `band.low_hz` through the bin
/// nearest `band.high_hz` (inclusive) and divides by the window length.
/// Windows shorter than two samples, and bands whose low bin lands above
/// their high bin, have zero energy.
pub fn band_energy(samples: &[AudioSample], sample_rate: u32, band: FrequencyBand) -> f64 {
    let mut planner = FftPlanner::new();
    band_energy_with(&mut planner, samples, sample_rate, band)
}

fn band_energy_with(
    planner: &mut FftPlanner<f64>,
    samples: &[AudioSample],
    sample_rate: u32,
    band: FrequencyBand,
) -> f64 {
    let n = samples.len();
    if n < MIN_BUFFER_LEN || sample_rate == 0 {
        return 0.0;
    }

    let low_index = nearest_bin(band.low_hz, n, sample_rate);
    let high_index = nearest_bin(band.high_hz, n, sample_rate);
    if low_index > high_index {
        return 0.0;
    }

    let mut spectrum: Vec<Complex<f64>> = samples
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .collect();

    let fft = planner.plan_fft_forward(n);
    fft.process(&mut spectrum);

    // Input is real, so bins above n/2 mirror the ones below.
    let magnitude_sum: f64 = spectrum[low_index..=high_index]
        .iter()
        .map(|c| c.norm())
        .sum();

    trace!(
        "Band energy: bins {}..={} of {}, magnitude sum {:.4}",
        low_index,
        high_index,
        n / 2,
        magnitude_sum
    );

    magnitude_sum / n as f64
}

/// Feature extractor bound to one frequency band
///
/// Keeps an FFT planner between windows so consecutive buffers of the same
/// length reuse the same plan. Results are identical to the free functions.
pub struct FeatureExtractor {
    band: FrequencyBand,
    planner: FftPlanner<f64>,
}

impl FeatureExtractor {
    pub fn new(band: FrequencyBand) -> Self {
        Self {
            band,
            planner: FftPlanner::new(),
        }
    }

    /// Compute both features for one window
    pub fn extract(&mut self, buffer: &SampleBuffer) -> FeatureSet {
        let samples = buffer.samples();

        FeatureSet {
            rms_amplitude: rms(samples),
            band_energy: band_energy_with(
                &mut self.planner,
                samples,
                buffer.sample_rate(),
                self.band,
            ),
        }
    }

    pub fn band(&self) -> FrequencyBand {
        self.band
    }
}
