/// Snore detector library
///
/// Classifies short audio windows by RMS amplitude and band-limited spectral
/// energy, and debounces positive windows through a sliding time window
/// before firing an external action.

pub mod action;
pub mod aggregator;
pub mod audio_buffer;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod features;
#[cfg(feature = "microphone")]
pub mod microphone;

// Re-export main types
pub use action::{dispatch, ActionError, ActionOutcome, ActionSink, CommandAction, LogAction};
pub use aggregator::{AggregatorConfig, AggregatorDecision, EventAggregator, EvictionPolicy};
pub use audio_buffer::{AudioSample, SampleBuffer, Windower, DEFAULT_SAMPLE_RATE};
pub use capture::{channel, AudioSource, CaptureError, ChannelSource, ChunkSender};
pub use classifier::{classify, evaluate, Classification, DetectionReason, Thresholds};
pub use config::{ConfigError, SnoreConfig};
pub use detector::{DetectorError, DetectorStats, SnoreDetector, TickReport};
pub use features::{band_energy, rms, FeatureExtractor, FeatureSet, FrequencyBand};
#[cfg(feature = "microphone")]
pub use microphone::MicrophoneSource;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
