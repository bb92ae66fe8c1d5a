/// Snore detector pipeline
///
/// One tick: window → features → classification → aggregator → (maybe) action.
/// `tick`/`process` are synchronous and take the tick's instant from the
/// caller, so hosts and tests can drive the pipeline at their own cadence.
/// `run` is the service loop around them.

use crate::action::{dispatch, ActionSink};
use crate::aggregator::{AggregatorConfig, AggregatorDecision, AggregatorError, EventAggregator};
use crate::audio_buffer::{AudioSample, SampleBuffer};
use crate::capture::{AudioSource, CaptureError};
use crate::classifier::{evaluate, Classification, ClassifierError, Thresholds};
use crate::config::{ConfigError, SnoreConfig};
use crate::features::FeatureExtractor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
}

/// Result of one pipeline tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// `None` when the window was too short to analyse
    pub classification: Option<Classification>,

    /// Detections retained after this tick
    pub window_len: usize,

    /// Whether this tick fired the action
    pub triggered: bool,
}

impl TickReport {
    pub fn is_snore(&self) -> bool {
        self.classification.map_or(false, |c| c.is_snore())
    }
}

/// Detector statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub ticks: u64,
    pub detections: u64,
    pub triggers: u64,
    pub degenerate_buffers: u64,
    pub capture_failures: u64,
}

pub struct SnoreDetector {
    thresholds: Thresholds,
    extractor: FeatureExtractor,
    aggregator: EventAggregator,
    sample_rate: u32,
    stats: DetectorStats,
}

impl SnoreDetector {
    /// Build a detector from validated service configuration
    pub fn new(config: &SnoreConfig) -> Result<Self, DetectorError> {
        config.validate()?;
        Self::with_parts(config.thresholds(), config.aggregator_config(), config.sample_rate)
    }

    pub fn with_parts(
        thresholds: Thresholds,
        aggregator_config: AggregatorConfig,
        sample_rate: u32,
    ) -> Result<Self, DetectorError> {
        thresholds.validate()?;
        if sample_rate == 0 {
            return Err(DetectorError::InvalidSampleRate(sample_rate));
        }

        info!(
            "Initializing snore detector: amplitude > {}, band {:?} energy > {}",
            thresholds.amplitude_threshold,
            thresholds.frequency_band,
            thresholds.band_energy_threshold
        );

        Ok(Self {
            extractor: FeatureExtractor::new(thresholds.frequency_band),
            aggregator: EventAggregator::new(aggregator_config)?,
            thresholds,
            sample_rate,
            stats: DetectorStats::default(),
        })
    }

    /// Run one tick over raw samples captured at the detector's sample rate
    ///
    /// Windows shorter than two samples are counted and treated as negative.
    pub fn tick(&mut self, samples: &[AudioSample], now: Instant) -> TickReport {
        match SampleBuffer::new(samples.to_vec(), self.sample_rate) {
            Ok(buffer) => self.process(&buffer, now),
            Err(e) => {
                warn!("Degenerate buffer ({}), treating as silence", e);
                self.stats.ticks += 1;
                self.stats.degenerate_buffers += 1;
                self.aggregator.observe_idle(now);

                TickReport {
                    classification: None,
                    window_len: self.aggregator.len(),
                    triggered: false,
                }
            }
        }
    }

    /// Run one tick over a captured window
    pub fn process(&mut self, buffer: &SampleBuffer, now: Instant) -> TickReport {
        self.stats.ticks += 1;

        let features = self.extractor.extract(buffer);
        let classification = evaluate(&features, &self.thresholds);

        trace!(
            "Tick {}: rms={:.4}, band_energy={:.4}",
            self.stats.ticks,
            features.rms_amplitude,
            features.band_energy
        );

        let Some(reason) = classification.reason else {
            self.aggregator.observe_idle(now);
            return TickReport {
                classification: Some(classification),
                window_len: self.aggregator.len(),
                triggered: false,
            };
        };

        self.stats.detections += 1;
        debug!(
            "Possible snore ({:?}): rms={:.4}, band_energy={:.4}",
            reason, features.rms_amplitude, features.band_energy
        );

        let triggered = match self.aggregator.record_detection(now) {
            AggregatorDecision::Trigger { detections } => {
                self.stats.triggers += 1;
                info!("Snore detected! ({} detections in window)", detections);
                true
            }
            AggregatorDecision::Pending { .. } => false,
        };

        TickReport {
            classification: Some(classification),
            window_len: self.aggregator.len(),
            triggered,
        }
    }

    /// Capture, process and dispatch until cancelled or the source closes
    ///
    /// Capture failures are logged and the loop moves on to the next tick.
    /// Audio arriving during `inter_tick_delay` is skipped, so each window
    /// starts after the pause and a slow consumer never accumulates a backlog.
    /// Actions run on their own tasks; the ones still in flight when the
    /// loop ends are awaited before returning.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        sink: Arc<dyn ActionSink>,
        inter_tick_delay: Duration,
        shutdown: CancellationToken,
    ) -> DetectorStats
    where
        S: AudioSource + ?Sized,
    {
        info!(
            "Snore detection started (action: {}, tick delay {:?})",
            sink.describe(),
            inter_tick_delay
        );

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            let captured = tokio::select! {
                _ = shutdown.cancelled() => break,
                captured = source.capture() => captured,
            };

            match captured {
                Ok(buffer) => {
                    let report = self.process(&buffer, Instant::now());
                    if report.triggered {
                        in_flight.retain(|handle| !handle.is_finished());
                        in_flight.push(dispatch(Arc::clone(&sink)));
                    }
                }
                Err(CaptureError::SourceClosed) => {
                    info!("Audio source closed, stopping");
                    break;
                }
                Err(e) => {
                    self.stats.capture_failures += 1;
                    error!("Capture failed: {}", e);
                }
            }

            if !inter_tick_delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(inter_tick_delay) => {}
                }
                // Audio heard during the pause is not analysed
                source.discard_buffered();
            }
        }

        for handle in in_flight {
            if let Err(e) = handle.await {
                error!("Action task failed: {}", e);
            }
        }

        info!(
            "Snore detection stopped: {} ticks, {} detections, {} triggers",
            self.stats.ticks, self.stats.detections, self.stats.triggers
        );

        self.stats.clone()
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Clear the sliding window and counters
    pub fn reset(&mut self) {
        self.aggregator.reset();
        self.stats = DetectorStats::default();
        info!("Detector reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, MockActionSink};
    use crate::capture::channel;
    use crate::classifier::DetectionReason;
    use crate::features::FrequencyBand;
    use std::f64::consts::PI;

    const SAMPLE_RATE: u32 = 44_100;

    fn generate_tone(frequency: f64, num_samples: usize, amplitude: f64) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE as f64;
                (amplitude * (2.0 * PI * frequency * t).sin()) as f32
            })
            .collect()
    }

    fn test_detector() -> SnoreDetector {
        SnoreDetector::new(&SnoreConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SnoreConfig {
            event_count_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            SnoreDetector::new(&config),
            Err(DetectorError::Config(_))
        ));
    }

    #[test]
    fn test_silence_tick() {
        let mut detector = test_detector();
        let report = detector.tick(&vec![0.0; 8820], Instant::now());

        let classification = report.classification.unwrap();
        assert_eq!(classification.features.rms_amplitude, 0.0);
        assert_eq!(classification.features.band_energy, 0.0);
        assert!(!report.is_snore());
        assert!(!report.triggered);
        assert_eq!(detector.stats().detections, 0);
    }

    #[test]
    fn test_band_energy_alone_detects() {
        // Band energy is normalised by window length, so a 0.5-amplitude tone
        // scores 0.25 and can never reach the 10.0 default; 0.1 exercises the
        // band-energy path of the OR.
        let thresholds = Thresholds {
            amplitude_threshold: 2.0,
            frequency_band: FrequencyBand::new(100.0, 1000.0),
            band_energy_threshold: 0.1,
        };
        let mut detector =
            SnoreDetector::with_parts(thresholds, AggregatorConfig::default(), SAMPLE_RATE)
                .unwrap();

        let tone = generate_tone(300.0, 8820, 0.5);
        let report = detector.tick(&tone, Instant::now());

        assert!(report.is_snore());
        assert_eq!(
            report.classification.unwrap().reason,
            Some(DetectionReason::BandEnergy)
        );
        assert_eq!(report.window_len, 1);
    }

    #[test]
    fn test_degenerate_buffer_is_not_detection() {
        let mut detector = test_detector();
        let report = detector.tick(&[0.9], Instant::now());

        assert!(report.classification.is_none());
        assert!(!report.is_snore());
        assert_eq!(detector.stats().degenerate_buffers, 1);
        assert_eq!(detector.stats().ticks, 1);
    }

    #[test]
    fn test_loud_ticks_trigger_once_then_reset() {
        let mut detector = test_detector();
        let loud = generate_tone(300.0, 8820, 0.5);
        let start = Instant::now();

        let reports: Vec<TickReport> = (0..4)
            .map(|i| detector.tick(&loud, start + Duration::from_secs(i)))
            .collect();

        assert_eq!(
            reports.iter().map(|r| r.triggered).collect::<Vec<_>>(),
            vec![false, false, true, false]
        );
        assert_eq!(reports[2].window_len, 0);
        assert_eq!(reports[3].window_len, 1);
        assert_eq!(detector.stats().triggers, 1);
        assert_eq!(detector.stats().detections, 4);
    }

    #[test]
    fn test_reset() {
        let mut detector = test_detector();
        let loud = generate_tone(300.0, 8820, 0.5);
        detector.tick(&loud, Instant::now());

        detector.reset();
        assert!(detector.aggregator().is_empty());
        assert_eq!(detector.stats(), &DetectorStats::default());
    }

    #[tokio::test]
    async fn test_run_dispatches_action_per_trigger() {
        let config = SnoreConfig {
            buffer_duration_secs: 0.1,
            ..Default::default()
        };
        let mut detector = SnoreDetector::new(&config).unwrap();
        let (sender, mut source) = channel(config.window_len(), config.sample_rate).unwrap();

        let loud = generate_tone(300.0, config.window_len(), 0.5);
        for _ in 0..3 {
            sender.send(loud.clone()).unwrap();
        }
        sender.send(vec![0.0; config.window_len()]).unwrap();
        drop(sender);

        let mut sink = MockActionSink::new();
        sink.expect_fire()
            .times(1)
            .returning(|| Ok(ActionOutcome::default()));
        sink.expect_describe().returning(|| "mock".to_string());

        let stats = detector
            .run(
                &mut source,
                Arc::new(sink),
                Duration::ZERO,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.detections, 3);
        assert_eq!(stats.triggers, 1);
    }

    #[tokio::test]
    async fn test_run_survives_capture_failure() {
        let config = SnoreConfig::default();
        let mut detector = SnoreDetector::new(&config).unwrap();
        let (sender, mut source) = channel(config.window_len(), config.sample_rate).unwrap();

        sender.fail("xrun").unwrap();
        sender.send(vec![0.0; config.window_len()]).unwrap();
        drop(sender);

        let stats = detector
            .run(
                &mut source,
                Arc::new(crate::action::LogAction),
                Duration::ZERO,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(stats.capture_failures, 1);
        assert_eq!(stats.ticks, 1);
    }

    #[tokio::test]
    async fn test_run_skips_audio_queued_during_delay() {
        let config = SnoreConfig::default();
        let mut detector = SnoreDetector::new(&config).unwrap();
        let (sender, mut source) = channel(config.window_len(), config.sample_rate).unwrap();

        // Everything after the first window is already stale once the pause ends
        for _ in 0..5 {
            sender.send(vec![0.0; config.window_len()]).unwrap();
        }
        drop(sender);

        let stats = detector
            .run(
                &mut source,
                Arc::new(crate::action::LogAction),
                Duration::from_millis(10),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(stats.ticks, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let config = SnoreConfig::default();
        let mut detector = SnoreDetector::new(&config).unwrap();
        // Sender kept alive: capture would wait forever without cancellation
        let (_sender, mut source) = channel(config.window_len(), config.sample_rate).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = detector
            .run(
                &mut source,
                Arc::new(crate::action::LogAction),
                config.inter_tick_delay(),
                shutdown,
            )
            .await;

        assert_eq!(stats.ticks, 0);
    }
}
