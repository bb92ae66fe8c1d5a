/// Snore classifier
///
/// A window is a possible snore when it is loud enough OR carries enough
/// energy in the snore band. Either signal alone is sufficient.

use crate::features::{FeatureSet, FrequencyBand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid thresholds: {0}")]
    InvalidThresholds(String),
}

/// Per-window decision thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// RMS amplitude above which a window counts as a possible snore
    pub amplitude_threshold: f64,

    /// Band the spectral energy is measured over
    pub frequency_band: FrequencyBand,

    /// Band energy above which a window counts as a possible snore
    pub band_energy_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            amplitude_threshold: 0.1,
            frequency_band: FrequencyBand::default(),
            band_energy_threshold: 10.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if !(self.amplitude_threshold >= 0.0) {
            return Err(ClassifierError::InvalidThresholds(
                "amplitude_threshold must be >= 0".to_string(),
            ));
        }

        if !(self.band_energy_threshold >= 0.0) {
            return Err(ClassifierError::InvalidThresholds(
                "band_energy_threshold must be >= 0".to_string(),
            ));
        }

        let band = self.frequency_band;
        if !(band.low_hz >= 0.0) || !(band.high_hz >= band.low_hz) {
            return Err(ClassifierError::InvalidThresholds(format!(
                "frequency band must satisfy 0 <= low <= high, got ({}, {})",
                band.low_hz, band.high_hz
            )));
        }

        Ok(())
    }
}

/// Which feature(s) pushed a window over its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionReason {
    Amplitude,
    BandEnergy,
    Both,
}

/// Classifier output with the values that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub features: FeatureSet,
    pub reason: Option<DetectionReason>,
}

impl Classification {
    pub fn is_snore(&self) -> bool {
        self.reason.is_some()
    }
}

/// Inclusive-OR threshold rule
pub fn classify(features: &FeatureSet, thresholds: &Thresholds) -> bool {
    evaluate(features, thresholds).is_snore()
}

/// Same decision as `classify`, keeping the diagnostic detail
pub fn evaluate(features: &FeatureSet, thresholds: &Thresholds) -> Classification {
    let loud = features.rms_amplitude > thresholds.amplitude_threshold;
    let in_band = features.band_energy > thresholds.band_energy_threshold;

    let reason = match (loud, in_band) {
        (true, true) => Some(DetectionReason::Both),
        (true, false) => Some(DetectionReason::Amplitude),
        (false, true) => Some(DetectionReason::BandEnergy),
        (false, false) => None,
    };

    Classification {
        features: *features,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rms_amplitude: f64, band_energy: f64) -> FeatureSet {
        FeatureSet {
            rms_amplitude,
            band_energy,
        }
    }

    #[test]
    fn test_default_thresholds_validate() {
        assert!(Thresholds::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut thresholds = Thresholds::default();
        thresholds.amplitude_threshold = -0.1;
        assert!(thresholds.validate().is_err());

        let mut thresholds = Thresholds::default();
        thresholds.band_energy_threshold = f64::NAN;
        assert!(thresholds.validate().is_err());

        let mut thresholds = Thresholds::default();
        thresholds.frequency_band = FrequencyBand::new(1000.0, 100.0);
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_silence_is_not_snore() {
        assert!(!classify(&features(0.0, 0.0), &Thresholds::default()));
    }

    #[test]
    fn test_either_feature_is_sufficient() {
        let thresholds = Thresholds::default();

        assert!(classify(&features(0.2, 0.0), &thresholds));
        assert!(classify(&features(0.0, 12.0), &thresholds));
        assert!(classify(&features(0.2, 12.0), &thresholds));
    }

    #[test]
    fn test_thresholds_are_strict() {
        let thresholds = Thresholds::default();

        assert!(!classify(&features(0.1, 10.0), &thresholds));
    }

    #[test]
    fn test_evaluate_reports_reason() {
        let thresholds = Thresholds::default();

        assert_eq!(
            evaluate(&features(0.2, 0.0), &thresholds).reason,
            Some(DetectionReason::Amplitude)
        );
        assert_eq!(
            evaluate(&features(0.0, 11.0), &thresholds).reason,
            Some(DetectionReason::BandEnergy)
        );
        assert_eq!(
            evaluate(&features(0.5, 11.0), &thresholds).reason,
            Some(DetectionReason::Both)
        );

        let quiet = evaluate(&features(0.05, 1.0), &thresholds);
        assert_eq!(quiet.reason, None);
        assert!(!quiet.is_snore());
        assert_eq!(quiet.features, features(0.05, 1.0));
    }
}
