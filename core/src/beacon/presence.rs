//! Freshness decay and Bayesian presence scoring
//!
//! Each observation contributes an independent probability of presence
//! that halves every `half_life`; the aggregate is the Noisy-OR of all
//! contributions.

use super::record::BeaconObservation;
use std::time::{Duration, SystemTime};

/// Exponential freshness decay for one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessFunction {
    /// Weight at age zero, in [0, 1]
    pub initial_weight: f64,
    /// Age at which the weight has halved
    pub half_life: Duration,
}

impl FreshnessFunction {
    pub fn new(initial_weight: f64, half_life: Duration) -> Self {
        Self {
            initial_weight: initial_weight.clamp(0.0, 1.0),
            half_life,
        }
    }

    /// Preset per medium, reflecting how long a sighting on that medium
    /// stays meaningful.
    pub fn for_medium(medium_id: &str) -> Self {
        let (weight, half_life_secs) = match medium_id {
            "nfc" => (1.0, 30),
            "ble" => (0.8, 60),
            "wifi-direct" => (0.7, 120),
            "lora" => (0.5, 300),
            "gossip" => (0.3, 180),
            "store-carry-forward" => (0.2, 600),
            // Unknown media decay like gossip relays
            _ => (0.3, 180),
        };
        Self::new(weight, Duration::from_secs(half_life_secs))
    }

    /// Evaluate the decayed weight at `age`
    pub fn evaluate(&self, age: Duration) -> f64 {
        if self.half_life.is_zero() {
            return 0.0;
        }
        let exponent = age.as_secs_f64() / self.half_life.as_secs_f64();
        self.initial_weight * 0.5_f64.powf(exponent)
    }
}

/// Noisy-OR presence score over a set of observations at time `now`.
///
/// Treats each observation as an independent probability of presence:
/// `1 - prod(1 - f_i)`. Empty input scores 0.
pub fn presence_score(observations: &[BeaconObservation], now: SystemTime) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    let mut absent = 1.0;
    for obs in observations {
        let age = now
            .duration_since(obs.timestamp)
            .unwrap_or(Duration::ZERO);
        absent *= 1.0 - obs.freshness.evaluate(age);
    }
    1.0 - absent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::record::OpaqueAddress;

    fn observation_at(timestamp: SystemTime, medium: &str) -> BeaconObservation {
        BeaconObservation {
            timestamp,
            medium_id: medium.to_string(),
            rssi: None,
            address: OpaqueAddress::new(medium, vec![1, 2, 3]),
            freshness: FreshnessFunction::for_medium(medium),
        }
    }

    #[test]
    fn test_freshness_half_life() {
        let f = FreshnessFunction::new(0.8, Duration::from_secs(60));
        let half = f.evaluate(Duration::from_secs(60));
        let quarter = f.evaluate(Duration::from_secs(120));
        assert!((half - 0.4).abs() < 1e-9);
        assert!((quarter - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_monotone_non_increasing() {
        let f = FreshnessFunction::for_medium("ble");
        let mut previous = f.evaluate(Duration::ZERO);
        for secs in (0..600).step_by(10) {
            let current = f.evaluate(Duration::from_secs(secs));
            assert!(current <= previous + 1e-12);
            previous = current;
        }
    }

    #[test]
    fn test_freshness_zero_half_life() {
        let f = FreshnessFunction::new(1.0, Duration::ZERO);
        assert_eq!(f.evaluate(Duration::ZERO), 0.0);
        assert_eq!(f.evaluate(Duration::from_secs(10)), 0.0);
    }

    #[test]
    fn test_presence_empty_is_zero() {
        assert_eq!(presence_score(&[], SystemTime::now()), 0.0);
    }

    #[test]
    fn test_presence_stays_below_one() {
        let now = SystemTime::now();
        let observations: Vec<_> = (0..50).map(|_| observation_at(now, "ble")).collect();
        let score = presence_score(&observations, now);
        assert!(score < 1.0);
        assert!(score > 0.99);
    }

    #[test]
    fn test_presence_never_decreases_when_adding_fresh() {
        let now = SystemTime::now();
        let mut observations = vec![observation_at(now - Duration::from_secs(90), "ble")];
        let before = presence_score(&observations, now);
        observations.push(observation_at(now, "ble"));
        let after = presence_score(&observations, now);
        assert!(after >= before);
    }

    #[test]
    fn test_presence_nfc_dominates() {
        let now = SystemTime::now();
        let nfc = presence_score(&[observation_at(now, "nfc")], now);
        let lora = presence_score(&[observation_at(now, "lora")], now);
        assert!(nfc > lora);
        assert!((nfc - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_medium_presets() {
        assert_eq!(
            FreshnessFunction::for_medium("nfc"),
            FreshnessFunction::new(1.0, Duration::from_secs(30))
        );
        assert_eq!(
            FreshnessFunction::for_medium("store-carry-forward"),
            FreshnessFunction::new(0.2, Duration::from_secs(600))
        );
        // Unknown media fall back to the gossip preset
        assert_eq!(
            FreshnessFunction::for_medium("carrier-pigeon"),
            FreshnessFunction::for_medium("gossip")
        );
    }
}
