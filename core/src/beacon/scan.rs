//! Scan coordination across media
//!
//! One Trickle timer per registered medium; transmit decisions and
//! consistency signals are delegated to the medium's timer.

use super::trickle::TrickleTimer;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maps medium IDs to their Trickle timers
#[derive(Debug, Default)]
pub struct ScanCoordinator {
    timers: HashMap<String, TrickleTimer>,
}

impl ScanCoordinator {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }

    /// Register a medium. Replaces any existing timer for the same ID.
    pub fn register_medium(&mut self, medium_id: impl Into<String>, timer: TrickleTimer) {
        self.timers.insert(medium_id.into(), timer);
    }

    pub fn unregister_medium(&mut self, medium_id: &str) {
        self.timers.remove(medium_id);
    }

    pub fn record_consistent(&mut self, medium_id: &str) {
        if let Some(timer) = self.timers.get_mut(medium_id) {
            timer.record_consistent();
        }
    }

    pub fn record_inconsistent(&mut self, medium_id: &str, now: Instant) {
        if let Some(timer) = self.timers.get_mut(medium_id) {
            timer.record_inconsistent(now);
        }
    }

    /// End-of-interval transmit decision for a medium. Unregistered
    /// media never transmit.
    pub fn should_transmit(&mut self, medium_id: &str, now: Instant) -> bool {
        match self.timers.get_mut(medium_id) {
            Some(timer) => timer.end_of_interval(now),
            None => false,
        }
    }

    /// Current interval for a medium, `None` when unregistered
    pub fn current_interval(&self, medium_id: &str) -> Option<Duration> {
        self.timers.get(medium_id).map(|t| t.current_interval())
    }

    pub fn registered_media(&self) -> Vec<&str> {
        self.timers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_timer() -> TrickleTimer {
        TrickleTimer::new(Duration::from_millis(100), Duration::from_secs(1), 1)
    }

    #[test]
    fn test_unregistered_medium_never_transmits() {
        let mut coordinator = ScanCoordinator::new();
        assert!(!coordinator.should_transmit("ble", Instant::now()));
        assert_eq!(coordinator.current_interval("ble"), None);
    }

    #[test]
    fn test_registered_medium_delegates() {
        let mut coordinator = ScanCoordinator::new();
        coordinator.register_medium("ble", fast_timer());
        assert_eq!(
            coordinator.current_interval("ble"),
            Some(Duration::from_millis(100))
        );

        // Quiet interval: transmit, then the interval doubles
        assert!(coordinator.should_transmit("ble", Instant::now()));
        assert_eq!(
            coordinator.current_interval("ble"),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_consistency_suppresses_transmit() {
        let mut coordinator = ScanCoordinator::new();
        coordinator.register_medium("lora", fast_timer());
        coordinator.record_consistent("lora");
        assert!(!coordinator.should_transmit("lora", Instant::now()));
    }

    #[test]
    fn test_registration_replaces_existing_timer() {
        let mut coordinator = ScanCoordinator::new();
        let mut warmed = fast_timer();
        warmed.end_of_interval(Instant::now());
        coordinator.register_medium("ble", warmed);
        assert_eq!(
            coordinator.current_interval("ble"),
            Some(Duration::from_millis(200))
        );

        coordinator.register_medium("ble", fast_timer());
        assert_eq!(
            coordinator.current_interval("ble"),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_inconsistent_on_unregistered_is_noop() {
        let mut coordinator = ScanCoordinator::new();
        coordinator.record_inconsistent("nfc", Instant::now());
        coordinator.record_consistent("nfc");
        assert!(coordinator.registered_media().is_empty());
    }
}
