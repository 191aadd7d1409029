//! RSSI smoothing and signal-derived trust
//!
//! Raw RSSI readings are noisy; an exponential moving average per
//! address stabilizes them before they feed presence scoring. The trust
//! calculator maps smoothed RSSI to a per-medium confidence value.

use super::record::OpaqueAddress;
use std::collections::HashMap;

/// Default EMA smoothing factor
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Per-address exponential moving average of RSSI
#[derive(Debug)]
pub struct RssiSmoother {
    alpha: f64,
    state: HashMap<OpaqueAddress, f64>,
}

impl RssiSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: HashMap::new(),
        }
    }

    /// Feed a raw reading for an address and return the smoothed value.
    /// The first reading for an address is stored as-is.
    pub fn smooth(&mut self, address: &OpaqueAddress, raw: f64) -> f64 {
        let smoothed = match self.state.get(address) {
            Some(&previous) => self.alpha * raw + (1.0 - self.alpha) * previous,
            None => raw,
        };
        self.state.insert(address.clone(), smoothed);
        smoothed
    }

    /// Last smoothed value for an address, if any
    pub fn current(&self, address: &OpaqueAddress) -> Option<f64> {
        self.state.get(address).copied()
    }

    /// Drop all per-address state
    pub fn reset(&mut self) {
        self.state.clear();
    }
}

impl Default for RssiSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

/// Map a smoothed RSSI reading to a trust value for a medium.
///
/// Piecewise linear with clamps; media with no meaningful RSSI (NFC)
/// or unknown media get fixed values.
pub fn rssi_trust(medium_id: &str, rssi: Option<f64>) -> f64 {
    match medium_id {
        // Physical contact: maximum trust regardless of signal
        "nfc" => 1.0,
        "ble" => match rssi {
            Some(r) => ((r + 90.0) / 60.0).clamp(0.3, 1.0),
            None => 0.5,
        },
        "wifi-direct" => match rssi {
            Some(r) => ((r + 80.0) / 60.0).clamp(0.2, 0.8),
            None => 0.4,
        },
        "lora" => match rssi {
            Some(r) => ((r + 120.0) / 80.0).clamp(0.1, 0.5),
            None => 0.2,
        },
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> OpaqueAddress {
        OpaqueAddress::new("ble", vec![tag])
    }

    #[test]
    fn test_first_reading_stored_raw() {
        let mut smoother = RssiSmoother::default();
        assert_eq!(smoother.smooth(&addr(1), -70.0), -70.0);
    }

    #[test]
    fn test_ema_formula() {
        let mut smoother = RssiSmoother::new(0.3);
        smoother.smooth(&addr(1), -70.0);
        let second = smoother.smooth(&addr(1), -60.0);
        // 0.3 * -60 + 0.7 * -70 = -67
        assert!((second - (-67.0)).abs() < 1e-9);
    }

    #[test]
    fn test_addresses_independent() {
        let mut smoother = RssiSmoother::new(0.3);
        smoother.smooth(&addr(1), -90.0);
        assert_eq!(smoother.smooth(&addr(2), -40.0), -40.0);
        assert_eq!(smoother.current(&addr(1)), Some(-90.0));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut smoother = RssiSmoother::default();
        smoother.smooth(&addr(1), -55.0);
        smoother.reset();
        assert_eq!(smoother.current(&addr(1)), None);
        assert_eq!(smoother.smooth(&addr(1), -80.0), -80.0);
    }

    #[test]
    fn test_trust_nfc_always_full() {
        assert_eq!(rssi_trust("nfc", Some(-100.0)), 1.0);
        assert_eq!(rssi_trust("nfc", None), 1.0);
    }

    #[test]
    fn test_trust_ble_curve() {
        // Clamped low
        assert_eq!(rssi_trust("ble", Some(-95.0)), 0.3);
        // Midpoint: (-60 + 90) / 60 = 0.5
        assert!((rssi_trust("ble", Some(-60.0)) - 0.5).abs() < 1e-9);
        // Clamped high
        assert_eq!(rssi_trust("ble", Some(-20.0)), 1.0);
        // Missing
        assert_eq!(rssi_trust("ble", None), 0.5);
    }

    #[test]
    fn test_trust_wifi_direct_and_lora_bounds() {
        assert_eq!(rssi_trust("wifi-direct", Some(-100.0)), 0.2);
        assert_eq!(rssi_trust("wifi-direct", Some(0.0)), 0.8);
        assert_eq!(rssi_trust("wifi-direct", None), 0.4);

        assert_eq!(rssi_trust("lora", Some(-130.0)), 0.1);
        assert_eq!(rssi_trust("lora", Some(-40.0)), 0.5);
        assert_eq!(rssi_trust("lora", None), 0.2);
    }

    #[test]
    fn test_trust_unknown_medium() {
        assert_eq!(rssi_trust("tin-can-telephone", Some(-10.0)), 0.5);
        assert_eq!(rssi_trust("tin-can-telephone", None), 0.5);
    }
}
