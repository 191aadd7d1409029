//! Transport adapter contract
//!
//! What the beacon pipeline consumes from a physical medium: a medium
//! identifier, a characteristics record, beacon start/stop, and a
//! stream of raw discovery events. Real radios live outside this crate;
//! the loopback adapter below backs the integration tests.

use super::record::{OpaqueAddress, PhysicalFingerprint};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;

/// How beacons move on a medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Directionality {
    /// Transmit-only broadcast (one-way advertising)
    BroadcastOnly,
    /// Receive-only scanning
    ReceiveOnly,
    /// Both directions
    Bidirectional,
}

/// Physical properties of a beacon medium
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MediumCharacteristics {
    pub directionality: Directionality,
    /// Largest beacon payload the medium can carry
    pub max_beacon_size: usize,
    /// Usable range in meters (min, max)
    pub range_meters: (f64, f64),
    pub min_transmit_interval: Duration,
    pub min_listen_window: Duration,
    pub channel_count: u8,
    /// Relative energy cost in [0, 1]
    pub energy_cost: f64,
    pub supports_multi_packet_reception: bool,
}

impl MediumCharacteristics {
    /// BLE extended advertising
    pub fn ble() -> Self {
        Self {
            directionality: Directionality::Bidirectional,
            max_beacon_size: 255,
            range_meters: (0.0, 100.0),
            min_transmit_interval: Duration::from_millis(100),
            min_listen_window: Duration::from_millis(30),
            channel_count: 3,
            energy_cost: 0.3,
            supports_multi_packet_reception: false,
        }
    }

    pub fn wifi_direct() -> Self {
        Self {
            directionality: Directionality::Bidirectional,
            max_beacon_size: 1400,
            range_meters: (0.0, 200.0),
            min_transmit_interval: Duration::from_millis(500),
            min_listen_window: Duration::from_millis(200),
            channel_count: 1,
            energy_cost: 0.6,
            supports_multi_packet_reception: true,
        }
    }

    pub fn lora() -> Self {
        Self {
            directionality: Directionality::Bidirectional,
            max_beacon_size: 51,
            range_meters: (0.0, 10_000.0),
            min_transmit_interval: Duration::from_secs(10),
            min_listen_window: Duration::from_secs(1),
            channel_count: 8,
            energy_cost: 0.4,
            supports_multi_packet_reception: false,
        }
    }

    pub fn nfc() -> Self {
        Self {
            directionality: Directionality::Bidirectional,
            max_beacon_size: 4096,
            range_meters: (0.0, 0.1),
            min_transmit_interval: Duration::ZERO,
            min_listen_window: Duration::ZERO,
            channel_count: 1,
            energy_cost: 0.1,
            supports_multi_packet_reception: true,
        }
    }
}

/// A raw reception reported by an adapter, before any filtering
#[derive(Debug, Clone)]
pub struct RawDiscovery {
    pub payload: Vec<u8>,
    pub source_address: OpaqueAddress,
    pub timestamp: SystemTime,
    pub rssi: Option<f64>,
    pub medium_id: String,
    pub physical_fingerprint: Option<PhysicalFingerprint>,
}

/// Adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Beacon too large: {size} bytes (medium maximum {max})")]
    BeaconTooLarge { size: usize, max: usize },
    #[error("Adapter is shut down")]
    ShutDown,
}

/// Contract between the beacon pipeline and a physical medium
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn medium_id(&self) -> &str;

    fn characteristics(&self) -> MediumCharacteristics;

    /// Begin advertising `payload` until replaced or stopped
    async fn start_beacon(&self, payload: &[u8]) -> Result<(), AdapterError>;

    async fn stop_beacon(&self) -> Result<(), AdapterError>;

    /// Take the single-consumer discovery stream. Returns `None` after
    /// the first call or after shutdown.
    fn take_discoveries(&self) -> Option<mpsc::Receiver<RawDiscovery>>;

    /// Stop the adapter and finish the discovery stream
    async fn shutdown(&self);
}

/// In-memory adapter pair: beacons started on one side surface as raw
/// discoveries on the other
pub struct LoopbackAdapter {
    medium_id: String,
    characteristics: MediumCharacteristics,
    local_address: OpaqueAddress,
    rssi: Option<f64>,
    fingerprint: Option<PhysicalFingerprint>,
    peer_tx: Mutex<Option<mpsc::Sender<RawDiscovery>>>,
    local_rx: Mutex<Option<mpsc::Receiver<RawDiscovery>>>,
}

impl LoopbackAdapter {
    /// Create a connected pair sharing one medium
    pub fn pair(
        medium_id: &str,
        characteristics: MediumCharacteristics,
    ) -> (LoopbackAdapter, LoopbackAdapter) {
        let (a_tx, a_rx) = mpsc::channel(64);
        let (b_tx, b_rx) = mpsc::channel(64);
        let a = LoopbackAdapter {
            medium_id: medium_id.to_string(),
            characteristics: characteristics.clone(),
            local_address: OpaqueAddress::new(medium_id, vec![0xA0]),
            rssi: Some(-55.0),
            fingerprint: None,
            peer_tx: Mutex::new(Some(b_tx)),
            local_rx: Mutex::new(Some(a_rx)),
        };
        let b = LoopbackAdapter {
            medium_id: medium_id.to_string(),
            characteristics,
            local_address: OpaqueAddress::new(medium_id, vec![0xB0]),
            rssi: Some(-55.0),
            fingerprint: None,
            peer_tx: Mutex::new(Some(a_tx)),
            local_rx: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }

    /// Attach a fingerprint to every discovery this side emits
    pub fn set_fingerprint(&mut self, fingerprint: Option<PhysicalFingerprint>) {
        self.fingerprint = fingerprint;
    }

    pub fn set_rssi(&mut self, rssi: Option<f64>) {
        self.rssi = rssi;
    }
}

#[async_trait]
impl TransportAdapter for LoopbackAdapter {
    fn medium_id(&self) -> &str {
        &self.medium_id
    }

    fn characteristics(&self) -> MediumCharacteristics {
        self.characteristics.clone()
    }

    async fn start_beacon(&self, payload: &[u8]) -> Result<(), AdapterError> {
        let max = self.characteristics.max_beacon_size;
        if payload.len() > max {
            return Err(AdapterError::BeaconTooLarge {
                size: payload.len(),
                max,
            });
        }
        let tx = self
            .peer_tx
            .lock()
            .clone()
            .ok_or(AdapterError::ShutDown)?;
        let discovery = RawDiscovery {
            payload: payload.to_vec(),
            source_address: self.local_address.clone(),
            timestamp: SystemTime::now(),
            rssi: self.rssi,
            medium_id: self.medium_id.clone(),
            physical_fingerprint: self.fingerprint.clone(),
        };
        tx.send(discovery).await.map_err(|_| AdapterError::ShutDown)
    }

    async fn stop_beacon(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn take_discoveries(&self) -> Option<mpsc::Receiver<RawDiscovery>> {
        self.local_rx.lock().take()
    }

    async fn shutdown(&self) {
        self.peer_tx.lock().take();
        self.local_rx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_serialize_roundtrip() {
        let characteristics = MediumCharacteristics::lora();
        let json = serde_json::to_string(&characteristics).expect("serialization");
        let restored: MediumCharacteristics = serde_json::from_str(&json).expect("deserialization");
        assert_eq!(restored.max_beacon_size, characteristics.max_beacon_size);
        assert_eq!(restored.directionality, characteristics.directionality);
        assert_eq!(restored.channel_count, 8);
    }

    #[tokio::test]
    async fn test_loopback_delivers_to_peer() {
        let (a, b) = LoopbackAdapter::pair("ble", MediumCharacteristics::ble());
        let mut b_rx = b.take_discoveries().expect("stream available once");

        a.start_beacon(&[0xD0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).await.unwrap();
        let discovery = b_rx.recv().await.unwrap();
        assert_eq!(discovery.medium_id, "ble");
        assert_eq!(discovery.payload.len(), 10);
        assert_eq!(discovery.source_address.raw, vec![0xA0]);
    }

    #[tokio::test]
    async fn test_oversized_beacon_rejected() {
        let (a, _b) = LoopbackAdapter::pair("lora", MediumCharacteristics::lora());
        let result = a.start_beacon(&vec![0u8; 52]).await;
        match result {
            Err(AdapterError::BeaconTooLarge { size, max }) => {
                assert_eq!(size, 52);
                assert_eq!(max, 51);
            }
            other => panic!("expected BeaconTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_discovery_stream_single_consumer() {
        let (a, _b) = LoopbackAdapter::pair("ble", MediumCharacteristics::ble());
        assert!(a.take_discoveries().is_some());
        assert!(a.take_discoveries().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_finishes_stream() {
        let (a, b) = LoopbackAdapter::pair("ble", MediumCharacteristics::ble());
        let mut b_rx = b.take_discoveries().unwrap();

        b.shutdown().await;
        a.shutdown().await;
        assert!(matches!(
            a.start_beacon(&[0u8; 10]).await,
            Err(AdapterError::ShutDown)
        ));
        assert!(b_rx.recv().await.is_none());
    }
}
