//! Aggregation ingest pipeline
//!
//! Consumes admitted beacon events, maintains the two-layer peer store,
//! recomputes presence scores, and emits results on a single-consumer
//! stream. Tier-3 envelope failures and identity mismatches are silent
//! drops per the layering policy.

use super::presence::{presence_score, FreshnessFunction};
use super::record::{
    BeaconObservation, BeaconPeerRecord, ConfirmedPeerRecord, Envelope, OpaqueAddress,
    PhysicalFingerprint, UnconfirmedSighting, DEFAULT_RECORD_TTL, PEER_RECORD_DOMAIN,
};
use super::rssi::RssiSmoother;
use super::store::BeaconPeerStore;
use super::wire::{BeaconTier, DecodedBeacon, Tier3Beacon};
use super::adapter::RawDiscovery;
use crate::crypto::PeerId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;

/// One admitted beacon, normalized for aggregation
#[derive(Debug, Clone)]
pub struct BeaconDiscoveryEvent {
    pub tier: BeaconTier,
    pub trunc_id: Option<u16>,
    pub full_peer_id: Option<PeerId>,
    /// Medium the beacon arrived on
    pub source: String,
    pub rssi: Option<f64>,
    pub fingerprint: Option<PhysicalFingerprint>,
    pub timestamp: SystemTime,
    pub envelope: Option<Envelope>,
    pub address: OpaqueAddress,
}

impl BeaconDiscoveryEvent {
    /// Bridge a decoded beacon and its raw reception into an event
    pub fn from_decoded(decoded: &DecodedBeacon, raw: &RawDiscovery) -> Self {
        let (full_peer_id, envelope) = match decoded {
            DecodedBeacon::Tier3(Tier3Beacon {
                peer_id, envelope, ..
            }) => (Some(peer_id.clone()), Some(envelope.clone())),
            _ => (None, None),
        };
        Self {
            tier: decoded.tier(),
            trunc_id: decoded.trunc_id(),
            full_peer_id,
            source: raw.medium_id.clone(),
            rssi: raw.rssi,
            fingerprint: raw.physical_fingerprint.clone(),
            timestamp: raw.timestamp,
            envelope,
            address: raw.source_address.clone(),
        }
    }
}

/// What the pipeline did with an event
#[derive(Debug, Clone)]
pub enum AggregationResult {
    NewSighting(UnconfirmedSighting),
    SightingUpdated(UnconfirmedSighting),
    NewConfirmed(ConfirmedPeerRecord),
    ConfirmedUpdated(ConfirmedPeerRecord),
    /// An unconfirmed sighting was promoted to a confirmed record
    Promoted(ConfirmedPeerRecord),
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Aggregator is shut down")]
    ShutDown,
}

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// TTL applied to freshly confirmed records
    pub record_ttl: Duration,
    /// Capacity of the result stream
    pub channel_capacity: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            record_ttl: DEFAULT_RECORD_TTL,
            channel_capacity: 64,
        }
    }
}

/// The ingest pipeline
pub struct Aggregator {
    config: AggregationConfig,
    store: Arc<dyn BeaconPeerStore>,
    smoother: Mutex<RssiSmoother>,
    tx: Mutex<Option<mpsc::Sender<AggregationResult>>>,
    rx: Mutex<Option<mpsc::Receiver<AggregationResult>>>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn BeaconPeerStore>, config: AggregationConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        Self {
            config,
            store,
            smoother: Mutex::new(RssiSmoother::default()),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the single-consumer result stream. `None` after the first
    /// call.
    pub fn events(&self) -> Option<mpsc::Receiver<AggregationResult>> {
        self.rx.lock().take()
    }

    /// Finish the result stream. Subsequent ingests fail; a second
    /// shutdown is a no-op.
    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            tracing::info!("aggregation pipeline shut down");
        }
    }

    /// Process one admitted beacon event
    pub async fn ingest(&self, event: BeaconDiscoveryEvent) -> Result<(), AggregationError> {
        let result = match event.tier {
            BeaconTier::Tier1 | BeaconTier::Tier2 => self.ingest_sighting(event),
            BeaconTier::Tier3 => self.ingest_confirmed(event),
        };
        match result {
            Some(result) => self.emit(result).await,
            None => Ok(()),
        }
    }

    async fn emit(&self, result: AggregationResult) -> Result<(), AggregationError> {
        let tx = self.tx.lock().clone().ok_or(AggregationError::ShutDown)?;
        tx.send(result).await.map_err(|_| AggregationError::ShutDown)
    }

    fn observation(&self, event: &BeaconDiscoveryEvent) -> BeaconObservation {
        let rssi = event
            .rssi
            .map(|raw| self.smoother.lock().smooth(&event.address, raw));
        BeaconObservation {
            timestamp: event.timestamp,
            medium_id: event.source.clone(),
            rssi,
            address: event.address.clone(),
            freshness: FreshnessFunction::for_medium(&event.source),
        }
    }

    fn ingest_sighting(&self, event: BeaconDiscoveryEvent) -> Option<AggregationResult> {
        let trunc_id = event.trunc_id?;
        let observation = self.observation(&event);

        if let Some(mut sighting) = self.store.sightings(trunc_id).into_iter().next() {
            if !sighting.addresses.contains(&observation.address) {
                sighting.addresses.push(observation.address.clone());
            }
            sighting.observations.push(observation);
            sighting.presence_score = presence_score(&sighting.observations, event.timestamp);
            self.store.add_sighting(sighting.clone());
            return Some(AggregationResult::SightingUpdated(sighting));
        }

        let mut sighting = UnconfirmedSighting::new(trunc_id, observation);
        sighting.presence_score = presence_score(&sighting.observations, event.timestamp);
        self.store.add_sighting(sighting.clone());
        Some(AggregationResult::NewSighting(sighting))
    }

    fn ingest_confirmed(&self, event: BeaconDiscoveryEvent) -> Option<AggregationResult> {
        let envelope = event.envelope.clone()?;

        // Invalid signatures and identity mismatches drop silently
        let payload = match envelope.open(PEER_RECORD_DOMAIN) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::debug!(medium = %event.source, "tier-3 envelope failed verification");
                return None;
            }
        };
        let record = match BeaconPeerRecord::unmarshal(payload) {
            Ok(record) => record,
            Err(_) => return None,
        };
        if event.full_peer_id.as_ref() != Some(&record.peer_id) {
            tracing::debug!(medium = %event.source, "tier-3 peer ID mismatch");
            return None;
        }

        let observation = self.observation(&event);
        let epoch = record.seq;

        if let Some(mut existing) = self.store.get(&record.peer_id) {
            if !existing.addresses.contains(&observation.address) {
                existing.addresses.push(observation.address.clone());
            }
            existing.observations.push(observation);
            existing.presence_score = presence_score(&existing.observations, event.timestamp);
            existing.certificate = envelope;
            existing.epoch = epoch;
            // expires_at deliberately preserved
            self.store.upsert(existing.clone());
            return Some(AggregationResult::ConfirmedUpdated(existing));
        }

        let mut addresses = record.addresses.clone();
        if !addresses.contains(&observation.address) {
            addresses.push(observation.address.clone());
        }
        let mut confirmed = ConfirmedPeerRecord {
            peer_id: record.peer_id.clone(),
            addresses,
            observations: vec![observation],
            presence_score: 0.0,
            certificate: envelope,
            epoch,
            expires_at: event.timestamp + self.config.record_ttl,
        };

        // A matching sighting gets promoted: its history carries over
        // and the sighting itself is removed in the same store step.
        let promoted = event
            .trunc_id
            .and_then(|tid| self.store.sightings(tid).into_iter().next())
            .map(|sighting| {
                let trunc_id = sighting.trunc_id;
                for address in sighting.addresses {
                    if !confirmed.addresses.contains(&address) {
                        confirmed.addresses.push(address);
                    }
                }
                confirmed.observations.extend(sighting.observations);
                trunc_id
            });

        confirmed.presence_score = presence_score(&confirmed.observations, event.timestamp);

        match promoted {
            Some(trunc_id) => {
                self.store.promote_sighting(trunc_id, confirmed.clone());
                Some(AggregationResult::Promoted(confirmed))
            }
            None => {
                self.store.upsert(confirmed.clone());
                Some(AggregationResult::NewConfirmed(confirmed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::store::MemoryBeaconPeerStore;
    use crate::beacon::wire::Tier3Beacon;
    use crate::crypto::KeyPair;

    fn aggregator() -> (Aggregator, mpsc::Receiver<AggregationResult>, Arc<MemoryBeaconPeerStore>) {
        let store = Arc::new(MemoryBeaconPeerStore::new());
        let aggregator = Aggregator::new(store.clone(), AggregationConfig::default());
        let events = aggregator.events().expect("stream available");
        (aggregator, events, store)
    }

    fn tier1_event(trunc_id: u16, address_tag: u8) -> BeaconDiscoveryEvent {
        BeaconDiscoveryEvent {
            tier: BeaconTier::Tier1,
            trunc_id: Some(trunc_id),
            full_peer_id: None,
            source: "ble".to_string(),
            rssi: Some(-60.0),
            fingerprint: None,
            timestamp: SystemTime::now(),
            envelope: None,
            address: OpaqueAddress::new("ble", vec![address_tag]),
        }
    }

    fn tier3_event(keys: &KeyPair, seq: u64, trunc_id: Option<u16>) -> BeaconDiscoveryEvent {
        let beacon = Tier3Beacon::new(keys, seq, vec![], 0x0102_0304).unwrap();
        BeaconDiscoveryEvent {
            tier: BeaconTier::Tier3,
            trunc_id,
            full_peer_id: Some(keys.peer_id()),
            source: "wifi-direct".to_string(),
            rssi: None,
            fingerprint: None,
            timestamp: SystemTime::now(),
            envelope: Some(beacon.envelope),
            address: OpaqueAddress::new("wifi-direct", vec![0xEE]),
        }
    }

    #[tokio::test]
    async fn test_new_then_updated_sighting() {
        let (aggregator, mut events, store) = aggregator();

        aggregator.ingest(tier1_event(0x1234, 1)).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            AggregationResult::NewSighting(_)
        ));

        aggregator.ingest(tier1_event(0x1234, 2)).await.unwrap();
        match events.recv().await.unwrap() {
            AggregationResult::SightingUpdated(sighting) => {
                assert_eq!(sighting.observations.len(), 2);
                assert_eq!(sighting.addresses.len(), 2);
                assert!(sighting.presence_score > 0.0);
            }
            other => panic!("expected SightingUpdated, got {other:?}"),
        }
        assert_eq!(store.sighting_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_address_deduped() {
        let (aggregator, mut events, _store) = aggregator();
        aggregator.ingest(tier1_event(0x1234, 1)).await.unwrap();
        aggregator.ingest(tier1_event(0x1234, 1)).await.unwrap();
        events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            AggregationResult::SightingUpdated(sighting) => {
                assert_eq!(sighting.addresses.len(), 1);
                assert_eq!(sighting.observations.len(), 2);
            }
            other => panic!("expected SightingUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tier1_without_trunc_id_dropped() {
        let (aggregator, mut events, _store) = aggregator();
        let mut event = tier1_event(0, 1);
        event.trunc_id = None;
        aggregator.ingest(event).await.unwrap();
        aggregator.shutdown();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tier3_new_confirmed() {
        let (aggregator, mut events, store) = aggregator();
        let keys = KeyPair::from_seed(&[0x20; 32]);

        aggregator.ingest(tier3_event(&keys, 5, None)).await.unwrap();
        match events.recv().await.unwrap() {
            AggregationResult::NewConfirmed(record) => {
                assert_eq!(record.peer_id, keys.peer_id());
                assert_eq!(record.epoch, 5);
            }
            other => panic!("expected NewConfirmed, got {other:?}"),
        }
        assert!(store.get(&keys.peer_id()).is_some());
    }

    #[tokio::test]
    async fn test_tier3_update_preserves_expiry() {
        let (aggregator, mut events, store) = aggregator();
        let keys = KeyPair::from_seed(&[0x21; 32]);

        aggregator.ingest(tier3_event(&keys, 1, None)).await.unwrap();
        events.recv().await.unwrap();
        let first_expiry = store.get(&keys.peer_id()).unwrap().expires_at;

        aggregator.ingest(tier3_event(&keys, 2, None)).await.unwrap();
        match events.recv().await.unwrap() {
            AggregationResult::ConfirmedUpdated(record) => {
                assert_eq!(record.epoch, 2);
                assert_eq!(record.expires_at, first_expiry);
                assert_eq!(record.observations.len(), 2);
            }
            other => panic!("expected ConfirmedUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tier3_promotes_matching_sighting() {
        let (aggregator, mut events, store) = aggregator();
        let keys = KeyPair::from_seed(&[0x22; 32]);

        aggregator.ingest(tier1_event(0x4242, 1)).await.unwrap();
        events.recv().await.unwrap();
        assert_eq!(store.sighting_count(), 1);

        aggregator
            .ingest(tier3_event(&keys, 1, Some(0x4242)))
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            AggregationResult::Promoted(record) => {
                assert_eq!(record.peer_id, keys.peer_id());
                // Sighting history was carried over
                assert_eq!(record.observations.len(), 2);
            }
            other => panic!("expected Promoted, got {other:?}"),
        }
        assert_eq!(store.sighting_count(), 0);
    }

    #[tokio::test]
    async fn test_tier3_peer_mismatch_dropped() {
        let (aggregator, mut events, store) = aggregator();
        let keys = KeyPair::from_seed(&[0x23; 32]);
        let imposter = KeyPair::from_seed(&[0x24; 32]);

        let mut event = tier3_event(&keys, 1, None);
        event.full_peer_id = Some(imposter.peer_id());
        aggregator.ingest(event).await.unwrap();

        aggregator.shutdown();
        assert!(events.recv().await.is_none());
        assert!(store.all_confirmed().is_empty());
    }

    #[tokio::test]
    async fn test_tier3_bad_signature_dropped() {
        let (aggregator, mut events, store) = aggregator();
        let keys = KeyPair::from_seed(&[0x25; 32]);

        let mut event = tier3_event(&keys, 1, None);
        if let Some(envelope) = event.envelope.as_mut() {
            envelope.payload[0] ^= 0x01;
        }
        aggregator.ingest(event).await.unwrap();

        aggregator.shutdown();
        assert!(events.recv().await.is_none());
        assert!(store.all_confirmed().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_fails_ingest() {
        let (aggregator, mut events, _store) = aggregator();
        aggregator.shutdown();
        aggregator.shutdown();
        assert!(events.recv().await.is_none());
        assert!(matches!(
            aggregator.ingest(tier1_event(1, 1)).await,
            Err(AggregationError::ShutDown)
        ));
    }
}
