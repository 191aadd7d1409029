//! Tiered proximity beacon discovery
//!
//! Turns raw radio events into confirmed signed peer records: wire
//! encoding for the three beacon tiers, micro proof-of-work, delayed key
//! disclosure, ephemeral IDs, the admission filter, Trickle scheduling,
//! RSSI smoothing, Bayesian presence aggregation and the two-layer peer
//! record store.

pub mod adapter;
pub mod aggregation;
pub mod ephid;
pub mod filter;
pub mod pow;
pub mod presence;
pub mod record;
pub mod rssi;
pub mod scan;
pub mod store;
pub mod tesla;
pub mod trickle;
pub mod wire;

pub use adapter::{MediumCharacteristics, RawDiscovery, TransportAdapter};
pub use aggregation::{AggregationResult, Aggregator, BeaconDiscoveryEvent};
pub use record::{
    BeaconObservation, BeaconPeerRecord, ConfirmedPeerRecord, Envelope, OpaqueAddress,
    PhysicalFingerprint, UnconfirmedSighting,
};
pub use store::{BeaconPeerStore, MemoryBeaconPeerStore};
pub use wire::{BeaconTier, DecodedBeacon};

use thiserror::Error;

/// Errors for beacon encoding and record handling
#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("Invalid beacon format")]
    InvalidFormat,
    #[error("Payload too small: {max} bytes cannot fit any tier (minimum {min})")]
    PayloadTooSmall { max: usize, min: usize },
    #[error("Record creation failed: {0}")]
    RecordCreationFailed(String),
    #[error("Envelope signature invalid")]
    InvalidSignature,
    #[error("Envelope domain mismatch")]
    DomainMismatch,
    #[error("Field too long for wire encoding: {0} bytes")]
    FieldTooLong(usize),
}
