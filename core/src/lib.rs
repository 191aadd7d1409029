//! Proxim — peer-to-peer proximity networking substrate
//!
//! Four cooperating subsystems turn raw radio events into confirmed,
//! signed peer records and raw byte pipes into multiplexed secure
//! channels:
//!
//! - [`crypto`]: hashing, key derivation, identity keys, X25519 with
//!   small-order rejection, and the low-level wire codecs
//! - [`beacon`]: tiered beacon wire format, micro proof-of-work,
//!   delayed key disclosure, ephemeral IDs, admission filtering,
//!   Trickle scheduling and Bayesian presence aggregation
//! - [`noise`]: the `Noise_XX_25519_ChaChaPoly_SHA256` handshake and
//!   authenticated transport framing
//! - [`mux`]: Yamux stream multiplexing with flow control, keep-alive
//!   and teardown
//!
//! plus the [`pnet`] pre-shared-key gate under everything and the
//! [`relay`] reservation accounting on top.
//!
//! Per-connection data flow:
//!
//! ```text
//! raw bytes <-> pnet <-> noise <-> mux <-> application streams
//! ```

pub mod beacon;
pub mod crypto;
pub mod mux;
pub mod noise;
pub mod pnet;
pub mod relay;

pub use beacon::{
    AggregationResult, Aggregator, BeaconDiscoveryEvent, BeaconError, BeaconPeerStore,
    ConfirmedPeerRecord, Envelope, MemoryBeaconPeerStore, OpaqueAddress, TransportAdapter,
};
pub use crypto::{CryptoError, KeyPair, PeerId};
pub use mux::{MuxError, YamuxConfig, YamuxConnection, YamuxMode, YamuxStream};
pub use noise::{handshake_initiator, handshake_responder, NoiseConnection, NoiseError};
pub use pnet::{PnetError, PreSharedKey, ProtectedConnection};
pub use relay::{RelayError, RelayServer, Reservation, ReservationKeeper};
