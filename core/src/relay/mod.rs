//! Circuit relay reservation accounting
//!
//! Server-side bookkeeping for reservations and circuits under hard
//! quotas, and a client-side keeper that refreshes its reservation
//! before expiry. Relay data forwarding itself rides on the mux layer
//! and is out of scope here.

pub mod client;
pub mod server;

pub use client::{ReservationIssuer, ReservationKeeper};
pub use server::{RelayConfig, RelayServer, RelayStats, Reservation};

use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(&'static str),
    #[error("No reservation for target peer")]
    NoReservation,
    #[error("Reservation expired")]
    ReservationExpired,
}
