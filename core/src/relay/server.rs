//! Relay server accounting
//!
//! Tracks who may be relayed to (reservations) and how much relaying is
//! in flight (circuits), enforcing per-peer and global quotas.

use super::RelayError;
use crate::beacon::record::{Envelope, OpaqueAddress};
use crate::crypto::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Relay server quotas
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_reservations: usize,
    pub max_circuits_per_peer: usize,
    pub max_circuits: usize,
    pub reservation_ttl: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_reservations: 128,
            max_circuits_per_peer: 16,
            max_circuits: 1024,
            reservation_ttl: Duration::from_secs(3600),
        }
    }
}

/// A granted reservation
#[derive(Debug, Clone)]
pub struct Reservation {
    pub peer: PeerId,
    pub expiration: SystemTime,
    pub addresses: Vec<OpaqueAddress>,
    pub voucher: Option<Envelope>,
}

impl Reservation {
    pub fn is_valid(&self, now: SystemTime) -> bool {
        self.expiration > now
    }
}

/// Counters for observability
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub reservations_active: usize,
    pub circuits_active: usize,
    pub reservations_granted: u64,
    pub circuits_opened: u64,
    pub circuits_denied: u64,
}

#[derive(Default)]
struct Inner {
    reservations: HashMap<PeerId, Reservation>,
    circuit_counts: HashMap<PeerId, usize>,
    total_circuits: usize,
    reservations_granted: u64,
    circuits_opened: u64,
    circuits_denied: u64,
}

/// The relay server's accounting state
pub struct RelayServer {
    config: RelayConfig,
    inner: RwLock<Inner>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Grant or renew a reservation. Renewal is always allowed while
    /// the table is full; only new peers are refused at the cap.
    pub fn reserve(
        &self,
        peer: PeerId,
        addresses: Vec<OpaqueAddress>,
        voucher: Option<Envelope>,
        now: SystemTime,
    ) -> Result<Reservation, RelayError> {
        let mut inner = self.inner.write();
        let renewal = inner.reservations.contains_key(&peer);
        if !renewal && inner.reservations.len() >= self.config.max_reservations {
            return Err(RelayError::ResourceLimitExceeded("reservations"));
        }
        let reservation = Reservation {
            peer: peer.clone(),
            expiration: now + self.config.reservation_ttl,
            addresses,
            voucher,
        };
        inner.reservations.insert(peer, reservation.clone());
        inner.reservations_granted += 1;
        tracing::debug!(peer = %reservation.peer, renewal, "reservation granted");
        Ok(reservation)
    }

    /// Whether `peer` holds an unexpired reservation
    pub fn has_reservation(&self, peer: &PeerId, now: SystemTime) -> bool {
        self.inner
            .read()
            .reservations
            .get(peer)
            .map(|r| r.is_valid(now))
            .unwrap_or(false)
    }

    /// Open a circuit from `src` to `dst`. The target must hold a valid
    /// reservation; both endpoints count against the per-peer quota.
    pub fn open_circuit(
        &self,
        src: &PeerId,
        dst: &PeerId,
        now: SystemTime,
    ) -> Result<(), RelayError> {
        let mut inner = self.inner.write();

        match inner.reservations.get(dst) {
            None => {
                inner.circuits_denied += 1;
                return Err(RelayError::NoReservation);
            }
            Some(reservation) if !reservation.is_valid(now) => {
                inner.circuits_denied += 1;
                return Err(RelayError::ReservationExpired);
            }
            Some(_) => {}
        }
        if inner.total_circuits >= self.config.max_circuits {
            inner.circuits_denied += 1;
            return Err(RelayError::ResourceLimitExceeded("circuits"));
        }
        let src_count = inner.circuit_counts.get(src).copied().unwrap_or(0);
        let dst_count = inner.circuit_counts.get(dst).copied().unwrap_or(0);
        if src_count >= self.config.max_circuits_per_peer
            || dst_count >= self.config.max_circuits_per_peer
        {
            inner.circuits_denied += 1;
            return Err(RelayError::ResourceLimitExceeded("circuits per peer"));
        }

        *inner.circuit_counts.entry(src.clone()).or_insert(0) += 1;
        *inner.circuit_counts.entry(dst.clone()).or_insert(0) += 1;
        inner.total_circuits += 1;
        inner.circuits_opened += 1;
        Ok(())
    }

    /// Close a previously opened circuit
    pub fn close_circuit(&self, src: &PeerId, dst: &PeerId) {
        let mut inner = self.inner.write();
        for peer in [src, dst] {
            if let Some(count) = inner.circuit_counts.get_mut(peer) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.circuit_counts.remove(peer);
                }
            }
        }
        inner.total_circuits = inner.total_circuits.saturating_sub(1);
    }

    /// Drop expired reservations; returns how many were evicted
    pub fn remove_expired(&self, now: SystemTime) -> usize {
        let mut inner = self.inner.write();
        let before = inner.reservations.len();
        inner.reservations.retain(|_, r| r.is_valid(now));
        before - inner.reservations.len()
    }

    pub fn stats(&self) -> RelayStats {
        let inner = self.inner.read();
        RelayStats {
            reservations_active: inner.reservations.len(),
            circuits_active: inner.total_circuits,
            reservations_granted: inner.reservations_granted,
            circuits_opened: inner.circuits_opened,
            circuits_denied: inner.circuits_denied,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn peer(seed: u8) -> PeerId {
        KeyPair::from_seed(&[seed; 32]).peer_id()
    }

    fn server(config: RelayConfig) -> RelayServer {
        RelayServer::new(config)
    }

    #[test]
    fn test_reserve_and_query() {
        let relay = RelayServer::default();
        let now = SystemTime::now();
        let reservation = relay.reserve(peer(1), vec![], None, now).unwrap();

        assert!(reservation.is_valid(now));
        assert!(relay.has_reservation(&peer(1), now));
        assert!(!relay.has_reservation(&peer(2), now));
        assert_eq!(relay.stats().reservations_active, 1);
    }

    #[test]
    fn test_reservation_cap_allows_renewal() {
        let relay = server(RelayConfig {
            max_reservations: 2,
            ..RelayConfig::default()
        });
        let now = SystemTime::now();
        relay.reserve(peer(1), vec![], None, now).unwrap();
        relay.reserve(peer(2), vec![], None, now).unwrap();

        // New peer at the cap: refused
        assert!(matches!(
            relay.reserve(peer(3), vec![], None, now),
            Err(RelayError::ResourceLimitExceeded("reservations"))
        ));
        // Renewal of an existing peer: allowed
        assert!(relay.reserve(peer(1), vec![], None, now).is_ok());
    }

    #[test]
    fn test_circuit_requires_reservation() {
        let relay = RelayServer::default();
        let now = SystemTime::now();
        assert!(matches!(
            relay.open_circuit(&peer(1), &peer(2), now),
            Err(RelayError::NoReservation)
        ));

        relay.reserve(peer(2), vec![], None, now).unwrap();
        relay.open_circuit(&peer(1), &peer(2), now).unwrap();
        assert_eq!(relay.stats().circuits_active, 1);
    }

    #[test]
    fn test_expired_reservation_blocks_circuit() {
        let relay = RelayServer::default();
        let now = SystemTime::now();
        relay.reserve(peer(2), vec![], None, now).unwrap();

        let later = now + relay.config().reservation_ttl + Duration::from_secs(1);
        assert!(matches!(
            relay.open_circuit(&peer(1), &peer(2), later),
            Err(RelayError::ReservationExpired)
        ));
        assert!(!relay.has_reservation(&peer(2), later));
    }

    #[test]
    fn test_per_peer_circuit_quota() {
        let relay = server(RelayConfig {
            max_circuits_per_peer: 2,
            ..RelayConfig::default()
        });
        let now = SystemTime::now();
        relay.reserve(peer(9), vec![], None, now).unwrap();

        relay.open_circuit(&peer(1), &peer(9), now).unwrap();
        relay.open_circuit(&peer(2), &peer(9), now).unwrap();
        assert!(matches!(
            relay.open_circuit(&peer(3), &peer(9), now),
            Err(RelayError::ResourceLimitExceeded("circuits per peer"))
        ));

        // Closing frees quota
        relay.close_circuit(&peer(1), &peer(9));
        relay.open_circuit(&peer(3), &peer(9), now).unwrap();
    }

    #[test]
    fn test_global_circuit_quota() {
        let relay = server(RelayConfig {
            max_circuits: 1,
            ..RelayConfig::default()
        });
        let now = SystemTime::now();
        relay.reserve(peer(8), vec![], None, now).unwrap();
        relay.reserve(peer(9), vec![], None, now).unwrap();

        relay.open_circuit(&peer(1), &peer(8), now).unwrap();
        assert!(matches!(
            relay.open_circuit(&peer(2), &peer(9), now),
            Err(RelayError::ResourceLimitExceeded("circuits"))
        ));
        assert_eq!(relay.stats().circuits_denied, 1);
    }

    #[test]
    fn test_remove_expired_sweep() {
        let relay = RelayServer::default();
        let now = SystemTime::now();
        relay.reserve(peer(1), vec![], None, now).unwrap();
        relay
            .reserve(peer(2), vec![], None, now + Duration::from_secs(1800))
            .unwrap();

        let sweep_at = now + relay.config().reservation_ttl + Duration::from_secs(1);
        assert_eq!(relay.remove_expired(sweep_at), 1);
        assert!(relay.has_reservation(&peer(2), sweep_at));
    }
}
