//! Client-side reservation upkeep
//!
//! Holds the current reservation and refreshes it at half its remaining
//! lifetime, retrying on failure. The refresh task stops promptly on
//! shutdown.

use super::server::{RelayServer, Reservation};
use super::RelayError;
use crate::beacon::record::OpaqueAddress;
use crate::crypto::PeerId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Whoever can grant reservations (in process, or a network client)
#[async_trait]
pub trait ReservationIssuer: Send + Sync {
    async fn reserve(
        &self,
        peer: PeerId,
        addresses: Vec<OpaqueAddress>,
    ) -> Result<Reservation, RelayError>;
}

#[async_trait]
impl ReservationIssuer for RelayServer {
    async fn reserve(
        &self,
        peer: PeerId,
        addresses: Vec<OpaqueAddress>,
    ) -> Result<Reservation, RelayError> {
        RelayServer::reserve(self, peer, addresses, None, SystemTime::now())
    }
}

/// Refresh policy
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// How long to wait before retrying after a failed refresh
    pub retry_interval: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(10),
        }
    }
}

/// Keeps one reservation alive until shut down
pub struct ReservationKeeper {
    current: Arc<RwLock<Option<Reservation>>>,
    shutdown_tx: watch::Sender<bool>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ReservationKeeper {
    /// Reserve immediately and keep refreshing in the background
    pub fn start(
        issuer: Arc<dyn ReservationIssuer>,
        peer: PeerId,
        addresses: Vec<OpaqueAddress>,
        config: KeeperConfig,
    ) -> Self {
        let current = Arc::new(RwLock::new(None));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task_state = current.clone();
        let task = tokio::spawn(async move {
            loop {
                let sleep_for = match issuer.reserve(peer.clone(), addresses.clone()).await {
                    Ok(reservation) => {
                        let remaining = reservation
                            .expiration
                            .duration_since(SystemTime::now())
                            .unwrap_or(Duration::ZERO);
                        tracing::debug!(peer = %reservation.peer, ?remaining, "reservation refreshed");
                        *task_state.write() = Some(reservation);
                        // Refresh at half the remaining lifetime
                        (remaining / 2).max(config.retry_interval)
                    }
                    Err(error) => {
                        tracing::warn!(%error, "reservation refresh failed");
                        config.retry_interval
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self {
            current,
            shutdown_tx,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// The reservation currently held, if any
    pub fn current(&self) -> Option<Reservation> {
        self.current.read().clone()
    }

    /// Stop refreshing. Idempotent; waits for the task to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::server::{RelayConfig, RelayServer};
    use super::*;
    use crate::crypto::KeyPair;

    #[tokio::test]
    async fn test_keeper_obtains_reservation() {
        let server = Arc::new(RelayServer::default());
        let peer = KeyPair::from_seed(&[1u8; 32]).peer_id();
        let keeper = ReservationKeeper::start(
            server.clone(),
            peer.clone(),
            vec![OpaqueAddress::new("ble", vec![1])],
            KeeperConfig::default(),
        );

        // Give the refresh task a chance to run
        for _ in 0..50 {
            if keeper.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let reservation = keeper.current().expect("reservation obtained");
        assert_eq!(reservation.peer, peer);
        assert!(server.has_reservation(&peer, SystemTime::now()));

        keeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_refreshes_before_expiry() {
        let server = Arc::new(RelayServer::new(RelayConfig {
            reservation_ttl: Duration::from_secs(60),
            ..RelayConfig::default()
        }));
        let peer = KeyPair::from_seed(&[2u8; 32]).peer_id();
        let keeper = ReservationKeeper::start(
            server.clone(),
            peer.clone(),
            vec![],
            KeeperConfig::default(),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        // More than one grant happened inside two TTLs
        assert!(server.stats().reservations_granted >= 2);
        keeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let server = Arc::new(RelayServer::default());
        let keeper = ReservationKeeper::start(
            server,
            KeyPair::from_seed(&[3u8; 32]).peer_id(),
            vec![],
            KeeperConfig::default(),
        );
        keeper.shutdown().await;
        keeper.shutdown().await;
        // A second start would be a new keeper; current survives shutdown
        let _ = keeper.current();
    }
}
