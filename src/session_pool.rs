// =============================================================================
// Gateway Session Pool — bounded set of sessions with distinct client ids
// =============================================================================
//
// The pool owns `size` slots. Slot `i` always uses client id
// `base_client_id + i`, and a slot is checked out by exactly one request at a
// time, so a client id is never used by two live sessions.
//
// Concurrency:
//   - a tokio `Semaphore` with `size` permits bounds concurrent checkouts;
//     every permit is matched by exactly one idle slot,
//   - a parking_lot `Mutex` guards the idle list and is never held across an
//     await point.
//
// Lifecycle per checkout:
//   pooled      — the session stays open and is handed to the next request;
//                 a session that reports itself disconnected is reopened.
//   per_request — the session is opened on checkout and closed on release.
// A session whose call failed at transport level is always closed.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::gateway::{ContractSpec, Gateway, GatewayError, GatewaySession, HistoricalQuery};
use crate::runtime_config::ServiceConfig;
use crate::types::{Bar, SessionPolicy};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub policy: SessionPolicy,
    pub size: usize,
    pub base_client_id: i32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self {
            policy: cfg.session.policy,
            size: cfg.session.pool_size.max(1),
            base_client_id: cfg.gateway.base_client_id,
            connect_timeout: cfg.gateway.connect_timeout(),
            acquire_timeout: cfg.session.acquire_timeout(),
        }
    }
}

/// Serialisable view of the pool for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub policy: SessionPolicy,
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Idle slots holding an open session.
    pub connected: usize,
    pub connects: u64,
    pub discarded: u64,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

struct Slot {
    client_id: i32,
    session: Option<Box<dyn GatewaySession>>,
}

struct Shared {
    idle: Mutex<Vec<Slot>>,
    closed: AtomicBool,
    discarded: AtomicU64,
}

/// Injectable manager of gateway sessions. Build once at startup, `close()`
/// on shutdown.
pub struct SessionPool {
    gateway: Arc<dyn Gateway>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
    connects: AtomicU64,
}

impl SessionPool {
    pub fn new(gateway: Arc<dyn Gateway>, settings: PoolSettings) -> Self {
        let size = settings.size.max(1);
        // Reversed so that `pop()` hands out the lowest client id first.
        let slots = (0..size)
            .rev()
            .map(|i| Slot {
                client_id: settings.base_client_id + i as i32,
                session: None,
            })
            .collect();

        info!(
            gateway = gateway.name(),
            policy = %settings.policy,
            size,
            base_client_id = settings.base_client_id,
            "session pool created"
        );

        Self {
            gateway,
            settings: PoolSettings { size, ..settings },
            permits: Arc::new(Semaphore::new(size)),
            shared: Arc::new(Shared {
                idle: Mutex::new(slots),
                closed: AtomicBool::new(false),
                discarded: AtomicU64::new(0),
            }),
            connects: AtomicU64::new(0),
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    /// Check out a connected session, waiting up to the acquire timeout for
    /// a free slot and up to the connect timeout for the handshake.
    pub async fn acquire(&self) -> Result<PooledSession, GatewayError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GatewayError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            self.settings.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(_)) => return Err(GatewayError::PoolClosed),
            Err(_) => {
                warn!(
                    waited_secs = self.settings.acquire_timeout.as_secs_f64(),
                    "no gateway session became free"
                );
                return Err(GatewayError::PoolExhausted(self.settings.acquire_timeout));
            }
        };

        let slot = self.shared.idle.lock().pop().ok_or(GatewayError::PoolClosed)?;

        // From here on the guard owns the slot, so it goes back to the idle
        // list even if this future is dropped mid-connect.
        let mut guard = PooledSession {
            slot: Some(slot),
            shared: self.shared.clone(),
            policy: self.settings.policy,
            healthy: true,
            _permit: permit,
        };

        if let Some(slot) = guard.slot.as_mut() {
            let stale = slot.session.as_ref().is_some_and(|s| !s.is_connected());
            if stale {
                warn!(client_id = slot.client_id, "pooled session went away, reconnecting");
                if let Some(mut s) = slot.session.take() {
                    s.disconnect();
                }
            }
            if slot.session.is_none() {
                slot.session = Some(self.connect(slot.client_id).await?);
            }
        }

        Ok(guard)
    }

    async fn connect(&self, client_id: i32) -> Result<Box<dyn GatewaySession>, GatewayError> {
        debug!(client_id, "opening gateway session");
        let session = tokio::time::timeout(
            self.settings.connect_timeout,
            self.gateway.connect(client_id),
        )
        .await
        .map_err(|_| {
            warn!(
                client_id,
                timeout_secs = self.settings.connect_timeout.as_secs_f64(),
                "gateway connect timed out"
            );
            GatewayError::ConnectTimeout(self.settings.connect_timeout)
        })??;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(session)
    }

    /// Open the first session ahead of traffic. Only meaningful for the
    /// pooled policy.
    pub async fn warm_up(&self) -> Result<(), GatewayError> {
        if self.settings.policy == SessionPolicy::PerRequest {
            return Ok(());
        }
        let session = self.acquire().await?;
        info!(client_id = session.client_id(), "gateway session warmed up");
        Ok(())
    }

    /// Stop handing out sessions and close every idle one. Sessions still
    /// checked out are closed when they are released.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let mut closed = 0usize;
        for slot in self.shared.idle.lock().iter_mut() {
            if let Some(mut s) = slot.session.take() {
                s.disconnect();
                closed += 1;
            }
        }
        info!(closed, "session pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle.lock();
        let connected = idle
            .iter()
            .filter(|s| s.session.as_ref().is_some_and(|s| s.is_connected()))
            .count();
        PoolStats {
            policy: self.settings.policy,
            size: self.settings.size,
            idle: idle.len(),
            in_use: self.settings.size - idle.len(),
            connected,
            connects: self.connects.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Checkout guard
// ---------------------------------------------------------------------------

/// Exclusive use of one gateway session. Returned to the pool on drop.
pub struct PooledSession {
    slot: Option<Slot>,
    shared: Arc<Shared>,
    policy: SessionPolicy,
    healthy: bool,
    // Released after the slot is back in the idle list (field drop order).
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("client_id", &self.client_id())
            .field("policy", &self.policy)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl PooledSession {
    pub fn client_id(&self) -> i32 {
        self.slot.as_ref().map(|s| s.client_id).unwrap_or_default()
    }

    /// Forward a historical-bars request to the underlying session.
    pub async fn historical_bars(
        &mut self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<Bar>, GatewayError> {
        let session = self
            .slot
            .as_mut()
            .and_then(|s| s.session.as_deref_mut())
            .ok_or(GatewayError::NotConnected)?;
        session.historical_bars(contract, query).await
    }

    /// Close the session on release instead of keeping it.
    pub fn discard(&mut self) {
        self.healthy = false;
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };
        let closing = self.shared.closed.load(Ordering::Acquire);
        let keep = self.healthy && self.policy == SessionPolicy::Pooled && !closing;
        if !keep {
            if let Some(mut s) = slot.session.take() {
                s.disconnect();
                if !self.healthy {
                    self.shared.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(client_id = slot.client_id, "gateway session discarded");
                }
            }
        }
        self.shared.idle.lock().push(slot);
    }
}
