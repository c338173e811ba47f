// =============================================================================
// Scripted Gateway — test double for the gateway seam
// =============================================================================
//
// Panics if a client id is connected twice while open, or if two calls are
// ever in flight on the same session.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone};
use parking_lot::Mutex;

use super::{ContractSpec, Gateway, GatewayError, GatewaySession, HistoricalQuery};
use crate::types::{Bar, BarTime};

/// `n` one-minute bars starting 2024-03-06 09:30 US/Eastern, rising by 1.0.
pub fn minute_bars(n: usize) -> Vec<Bar> {
    let est = FixedOffset::west_opt(5 * 3600).unwrap();
    let start = est.with_ymd_and_hms(2024, 3, 6, 9, 30, 0).unwrap();
    (0..n)
        .map(|i| {
            let base = 100.0 + i as f64;
            Bar {
                time: BarTime::Instant(start + chrono::Duration::minutes(i as i64)),
                open: base,
                high: base + 0.5,
                low: base - 0.5,
                close: base + 0.25,
                volume: 1_000.0 + i as f64,
            }
        })
        .collect()
}

#[derive(Default)]
pub struct Script {
    bars: Mutex<HashMap<String, Vec<Bar>>>,
    connect_delay: Mutex<Duration>,
    request_delay: Mutex<Duration>,
    refuse_connections: AtomicBool,
    reject_with: Mutex<Option<String>>,
    drop_after_request: AtomicBool,
    lose_connection: AtomicBool,
    open_ids: Mutex<HashSet<i32>>,
    per_session_in_flight: Mutex<HashMap<i32, usize>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub requests: Mutex<Vec<(i32, ContractSpec, HistoricalQuery)>>,
}

/// Gateway double driven by a shared [`Script`].
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    pub script: Arc<Script>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.script.bars.lock().insert(symbol.to_string(), bars);
        self
    }

    pub fn with_connect_delay(self, d: Duration) -> Self {
        *self.script.connect_delay.lock() = d;
        self
    }

    pub fn with_request_delay(self, d: Duration) -> Self {
        *self.script.request_delay.lock() = d;
        self
    }

    pub fn refusing_connections(self) -> Self {
        self.script.refuse_connections.store(true, Ordering::SeqCst);
        self
    }

    pub fn rejecting_with(self, msg: &str) -> Self {
        *self.script.reject_with.lock() = Some(msg.to_string());
        self
    }

    /// Sessions report themselves dead after serving one request.
    pub fn dropping_after_request(self) -> Self {
        self.script.drop_after_request.store(true, Ordering::SeqCst);
        self
    }

    /// Calls fail as if the socket died mid-request.
    pub fn losing_connection(self) -> Self {
        self.script.lose_connection.store(true, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.script.disconnects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.script.open_ids.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<HistoricalQuery> {
        self.script.requests.lock().last().map(|(_, _, q)| q.clone())
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self, client_id: i32) -> Result<Box<dyn GatewaySession>, GatewayError> {
        let delay = *self.script.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.refuse_connections.load(Ordering::SeqCst) {
            return Err(GatewayError::Connect {
                address: "127.0.0.1:7497".into(),
                reason: "connection refused".into(),
            });
        }
        assert!(
            self.script.open_ids.lock().insert(client_id),
            "client id {client_id} connected twice while open"
        );
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            client_id,
            script: self.script.clone(),
            connected: true,
        }))
    }
}

struct ScriptedSession {
    client_id: i32,
    script: Arc<Script>,
    connected: bool,
}

/// Decrements the in-flight counters even when the request future is dropped.
struct InFlight<'a> {
    script: &'a Script,
    client_id: i32,
}

impl<'a> InFlight<'a> {
    fn enter(script: &'a Script, client_id: i32) -> Self {
        {
            let mut per = script.per_session_in_flight.lock();
            let n = per.entry(client_id).or_insert(0);
            assert_eq!(*n, 0, "two in-flight calls on session {client_id}");
            *n += 1;
        }
        let now = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { script, client_id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.script.per_session_in_flight.lock().get_mut(&self.client_id) {
            *n -= 1;
        }
        self.script.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewaySession for ScriptedSession {
    fn client_id(&self) -> i32 {
        self.client_id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn historical_bars(
        &mut self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<Bar>, GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }
        let _guard = InFlight::enter(&self.script, self.client_id);
        self.script
            .requests
            .lock()
            .push((self.client_id, contract.clone(), query.clone()));

        let delay = *self.script.request_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.lose_connection.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(GatewayError::NotConnected);
        }
        if self.script.drop_after_request.load(Ordering::SeqCst) {
            self.connected = false;
        }
        if let Some(msg) = self.script.reject_with.lock().clone() {
            return Err(GatewayError::Rejected(msg));
        }
        Ok(self
            .script
            .bars
            .lock()
            .get(&contract.symbol)
            .cloned()
            .unwrap_or_default())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
        }
        if self.script.open_ids.lock().remove(&self.client_id) {
            self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
