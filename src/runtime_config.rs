// =============================================================================
// Service Configuration — JSON file + environment overrides
// =============================================================================
//
// Every tunable of the candlestick service lives here: the HTTP bind address,
// the CORS allow-list, where the brokerage gateway listens and how sessions to
// it are pooled.
//
// All fields carry `#[serde(default)]` so that a partial (or empty) config
// file still loads. Environment variables are applied on top of the file so
// that deployments can override single values without editing it.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{GatewayKind, SessionPolicy};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://localhost:3000".to_string(),
    ]
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7497
}

fn default_base_client_id() -> i32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout_secs() -> u64 {
    15
}

fn default_demo_symbols() -> Vec<String> {
    vec![
        "AAPL".to_string(),
        "MSFT".to_string(),
        "AMZN".to_string(),
        "NVDA".to_string(),
        "TSLA".to_string(),
        "SPY".to_string(),
    ]
}

// =============================================================================
// GatewayConfig
// =============================================================================

/// Where the brokerage gateway listens and how long we wait on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Adapter to use: `tws` (socket API) or `demo` (simulated).
    #[serde(default)]
    pub kind: GatewayKind,

    #[serde(default = "default_host")]
    pub host: String,

    /// 7497 = paper trading terminal, 7496 = live, 4001/4002 = IB Gateway.
    #[serde(default = "default_port")]
    pub port: u16,

    /// First client id handed out; pool slot `i` uses `base_client_id + i`.
    #[serde(default = "default_base_client_id")]
    pub base_client_id: i32,

    /// Upper bound on the connect handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a single historical-bars request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Symbols the demo gateway has data for. Ignored by `tws`.
    #[serde(default = "default_demo_symbols")]
    pub demo_symbols: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::default(),
            host: default_host(),
            port: default_port(),
            base_client_id: default_base_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            demo_symbols: default_demo_symbols(),
        }
    }
}

impl GatewayConfig {
    /// `host:port` as expected by the socket client.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

// =============================================================================
// SessionConfig
// =============================================================================

/// Lifecycle of gateway sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub policy: SessionPolicy,

    /// Number of concurrent sessions (each with its own client id).
    /// A size of 1 serialises every request on one shared session.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a request may queue for a free session.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::default(),
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.max(1))
    }
}

// =============================================================================
// ServiceConfig
// =============================================================================

/// Top-level configuration of the candlestick service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Origins allowed to call the API from a browser (credentials allowed).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: default_cors_origins(),
            gateway: GatewayConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse service config from {}", path.display()))?;

        info!(
            path = %path.display(),
            gateway = %config.gateway.kind,
            origins = config.cors_origins.len(),
            "service config loaded"
        );

        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a
    /// warning and the previous value is kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        if let Some(addr) = get("CANDLES_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(origins) = get("CANDLES_CORS_ORIGINS") {
            self.cors_origins = parse_origin_list(&origins);
        }
        if let Some(kind) = get("CANDLES_GATEWAY") {
            match kind.parse() {
                Ok(k) => self.gateway.kind = k,
                Err(e) => warn!(error = %e, "ignoring CANDLES_GATEWAY"),
            }
        }
        if let Some(host) = get("IB_GATEWAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("IB_GATEWAY_PORT") {
            match port.parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => warn!(value = %port, "ignoring non-numeric IB_GATEWAY_PORT"),
            }
        }
        if let Some(id) = get("IB_CLIENT_ID") {
            match id.parse() {
                Ok(i) => self.gateway.base_client_id = i,
                Err(_) => warn!(value = %id, "ignoring non-numeric IB_CLIENT_ID"),
            }
        }
        if let Some(size) = get("CANDLES_POOL_SIZE") {
            match size.parse::<usize>() {
                Ok(n) if n > 0 => self.session.pool_size = n,
                _ => warn!(value = %size, "ignoring invalid CANDLES_POOL_SIZE"),
            }
        }
    }

    /// Clamp values that would make the service unusable.
    pub fn normalise(&mut self) {
        if self.session.pool_size == 0 {
            warn!("session.pool_size must be at least 1, using 1");
            self.session.pool_size = 1;
        }
        for origin in &mut self.cors_origins {
            *origin = origin.trim().trim_end_matches('/').to_string();
        }
        self.cors_origins.retain(|origin| {
            let ok = is_valid_origin(origin);
            if !ok {
                warn!(origin = %origin, "dropping malformed CORS origin");
            }
            ok
        });
    }
}

/// Split a comma-separated origin list, trimming blanks and trailing slashes.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// An origin is `scheme://host[:port]` with an http(s) scheme and no path.
pub fn is_valid_origin(origin: &str) -> bool {
    let rest = match origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    {
        Some(r) => r,
        None => return false,
    };
    !rest.is_empty()
        && !rest.contains('/')
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}
