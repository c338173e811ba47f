use std::time::Duration;

/// Failures talking to the brokerage gateway or obtaining a session to it.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The socket could not be opened or the handshake was refused.
    Connect { address: String, reason: String },
    /// The connect handshake did not finish in time.
    ConnectTimeout(Duration),
    /// A historical-bars request did not finish in time.
    RequestTimeout(Duration),
    /// The session was used after it had been disconnected.
    NotConnected,
    /// The gateway answered with an error of its own (bad symbol, bad
    /// parameter, missing entitlement, ...).
    Rejected(String),
    /// Every session was busy for the whole acquire window.
    PoolExhausted(Duration),
    /// The pool has been shut down.
    PoolClosed,
}

impl GatewayError {
    /// `true` when no usable session could be established.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout(_)
                | Self::NotConnected
                | Self::PoolExhausted(_)
                | Self::PoolClosed
        )
    }

    /// `true` when the session that produced this error can no longer be
    /// trusted and must not be handed to another request.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectTimeout(_) | Self::RequestTimeout(_) | Self::NotConnected
        )
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { address, reason } => {
                write!(f, "failed to connect to gateway at {address}: {reason}")
            }
            Self::ConnectTimeout(d) => {
                write!(f, "gateway connect timed out after {}s", d.as_secs_f64())
            }
            Self::RequestTimeout(d) => {
                write!(f, "historical data request timed out after {}s", d.as_secs_f64())
            }
            Self::NotConnected => write!(f, "gateway session is not connected"),
            Self::Rejected(msg) => write!(f, "gateway error: {msg}"),
            Self::PoolExhausted(d) => {
                write!(f, "no gateway session became free within {}s", d.as_secs_f64())
            }
            Self::PoolClosed => write!(f, "gateway session pool is shut down"),
        }
    }
}

impl std::error::Error for GatewayError {}
