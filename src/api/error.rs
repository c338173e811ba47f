// =============================================================================
// API Error Envelope
// =============================================================================
//
// Every failed request answers with
//
//   { "detail": "<human readable>", "code": "<machine readable>", "request_id": "<uuid>" }
//
// Status mapping:
//   invalid_request      400  blank symbol
//   no_data              404  gateway answered with no bars
//   upstream_error       500  gateway reported an error (message passed through)
//   gateway_unavailable  503  no session could be obtained
//   gateway_timeout      504  bars request exceeded its deadline
//
// Connection failures are logged in full server-side but answered with a
// generic detail so internal addresses never reach the caller.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::candles::CandleError;

pub const NOT_FOUND_DETAIL: &str = "No historical data found for the given symbol.";

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub code: &'static str,
    pub request_id: String,
}

/// An error ready to be rendered as an HTTP response.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    /// Map a service error to its status and envelope, logging it under
    /// `request_id`.
    pub fn from_candle_error(err: CandleError, request_id: Uuid) -> Self {
        let (status, code, detail) = match &err {
            CandleError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            CandleError::NotFound { .. } => {
                (StatusCode::NOT_FOUND, "no_data", NOT_FOUND_DETAIL.to_string())
            }
            CandleError::Upstream(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error", msg.clone())
            }
            CandleError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "gateway_unavailable",
                "The brokerage gateway is not reachable. Try again shortly.".to_string(),
            ),
            CandleError::Timeout(d) => (
                StatusCode::GATEWAY_TIMEOUT,
                "gateway_timeout",
                format!("The brokerage gateway did not answer within {}s.", d.as_secs()),
            ),
        };

        match &err {
            CandleError::InvalidRequest(_) | CandleError::NotFound { .. } => {
                info!(%request_id, code, error = %err, "candlestick request rejected")
            }
            CandleError::Upstream(_) => {
                warn!(%request_id, code, error = %err, "candlestick request failed upstream")
            }
            CandleError::Unavailable(_) | CandleError::Timeout(_) => {
                error!(%request_id, code, error = %err, "candlestick request failed")
            }
        }

        Self {
            status,
            body: ErrorBody {
                detail,
                code,
                request_id: request_id.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
