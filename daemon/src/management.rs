//! Management API for the iotlink daemon
//!
//! Provides endpoints for:
//! - Routing commands to devices
//! - Listing connected devices and system statistics
//! - Login lockout checks, failure recording and administrative unlock
//!
//! Every route is counted by the rate-limit middleware.

use crate::config::{FailurePolicy, RateLimitConfig};
use crate::lock_manager::{LockManager, LockStatus};
use crate::metrics::METRICS;
use crate::rate_limiter::RateLimiter;
use crate::router::CommandRouter;
use anyhow::Result;
use axum::{
    Router,
    extract::{ConnectInfo, Json, MatchedPath, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use iotlink_protocol::{Command, ValidationError, validate_command, validate_identity};
use iotlink_store::StoreError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Header carrying the caller's identity for rate limiting
///
/// Honored only when `rate_limit.trust_requester_header` is set.
pub const REQUESTER_HEADER: &str = "x-requester-id";

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
    pub lock_manager: Arc<LockManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit: RateLimitConfig,
    pub failure_policy: FailurePolicy,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => {
                METRICS.store_errors.inc();
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// System statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStats {
    pub active_connections: usize,
    pub commands_routed: u64,
    pub commands_dropped: u64,
    pub device_messages: u64,
    pub lockouts: u64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct LockResponse {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub failed_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_for_secs: Option<u64>,
}

/// Build the API router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/commands", post(send_command))
        .route("/api/devices", get(list_devices))
        .route("/api/stats", get(get_stats))
        .route("/api/auth/lock/:identity", get(lock_status).delete(reset_lock))
        .route(
            "/api/auth/failures/:identity",
            post(record_failure).delete(clear_failures),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// Serve the API on an already-bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    info!("Management API listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Apply the configured failure policy to a store error
///
/// Returns the response to send instead of proceeding, if any.
fn on_store_error(policy: FailurePolicy, err: &StoreError) -> Option<Response> {
    METRICS.store_errors.inc();
    match policy {
        FailurePolicy::FailOpen => {
            warn!("{}; failing open", err);
            None
        }
        FailurePolicy::FailClosed => {
            warn!("{}; failing closed", err);
            Some(
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorBody {
                        error: err.to_string(),
                    }),
                )
                    .into_response(),
            )
        }
    }
}

/// Rate-limit identity: the peer IP, or the requester header when trusted
fn requester_id(headers: &HeaderMap, peer: Option<SocketAddr>, trust_header: bool) -> String {
    let from_header = trust_header
        .then(|| headers.get(REQUESTER_HEADER))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| validate_identity(s).is_ok())
        .map(str::to_string);

    from_header
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.rate_limit.enabled {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let requester = requester_id(req.headers(), peer, state.rate_limit.trust_requester_header);
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();

    let counter = match state
        .rate_limiter
        .increment_counter(&requester, &route, &method)
        .await
    {
        Ok(counter) => counter,
        Err(e) => {
            return match on_store_error(state.failure_policy, &e) {
                Some(resp) => resp,
                None => next.run(req).await,
            };
        }
    };

    let max_hits = state.rate_limit.max_hits;
    let hits = counter.hits.max(0) as u64;

    let mut response = if hits > max_hits {
        METRICS.rate_limited.inc();
        debug!("Rate limited {} on {} {} ({} hits)", requester, method, route, hits);
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, counter.ttl.to_string())],
            Json(ErrorBody {
                error: "Too many requests".to_string(),
            }),
        )
            .into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(max_hits));
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(max_hits.saturating_sub(hits)),
    );
    headers.insert("x-ratelimit-reset", HeaderValue::from(counter.ttl));
    response
}

async fn send_command(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Result<StatusCode, ApiError> {
    validate_command(&command)?;
    // Delivery is best-effort; the outcome is only logged and counted
    state.router.route_command(&command);
    Ok(StatusCode::ACCEPTED)
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.registry().snapshot())
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(SystemStats {
        active_connections: state.router.registry().count(),
        commands_routed: METRICS.commands_routed.get(),
        commands_dropped: METRICS.commands_dropped.get(),
        device_messages: METRICS.device_messages.get(),
        lockouts: METRICS.lockouts.get(),
    })
}

async fn lock_status(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Response, ApiError> {
    validate_identity(&identity)?;

    let status = match state.lock_manager.is_user_locked(&identity).await {
        Ok(status) => status,
        Err(e) => match on_store_error(state.failure_policy, &e) {
            Some(resp) => return Ok(resp),
            None => LockStatus::Unlocked,
        },
    };

    Ok(match status {
        LockStatus::Unlocked => Json(LockResponse {
            locked: false,
            retry_after_secs: None,
        })
        .into_response(),
        LockStatus::Locked { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(LockResponse {
                locked: true,
                retry_after_secs: Some(retry_after_secs),
            }),
        )
            .into_response(),
    })
}

async fn record_failure(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<FailureResponse>, ApiError> {
    validate_identity(&identity)?;
    let record = state.lock_manager.increment_login_failed_count(&identity).await?;
    Ok(Json(FailureResponse {
        failed_count: record.failed_count,
        locked_for_secs: record.locked_for_secs,
    }))
}

async fn clear_failures(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_identity(&identity)?;
    state.lock_manager.clear_on_success(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_lock(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_identity(&identity)?;
    info!("Administrative unlock for {}", identity);
    state.lock_manager.reset(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requester_header_ignored_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUESTER_HEADER, HeaderValue::from_static("ops@example.com"));
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        assert_eq!(requester_id(&headers, Some(peer), false), "10.1.2.3");
    }

    #[test]
    fn test_trusted_requester_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUESTER_HEADER, HeaderValue::from_static("ops@example.com"));
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        assert_eq!(requester_id(&headers, Some(peer), true), "ops@example.com");
    }

    #[test]
    fn test_requester_falls_back_to_peer_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUESTER_HEADER, HeaderValue::from_static("has space"));
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        assert_eq!(requester_id(&headers, Some(peer), true), "10.1.2.3");
        assert_eq!(requester_id(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn test_fail_open_proceeds() {
        let err = StoreError::Unavailable("down".to_string());
        assert!(on_store_error(FailurePolicy::FailOpen, &err).is_none());

        let resp = on_store_error(FailurePolicy::FailClosed, &err).unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_lock_response_shape() {
        let unlocked = serde_json::to_value(LockResponse {
            locked: false,
            retry_after_secs: None,
        })
        .unwrap();
        assert_eq!(unlocked, serde_json::json!({"locked": false}));

        let locked = serde_json::to_value(LockResponse {
            locked: true,
            retry_after_secs: Some(30),
        })
        .unwrap();
        assert_eq!(locked, serde_json::json!({"locked": true, "retry_after_secs": 30}));
    }
}
