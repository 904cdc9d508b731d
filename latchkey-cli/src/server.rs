use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use latchkey_core::infrastructure::LockStore;
use latchkey_core::types::{LockKeySpec, LockToken};

use crate::handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LockStore>,
    /// Bearer token required on every route but `/health`; `None` is dev mode
    pub api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        // Protected routes
        .route("/locks", post(acquire_lock))
        .route("/locks/release", post(release_lock))
        .route("/locks/extend", post(extend_lock))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(host: &str, port: u16, store: Arc<dyn LockStore>) -> anyhow::Result<()> {
    let api_key = std::env::var("LATCHKEY_API_KEY")
        .ok()
        .filter(|key| !key.is_empty());

    if api_key.is_some() {
        tracing::info!("🔐 API key authentication enabled");
    } else {
        tracing::warn!("⚠️  No LATCHKEY_API_KEY set, server is open (dev mode)");
    }

    let app = router(AppState { store, api_key });
    let addr = format!("{}:{}", host, port);
    tracing::info!("🔒 latchkey lock service starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected_key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("🚫 Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

fn bad_request<T: serde::Serialize>(msg: impl Into<String>) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::err(msg)))
}

fn store_failure<T: serde::Serialize>(
    e: latchkey_core::StoreError,
) -> (StatusCode, Json<ApiResponse<T>>) {
    tracing::error!(error = %e, "Lock store call failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::err(e.to_string())),
    )
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        store: state.store.name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn acquire_lock(
    State(state): State<AppState>,
    Json(req): Json<AcquireLockRequest>,
) -> (StatusCode, Json<ApiResponse<LockResponse>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let spec = match LockKeySpec::new(req.keys, req.store_id) {
        Ok(spec) => spec,
        Err(e) => return bad_request(e.to_string()),
    };

    let lease = Duration::from_millis(req.lease_ms);
    match state.store.acquire(spec.keys(), &spec.store_id, lease).await {
        Ok(Some(token)) => {
            tracing::info!(keys = ?spec.keys(), store_id = %spec.store_id, "Lock acquired");
            (
                StatusCode::CREATED,
                Json(ApiResponse::ok(LockResponse {
                    token: token.as_str().to_string(),
                    keys: spec.keys().to_vec(),
                    store_id: spec.store_id.clone(),
                    expires_in_ms: req.lease_ms,
                })),
            )
        }
        Ok(None) => {
            tracing::info!(keys = ?spec.keys(), "Lock denied: held elsewhere");
            (
                StatusCode::CONFLICT,
                Json(ApiResponse::err("one or more keys are held")),
            )
        }
        Err(e) => store_failure(e),
    }
}

async fn release_lock(
    State(state): State<AppState>,
    Json(req): Json<ReleaseLockRequest>,
) -> (StatusCode, Json<ApiResponse<ReleaseResponse>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let token = LockToken::from_issued(req.token);
    let spec = match LockKeySpec::new(req.keys, req.store_id) {
        Ok(spec) => spec,
        Err(e) => return bad_request(e.to_string()),
    };

    match state.store.release(spec.keys(), &token, &spec.store_id).await {
        Ok(released) => {
            tracing::info!(keys = ?spec.keys(), released, "Lock release");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(ReleaseResponse { released })),
            )
        }
        Err(e) => store_failure(e),
    }
}

async fn extend_lock(
    State(state): State<AppState>,
    Json(req): Json<ExtendLockRequest>,
) -> (StatusCode, Json<ApiResponse<ExtendResponse>>) {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let token = LockToken::from_issued(req.token);
    let lease = Duration::from_millis(req.lease_ms);
    let spec = match LockKeySpec::new(req.keys, req.store_id) {
        Ok(spec) => spec,
        Err(e) => return bad_request(e.to_string()),
    };

    match state
        .store
        .extend(spec.keys(), &token, &spec.store_id, lease)
        .await
    {
        Ok(true) => {
            tracing::info!(keys = ?spec.keys(), "Lock lease extended");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(ExtendResponse { extended: true })),
            )
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err("lock not held by this token or already expired")),
        ),
        Err(e) => store_failure(e),
    }
}
