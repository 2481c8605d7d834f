//! Request routing and the JSON envelope.
//!
//! Routes:
//!
//! - `POST /mysql/rpc`, `/proxy/rpc`, `/columnar/rpc`, `/redis/rpc`:
//!   run a batch against the named backend family
//! - `GET /health`: liveness and limiter state
//! - `GET /metrics`: prometheus text, when metrics are enabled
//!
//! Every RPC reply is `{"code", "data", "msg"}`. A request that fails
//! validation gets HTTP 400 with `code: 1` and nothing is dispatched. Once
//! dispatched the reply is always 200 with `code: 0`; per-address and
//! per-command failures live inside `data`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dbrelay_core::{
    AddressResult, Backend, ClientType, ColumnarBackend, Dispatcher, MySqlBackend, ProxyBackend,
    QueryRequest, RedisBackend,
};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{BackendCredentials, DbRelayConfig};
use crate::metrics;

/// Shared by every connection.
pub struct AppState {
    pub credentials: BackendCredentials,
    pub limiter: Arc<Semaphore>,
    pub concurrency: usize,
    pub max_request_bytes: usize,
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(cfg: &DbRelayConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            credentials: cfg.credentials.clone(),
            limiter: Arc::new(Semaphore::new(cfg.concurrency)),
            concurrency: cfg.concurrency,
            max_request_bytes: cfg.max_request_bytes,
            metrics,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("concurrency", &self.concurrency)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    code: i32,
    data: Option<T>,
    msg: String,
}

/// Cache-engine requests carry a few extra fields next to the common ones.
#[derive(Debug, Deserialize)]
struct RedisRequest {
    #[serde(flatten)]
    query: QueryRequest,
    #[serde(default)]
    db_num: u32,
    /// Overrides the configured password when non-empty.
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    client_type: ClientType,
}

/// The hyper service entry point.
pub async fn handle<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    Ok(route(req, &state).await)
}

pub async fn route<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/health") => health(state),
        (Method::GET, "/metrics") => match state.metrics {
            Some(ref handle) => text(
                StatusCode::OK,
                "text/plain; version=0.0.4; charset=utf-8",
                handle.render(),
            ),
            None => not_found(),
        },
        (Method::POST, "/mysql/rpc") => {
            let backend = MySqlBackend::new(state.credentials.mysql.clone());
            rpc_common(req, backend, state).await
        }
        (Method::POST, "/proxy/rpc") => {
            let backend = ProxyBackend::new(state.credentials.proxy.clone());
            rpc_common(req, backend, state).await
        }
        (Method::POST, "/columnar/rpc") => {
            let backend = ColumnarBackend::new(state.credentials.columnar.clone());
            rpc_common(req, backend, state).await
        }
        (Method::POST, "/redis/rpc") => rpc_redis(req, state).await,
        _ => not_found(),
    }
}

async fn rpc_common<B, R>(req: Request<R>, backend: B, state: &AppState) -> Response<Full<Bytes>>
where
    B: Backend,
    R: Body<Data = Bytes>,
    R::Error: std::error::Error + Send + Sync + 'static,
{
    let name = backend.name();
    let query: QueryRequest = match decode(req, state.max_request_bytes).await {
        Ok(q) => q,
        Err(msg) => return reject(name, msg),
    };
    dispatch(backend, &query, state).await
}

async fn rpc_redis<R>(req: Request<R>, state: &AppState) -> Response<Full<Bytes>>
where
    R: Body<Data = Bytes>,
    R::Error: std::error::Error + Send + Sync + 'static,
{
    let redis: RedisRequest = match decode(req, state.max_request_bytes).await {
        Ok(r) => r,
        Err(msg) => return reject("redis", msg),
    };
    let backend = RedisBackend::new(state.credentials.redis.clone())
        .with_password(redis.password.as_deref())
        .with_db(redis.db_num)
        .with_client_type(redis.client_type);
    dispatch(backend, &redis.query, state).await
}

async fn dispatch<B: Backend>(
    backend: B,
    query: &QueryRequest,
    state: &AppState,
) -> Response<Full<Bytes>> {
    let name = backend.name();
    if let Err(e) = query.validate() {
        return reject(name, e.to_string());
    }

    info!(
        backend = name,
        addresses = query.addresses.len(),
        cmds = query.cmds.len(),
        force = query.force,
        "dispatching"
    );
    metrics::on_dispatch_started(name, query.addresses.len());
    let started = Instant::now();

    let dispatcher = Dispatcher::new(Arc::new(backend), Arc::clone(&state.limiter));
    let results = dispatcher.run(query).await;

    let elapsed = started.elapsed();
    metrics::on_dispatch_finished(name, &results, elapsed);
    info!(
        backend = name,
        failed = results.iter().filter(|r| r.has_errors()).count(),
        elapsed_ms = elapsed.as_millis() as u64,
        "dispatch finished"
    );

    envelope::<Vec<AddressResult>>(StatusCode::OK, 0, Some(results), String::new())
}

/// Reads and parses the JSON body, with the size capped.
async fn decode<T, B>(req: Request<B>, limit: usize) -> Result<T, String>
where
    T: serde::de::DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let body = Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map_err(|e| format!("failed to read request body: {e}"))?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| format!("invalid request body: {e}"))
}

fn reject(backend: &'static str, msg: String) -> Response<Full<Bytes>> {
    warn!(backend, "rejected request: {msg}");
    metrics::on_request_rejected(backend);
    envelope::<()>(StatusCode::BAD_REQUEST, 1, None, msg)
}

fn health(state: &AppState) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "status": "healthy",
        "version": state.version,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "concurrency": {
            "limit": state.concurrency,
            "available": state.limiter.available_permits(),
        },
    });
    json(StatusCode::OK, body.to_string())
}

fn envelope<T: Serialize>(
    status: StatusCode,
    code: i32,
    data: Option<T>,
    msg: String,
) -> Response<Full<Bytes>> {
    match serde_json::to_string(&Envelope { code, data, msg }) {
        Ok(body) => json(status, body),
        Err(e) => json(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "code": 1, "data": null, "msg": e.to_string() }).to_string(),
        ),
    }
}

fn json(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    text(status, "application/json", body)
}

fn text(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn not_found() -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp
}
