//! HTTP surface for the download service.
//!
//! Routes:
//! - `POST /api/download` with `{"url": "...", "identity": "..."}` streams the
//!   media file back, or answers with a JSON error.
//! - `GET /api/health` reports slot, cache and rate table counters.
//! - `GET /api/history?identity=...&limit=...` lists recorded downloads for
//!   an identity, newest first. Empty when history is off.
//!
//! Any other method on `/api/download` is a 405 JSON error.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::download::{
    DownloadService, FetchError, FetchRequest, HealthSnapshot, MediaResponse, content_disposition,
};
use crate::history::HistoryEntry;

const X_CACHE: &str = "x-cache";
const X_ELAPSED_MS: &str = "x-elapsed-ms";
const X_ACTIVE_DOWNLOADS: &str = "x-active-downloads";
const X_MAX_CONCURRENT: &str = "x-max-concurrent";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Builds the router. The service must have been prepared.
pub fn router(service: Arc<DownloadService>) -> Router {
    Router::new()
        .route(
            "/api/download",
            post(download_handler).fallback(method_not_allowed),
        )
        .route("/api/health", get(health_handler))
        .route("/api/history", get(history_handler))
        .fallback(not_found)
        .with_state(service)
}

/// Serves `service` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the IO error that stopped the server.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<DownloadService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(service).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// A server running on a background task.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Binds `addr` (port 0 picks a free port) and starts serving.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the address cannot be bound.
    pub async fn start(service: Arc<DownloadService>, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(serve(listener, service, async move {
            let _ = shutdown_rx.await;
        }));
        info!(%addr, "server listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for in-flight responses.
    ///
    /// # Errors
    ///
    /// Returns the server's IO error, if it failed.
    pub async fn shutdown(mut self) -> std::io::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DownloadBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    identity: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_downloads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrent: Option<usize>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retry_after: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            active_downloads: None,
            max_concurrent: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    #[serde(flatten)]
    counters: HealthSnapshot,
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = ErrorBody::new(self.to_string());
        body.retry_after = self.retry_after_secs();
        if let Self::Busy {
            active,
            max_concurrent,
        } = self
        {
            body.active_downloads = Some(active);
            body.max_concurrent = Some(max_concurrent);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

async fn download_handler(
    State(service): State<Arc<DownloadService>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client_key = client_key(&headers, peer, service.config().trust_forwarded_headers);

    let parsed: DownloadBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "rejecting unparseable request body");
            return FetchError::InvalidRequest("Request body must be a JSON object".to_string())
                .into_response();
        }
    };

    let request = FetchRequest {
        url: parsed.url,
        client_key,
        identity: parsed.identity,
    };

    match service.fetch(request).await {
        Ok(media) => media_response(media),
        Err(e) => {
            info!(kind = e.kind(), status = e.status_code(), "download request failed");
            e.into_response()
        }
    }
}

async fn health_handler(State(service): State<Arc<DownloadService>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        counters: service.health(),
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    identity: Option<String>,
    #[serde(default)]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct HistoryBody {
    identity: String,
    entries: Vec<HistoryEntry>,
}

async fn history_handler(
    State(service): State<Arc<DownloadService>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(identity) = query
        .identity
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
    else {
        return FetchError::InvalidRequest("identity is required".to_string()).into_response();
    };

    match service.recent_history(&identity, query.limit).await {
        Ok(entries) => Json(HistoryBody { identity, entries }).into_response(),
        Err(e) => {
            warn!(error = %e, "history lookup failed");
            FetchError::Internal(e.to_string()).into_response()
        }
    }
}

async fn method_not_allowed() -> Response {
    FetchError::MethodNotAllowed.into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorBody::new("Not found"))).into_response()
}

fn media_response(media: MediaResponse) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, &media.media_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(media.size_bytes));
    insert_header(
        &mut headers,
        header::CONTENT_DISPOSITION,
        &content_disposition(&media.filename),
    );
    headers.insert(
        HeaderName::from_static(X_CACHE),
        HeaderValue::from_static(media.cache_status.as_str()),
    );
    headers.insert(
        HeaderName::from_static(X_ELAPSED_MS),
        HeaderValue::from(u64::try_from(media.elapsed.as_millis()).unwrap_or(u64::MAX)),
    );
    headers.insert(
        HeaderName::from_static(X_ACTIVE_DOWNLOADS),
        HeaderValue::from(media.active_downloads),
    );
    headers.insert(
        HeaderName::from_static(X_MAX_CONCURRENT),
        HeaderValue::from(media.max_concurrent),
    );

    (StatusCode::OK, headers, Body::from_stream(media.body)).into_response()
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(e) => warn!(header = %name, error = %e, "dropping unencodable header value"),
    }
}

/// Rate limiting key: the peer address, unless `trust_forwarded` is set, in
/// which case the first `X-Forwarded-For` entry wins, then `X-Real-IP`.
fn client_key(headers: &HeaderMap, peer: SocketAddr, trust_forwarded: bool) -> String {
    if !trust_forwarded {
        return peer.ip().to_string();
    }
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}
