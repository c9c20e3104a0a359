//! # Deploy-Hook API
//!
//! HTTPS endpoint for the deploy-hook webhook receiver.
//!
//! This crate provides:
//! - The axum router: `POST /webhook` and `GET /health`
//! - Configuration loading ([`config`])
//! - Certificate provisioning and rustls setup ([`tls`])
//! - Plaintext and TLS serving with graceful shutdown

pub mod config;
pub mod errors;
pub mod responses;
pub mod tls;

pub use config::{
    LoggingConfig, PipelineConfig, ServerConfig, ServiceConfig, StageConfig, TlsConfig,
    WebhookConfig,
};
pub use errors::{ConfigError, ServiceError, TlsError, WebhookHandlerError};
pub use responses::{ResponseEnvelope, ResponseStatus};
pub use tls::{load_server_config, CertificatePair, TlsProvisioner};

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use deploy_hook_core::{
    payload::{parse_and_validate, EVENT_HEADER},
    signature::{verify_signature, SIGNATURE_HEADER},
    EventKind, ParsedEvent, PayloadRejection, PipelineResult, PipelineRunner, Timestamp,
};
use http_body_util::LengthLimitError;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use std::{any::Any, future::Future, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch, task::JoinSet};
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};

/// Path GitHub delivers webhooks to.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Liveness endpoint path.
pub const HEALTH_PATH: &str = "/health";

/// Correlation header read from requests and echoed on responses.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// GitHub's unique id for a delivery; logged with the webhook span.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Per-request id, taken from [`CORRELATION_HEADER`] or generated.
///
/// The logging middleware stores it in the request extensions so handlers can
/// attach it to their own spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Use the caller's id when it is present and non-empty, otherwise a new UUID.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match header_str(headers, CORRELATION_HEADER).filter(|v| !v.is_empty()) {
            Some(id) => Self(id.to_string()),
            None => Self(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared handler state: immutable configuration plus the pipeline runner
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub pipeline: Arc<dyn PipelineRunner>,
}

impl AppState {
    pub fn new(config: ServiceConfig, pipeline: Arc<dyn PipelineRunner>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
///
/// Unknown paths, and known paths hit with the wrong method, receive the
/// `Endpoint not found` envelope.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            WEBHOOK_PATH,
            post(handle_webhook).fallback(handle_not_found),
        )
        .route(
            HEALTH_PATH,
            get(handle_health_check).fallback(handle_not_found),
        )
        .fallback(handle_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(security_headers_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(CatchPanicLayer::custom(handle_panic))
                .into_inner(),
        )
        .with_state(state)
}

/// Bind the configured address and serve until SIGINT or SIGTERM.
///
/// Serves HTTPS when `tls` is given and plaintext HTTP otherwise.
pub async fn start_server(
    config: ServiceConfig,
    pipeline: Arc<dyn PipelineRunner>,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> Result<(), ServiceError> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    let shutdown_timeout = config.shutdown_timeout();
    let state = AppState::new(config, pipeline);
    serve(listener, state, tls, shutdown_signal(shutdown_timeout)).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// In-flight requests are allowed to finish; on the TLS path they get at
/// most `server.shutdown_timeout_seconds` before their connections are
/// dropped.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    tls: Option<Arc<rustls::ServerConfig>>,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = Arc::clone(&state.config);
    let local_addr = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let app = create_router(state);

    match tls {
        Some(tls_config) => {
            info!(address = %local_addr, "Starting HTTPS server");
            serve_tls(
                listener,
                app,
                tls_config,
                config.tls.handshake_timeout(),
                config.shutdown_timeout(),
                shutdown,
            )
            .await?;
        }
        None => {
            warn!(
                address = %local_addr,
                "Starting plaintext HTTP server; webhook traffic is NOT encrypted"
            );
            // axum stops accepting immediately on shutdown and then waits for
            // in-flight requests to finish.
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| ServiceError::ServerFailed {
                    message: e.to_string(),
                })?;
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn serve_tls<F>(
    listener: TcpListener,
    app: Router,
    tls_config: Arc<rustls::ServerConfig>,
    handshake_timeout: Duration,
    shutdown_timeout: Duration,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let acceptor = TlsAcceptor::from(tls_config);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let app = app.clone();
                let mut stop_rx = stop_rx.clone();

                connections.spawn(async move {
                    let tls_stream =
                        match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                            Ok(Ok(tls_stream)) => tls_stream,
                            Ok(Err(e)) => {
                                debug!(peer = %peer, error = %e, "TLS handshake failed");
                                return;
                            }
                            Err(_) => {
                                debug!(peer = %peer, "TLS handshake timed out");
                                return;
                            }
                        };

                    let builder = auto::Builder::new(TokioExecutor::new());
                    let connection = builder
                        .serve_connection(TokioIo::new(tls_stream), TowerToHyperService::new(app));
                    tokio::pin!(connection);

                    let result = tokio::select! {
                        result = connection.as_mut() => result,
                        _ = stop_rx.changed() => {
                            connection.as_mut().graceful_shutdown();
                            connection.await
                        }
                    };
                    if let Err(e) = result {
                        debug!(peer = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    let _ = stop_tx.send(true);

    let drained = tokio::time::timeout(shutdown_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            timeout_seconds = shutdown_timeout.as_secs(),
            "Shutdown timeout elapsed; dropping open connections"
        );
        connections.abort_all();
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle GitHub webhook deliveries
///
/// Steps, stopping at the first failure:
/// 1. Reject a declared `Content-Length` above the limit before reading
/// 2. Read the body under the size limit and the read timeout
/// 3. Verify `X-Hub-Signature-256` over the raw bytes
/// 4. Parse the body and check the ref and repository
/// 5. Dispatch on `X-GitHub-Event`: `ping` answers, `push` runs the pipeline,
///    anything else is ignored
///
/// The pipeline runs on its own task so a client that disconnects while
/// waiting does not abort a build halfway through.
#[instrument(skip_all, fields(correlation_id, delivery_id))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, WebhookHandlerError> {
    let config = &state.config;
    let max_size = config.server.max_payload_bytes;
    let (parts, body) = request.into_parts();

    let span = tracing::Span::current();
    if let Some(correlation_id) = parts.extensions.get::<CorrelationId>() {
        span.record("correlation_id", correlation_id.as_str());
    }
    if let Some(delivery_id) = header_str(&parts.headers, DELIVERY_HEADER) {
        span.record("delivery_id", delivery_id);
    }

    if let Some(declared) = declared_content_length(&parts.headers) {
        if declared > max_size as u64 {
            return Err(WebhookHandlerError::PayloadTooLarge {
                size: Some(declared),
                max_size,
            });
        }
    }

    let raw_body = read_body(body, max_size, config.body_read_timeout()).await?;

    let signature = header_str(&parts.headers, SIGNATURE_HEADER);
    verify_signature(&raw_body, signature, config.webhook.secret.expose_bytes())?;

    let event = parse_and_validate(
        &raw_body,
        &config.webhook.expected_repository,
        &config.webhook.expected_ref,
    )?;

    match EventKind::from_header(header_str(&parts.headers, EVENT_HEADER)) {
        EventKind::Ping => {
            info!("Webhook ping received");
            Ok(ResponseEnvelope::success("Webhook is active").into_response())
        }
        EventKind::Other(event_type) => {
            info!(event_type = %event_type, "Ignoring event type");
            Ok(ResponseEnvelope::ignored(format!("Event type {event_type} ignored")).into_response())
        }
        EventKind::Push => run_pipeline(&state, &event).await,
    }
}

async fn run_pipeline(
    state: &AppState,
    event: &ParsedEvent,
) -> Result<Response, WebhookHandlerError> {
    info!(
        git_ref = event.git_ref.as_deref().unwrap_or_default(),
        repository = event.repository_full_name().unwrap_or_default(),
        "Push accepted; starting build pipeline"
    );

    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::spawn(async move { pipeline.run().await })
        .await
        .map_err(|e| WebhookHandlerError::InternalError {
            message: format!("pipeline task failed: {e}"),
        })?;

    match result {
        PipelineResult::Success { message } => Ok(ResponseEnvelope::success(message)
            .with_timestamp(Timestamp::now())
            .into_response()),
        PipelineResult::Failure { stage, message } => {
            Err(WebhookHandlerError::PipelineFailed { stage, message })
        }
    }
}

/// Liveness check; always healthy while the process is serving.
async fn handle_health_check() -> Response {
    ResponseEnvelope::healthy(env!("CARGO_PKG_VERSION")).into_response()
}

async fn handle_not_found(method: Method, uri: Uri) -> WebhookHandlerError {
    warn!(method = %method, path = %uri.path(), "Invalid endpoint");
    WebhookHandlerError::NotFound
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    WebhookHandlerError::InternalError {
        message: format!("handler panicked: {detail}"),
    }
    .into_response()
}

// ============================================================================
// Middleware
// ============================================================================

/// Adds the fixed security headers and makes sure every response carries
/// an explicit `Content-Length` when its size is known.
async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let body_length = response.body().size_hint().exact();

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    if !headers.contains_key(header::CONTENT_LENGTH) {
        if let Some(length) = body_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
    }

    response
}

/// Request logging middleware with correlation ID tracking
///
/// Reuses an inbound `x-correlation-id` or generates one, logs request start
/// and completion, and echoes the ID on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    path = %request.uri().path(),
    correlation_id
))]
async fn request_logging_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = std::time::Instant::now();

    debug!(%correlation_id, %method, %path, "Request started");
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let status = response.status();
    let duration_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        error!(%correlation_id, %method, %path, %status, duration_ms, "Request failed");
    } else if status.is_client_error() {
        warn!(%correlation_id, %method, %path, %status, duration_ms, "Request rejected");
    } else {
        info!(%correlation_id, %method, %path, %status, duration_ms, "Request completed");
    }

    response
}

// ============================================================================
// Private helpers
// ============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, header::CONTENT_LENGTH.as_str())?
        .trim()
        .parse()
        .ok()
}

/// Read the whole body, enforcing the size limit and the read timeout.
async fn read_body(
    body: Body,
    max_size: usize,
    timeout: Duration,
) -> Result<Bytes, WebhookHandlerError> {
    match tokio::time::timeout(timeout, axum::body::to_bytes(body, max_size)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => {
            if exceeded_length_limit(&e) {
                Err(WebhookHandlerError::PayloadTooLarge {
                    size: None,
                    max_size,
                })
            } else {
                Err(PayloadRejection::Malformed {
                    message: format!("failed to read request body: {e}"),
                }
                .into())
            }
        }
        Err(_) => Err(WebhookHandlerError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

fn exceeded_length_limit(error: &axum::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
