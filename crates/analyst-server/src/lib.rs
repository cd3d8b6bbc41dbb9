//! HTTP front end for the analyst engine
//!
//! Exposes one multipart endpoint that runs a full analysis session per
//! request, plus a health check. Every uploaded file field becomes a session
//! input named by its form key.

pub mod error;
pub mod handler;

pub use error::{Result, ServerError};
pub use handler::QueryHandler;

use analyst_core::config::ServerSettings;
use analyst_core::InputFile;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use futures_util::FutureExt;
use serde::Serialize;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const QUERY_PATH: &str = "/api/v1/query";
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Configuration for the analyst server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Request timeout duration
    pub request_timeout: Duration,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            enable_cors: true,
            cors_origins: None,
            request_timeout: Duration::from_secs(900),
            max_body_size: 50 * 1024 * 1024,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `server` section of the analyst configuration.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let mut config = Self::new()
            .with_bind_addr_str(&settings.bind_addr)?
            .with_cors(settings.enable_cors)
            .with_request_timeout(Duration::from_secs(settings.request_timeout_secs))
            .with_max_body_size(settings.max_body_size)
            .with_logging(settings.enable_logging);
        if let Some(origins) = &settings.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        Ok(config)
    }

    /// Set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Enable or disable request logging.
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<dyn QueryHandler>,
    pub config: ServerConfig,
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Collect every file field as an input named by its form key. Plain form
/// values are ignored.
async fn collect_inputs(mut multipart: Multipart) -> Result<Vec<InputFile>> {
    let mut inputs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::invalid_request(format!("Malformed multipart body: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_none() {
            log::debug!("Ignoring non-file form field '{}'", name);
            continue;
        }
        let bytes = field.bytes().await.map_err(|e| {
            ServerError::invalid_request(format!("Failed to read upload '{}': {}", name, e))
        })?;
        log::debug!("Received upload '{}' ({} bytes)", name, bytes.len());
        inputs.push(InputFile::new(name, bytes.to_vec()));
    }
    Ok(inputs)
}

/// Handler for the /api/v1/query POST endpoint.
async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>> {
    if !is_multipart(&headers) {
        return Err(ServerError::UnsupportedMediaType(
            "Unsupported Media Type. Must be multipart/form-data.".to_string(),
        ));
    }
    let multipart = multipart.map_err(|e| {
        ServerError::invalid_request(format!("Invalid multipart request: {}", e))
    })?;

    let inputs = collect_inputs(multipart).await?;
    log::info!("Query received with {} file(s)", inputs.len());

    let outcome = AssertUnwindSafe(state.handler.handle_query(inputs))
        .catch_unwind()
        .await
        .map_err(|_| ServerError::internal("analysis session panicked"))?;

    Ok(Json(outcome?))
}

/// The analyst HTTP server.
pub struct AnalystServer {
    handler: Arc<dyn QueryHandler>,
    config: ServerConfig,
}

impl AnalystServer {
    /// Create a new server with default configuration.
    pub fn new(handler: Arc<dyn QueryHandler>) -> Self {
        Self {
            handler,
            config: ServerConfig::default(),
        }
    }

    /// Create a new server with custom configuration.
    pub fn with_config(handler: Arc<dyn QueryHandler>, config: ServerConfig) -> Self {
        Self { handler, config }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            handler: self.handler.clone(),
            config: self.config.clone(),
        };

        let mut router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(HealthResponse {
                        status: "healthy".to_string(),
                        timestamp: chrono::Utc::now(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    })
                }),
            )
            .route(QUERY_PATH, post(query_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        // Dropping the inner future on timeout cancels the session, which
        // removes its workspace and kills any running child.
        let request_timeout = self.config.request_timeout;
        router = router.layer(middleware::from_fn(
            move |request: axum::http::Request<axum::body::Body>,
                  next: axum::middleware::Next| async move {
                let start = Instant::now();
                match tokio::time::timeout(request_timeout, next.run(request)).await {
                    Ok(mut response) => {
                        let elapsed = format!("{:.4}", start.elapsed().as_secs_f64());
                        if let Ok(value) = HeaderValue::from_str(&elapsed) {
                            response.headers_mut().insert(PROCESS_TIME_HEADER, value);
                        }
                        response
                    }
                    Err(_) => ServerError::Timeout(request_timeout.as_secs()).into_response(),
                }
            },
        ));

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = Instant::now();
                    let response: Response = next.run(request).await;
                    let duration = start.elapsed();

                    log::info!(
                        "Response {} {} completed in {:?}",
                        request_id,
                        response.status(),
                        duration
                    );

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => CorsLayer::permissive(),
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided shutdown signal is received.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("analyst server starting on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Query endpoint: http://{}{}", self.config.bind_addr, QUERY_PATH);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("analyst server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
