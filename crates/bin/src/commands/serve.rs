//! Serve command - compiles the policy and exposes it over HTTP.
//!
//! TLS is terminated by a proxy in front of the server. The proxy forwards
//! the verified client chain as the URL-encoded `X-Client-Certificate`
//! header and the client's address in `X-Forwarded-For`. Both headers are
//! believed only from the configured trusted proxies; from any other peer
//! they are ignored and the peer address is the client address.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{ConnectInfo, Json as ExtractJson, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

use keyserver::constants::{CLIENT_CERTIFICATE_HEADER, FORWARDED_FOR_HEADER, TOKEN_HEADER};
use keyserver::{Context, Credentials, Request, config::Config};

use crate::cli::ServeArgs;

/// How often the server certificate is checked for renewal.
const TLS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
struct AppState {
    context: Arc<Context>,
    proxies: ProxyTrust,
}

/// The peers allowed to speak for a client through proxy headers.
#[derive(Debug, Clone)]
struct ProxyTrust {
    trusted: Arc<[IpAddr]>,
}

impl ProxyTrust {
    fn new(trusted: &[IpAddr]) -> Self {
        Self {
            trusted: trusted.into(),
        }
    }

    fn is_trusted(&self, peer: IpAddr) -> bool {
        self.trusted.contains(&peer)
    }

    /// The client's address. Behind a trusted proxy this is the last
    /// `X-Forwarded-For` entry, the one the proxy itself appended.
    fn client_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
        let peer = peer.ip();
        if !self.is_trusted(peer) {
            return peer;
        }
        let Some(forwarded) = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit(',').next())
            .map(str::trim)
        else {
            return peer;
        };
        match forwarded.parse() {
            Ok(ip) => ip,
            Err(_) => {
                tracing::warn!(%peer, forwarded, "unparseable forwarded address");
                peer
            }
        }
    }
}

/// A kernel error rendered as an HTTP response.
struct ApiError {
    status: StatusCode,
    error: keyserver::Error,
}

impl ApiError {
    /// Failures while resolving the caller.
    fn authentication(error: keyserver::Error) -> Self {
        let status = if error.is_forbidden() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::UNAUTHORIZED
        };
        Self { status, error }
    }
}

impl From<keyserver::Error> for ApiError {
    fn from(error: keyserver::Error) -> Self {
        let status = if error.is_forbidden() {
            StatusCode::FORBIDDEN
        } else if error.is_authentication_error() {
            StatusCode::UNAUTHORIZED
        } else if error.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::BAD_REQUEST
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::info!(
            status = %self.status,
            module = self.error.module(),
            error = %self.error,
            "request failed"
        );
        (self.status, format!("{}\n", self.error)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    authorities: usize,
    accounts: usize,
}

/// Run the keyserver
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyserver=info")),
        )
        .init();

    let config = Config::load(&args.config)?;
    let context = Arc::new(Context::compile(&config)?);
    tracing::info!(config = %args.config.display(), "policy loaded");

    let app_state = AppState {
        context,
        proxies: ProxyTrust::new(&args.trusted_proxies),
    };

    if let Some(dir) = &args.tls_dir {
        let written = write_server_certificate(&app_state.context, dir, None)?;
        tokio::spawn(refresh_server_certificate(
            app_state.context.clone(),
            dir.clone(),
            written,
        ));
    }

    let app = Router::new()
        .route("/health", get(handle_health_endpoint))
        .route("/pub/{authority}", get(handle_public_key))
        .route("/static/{name}", get(handle_static_file))
        .route("/apirequest", post(handle_api_request))
        .route("/admit", post(handle_admit))
        .with_state(app_state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    println!("Keyserver listening on http://{local_addr}");
    println!("Trusted proxies: {:?}", args.trusted_proxies);
    println!();
    println!("Available endpoints:");
    println!("  GET  /health              - Liveness check");
    println!("  GET  /pub/{{authority}}     - Authority public key");
    println!("  GET  /static/{{name}}       - Static file");
    println!("  POST /apirequest          - Batched API calls");
    println!("  POST /admit               - Node admission");
    println!();
    println!("Press Ctrl+C to shutdown");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    println!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to install signal handlers: {e}");
            return std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
    }
}

/// Write the current server key and chain into `dir` unless they are the
/// ones already written. Returns the expiry of the written certificate.
fn write_server_certificate(
    context: &Context,
    dir: &std::path::Path,
    written: Option<i64>,
) -> keyserver::Result<i64> {
    let current = context.server_certificate()?;
    if written == Some(current.not_after) {
        return Ok(current.not_after);
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("server.key"), current.key_pem.as_bytes())?;
    std::fs::write(dir.join("server.pem"), &current.certificate_chain_pem)?;
    tracing::info!(
        dir = %dir.display(),
        not_after = current.not_after,
        "server certificate written"
    );
    Ok(current.not_after)
}

async fn refresh_server_certificate(context: Arc<Context>, dir: PathBuf, not_after: i64) {
    let mut written = Some(not_after);
    let mut interval = tokio::time::interval(TLS_REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        let context = context.clone();
        let dir = dir.clone();
        let result =
            tokio::task::spawn_blocking(move || write_server_certificate(&context, &dir, written))
                .await;
        match result {
            Ok(Ok(not_after)) => written = Some(not_after),
            Ok(Err(e)) => tracing::warn!("Failed to refresh server certificate: {e}"),
            Err(e) => tracing::error!("Server certificate task failed: {e}"),
        }
    }
}

/// Extract the caller's credentials. A client certificate header is only
/// taken from a trusted proxy; a bootstrap token is accepted from anyone.
fn credentials_from_headers(
    headers: &HeaderMap,
    peer: SocketAddr,
    proxies: &ProxyTrust,
) -> Result<Credentials, ApiError> {
    let certificate = headers.get(CLIENT_CERTIFICATE_HEADER);
    let certificate = if proxies.is_trusted(peer.ip()) {
        certificate
    } else {
        if certificate.is_some() {
            tracing::warn!(%peer, "ignoring client certificate header from untrusted peer");
        }
        None
    };

    let credentials = if let Some(value) = certificate {
        let raw = value.to_str().map_err(|_| {
            ApiError::authentication(
                keyserver::context::ContextError::InvalidCertificate {
                    reason: "client certificate header is not ASCII".to_string(),
                }
                .into(),
            )
        })?;
        Credentials::from_pem_chain(&decode_certificate_header(raw))
            .map_err(|e| ApiError::authentication(e.into()))?
    } else if let Some(value) = headers.get(TOKEN_HEADER)
        && let Ok(token) = value.to_str()
    {
        Credentials::from_token(token.trim())
    } else {
        Credentials::default()
    };
    Ok(credentials.with_source_ip(proxies.client_ip(headers, peer)))
}

/// Undo the proxy's URL encoding of a PEM chain.
fn decode_certificate_header(raw: &str) -> String {
    let query = format!("cert={raw}");
    url::form_urlencoded::parse(query.as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

/// Handler for GET /health
async fn handle_health_endpoint(State(state): State<AppState>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy",
        authorities: state.context.authorities().len(),
        accounts: state.context.accounts().len(),
    })
}

/// Handler for GET /pub/{authority}
async fn handle_public_key(
    State(state): State<AppState>,
    Path(authority): Path<String>,
) -> Result<Response, ApiError> {
    let key = state.context.public_key(&authority)?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], key).into_response())
}

/// Handler for GET /static/{name}
async fn handle_static_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let contents = state.context.static_file(&name)?.to_vec();
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], contents).into_response())
}

/// Handler for POST /apirequest
async fn handle_api_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ExtractJson(requests): ExtractJson<Vec<Request>>,
) -> Result<axum::Json<Vec<String>>, ApiError> {
    let credentials = credentials_from_headers(&headers, peer, &state.proxies)?;
    let account = state
        .context
        .authenticate(&credentials)
        .map_err(ApiError::authentication)?;

    // Signing is CPU-bound
    let context = state.context.clone();
    let responses = tokio::task::spawn_blocking(move || context.dispatch(account, &requests))
        .await
        .map_err(|e| keyserver::Error::Io(std::io::Error::other(e)))??;
    Ok(axum::Json(responses))
}

/// Handler for POST /admit
async fn handle_admit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    csr: String,
) -> Result<String, ApiError> {
    let source = state.proxies.client_ip(&headers, peer);
    let context = state.context.clone();
    let chain = tokio::task::spawn_blocking(move || context.admit(&csr, source))
        .await
        .map_err(|e| keyserver::Error::Io(std::io::Error::other(e)))??;
    Ok(chain)
}
