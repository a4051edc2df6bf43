//! basalt - S3-compatible object storage backed by the local filesystem

use axum::{extract::DefaultBodyLimit, middleware, routing::get, Extension, Router};
use axum_server::tls_rustls::RustlsConfig;
use basalt::api::auth::sigv4_auth_middleware;
use basalt::api::context::ServerInfo;
use basalt::api::handlers::{
    create_bucket, delete_bucket, delete_object, get_object, head_bucket, head_object, head_root,
    list_objects, method_not_allowed, post_bucket, post_object, pre_route_checks, put_object,
    root_get, AppState,
};
use basalt::config::{Config, TlsConfig};
use basalt::storage::FsStore;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.3.2 (built 2026-07-30T08:12:45Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("BASALT_BUILD_TIME"),
        )
    })
}

/// basalt — S3-compatible object storage backed by the local filesystem
#[derive(Parser, Debug)]
#[command(name = "basalt")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > BASALT_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("BASALT_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("basalt=trace,tower_http=trace")
            } else {
                EnvFilter::new("basalt=debug,tower_http=debug")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    // A server nobody can authenticate against is a misconfiguration.
    config.validate()?;

    info!(
        "Starting basalt v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BASALT_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Data directory: {:?}", config.data_dir);
    info!(
        "  Max request size: {} MB",
        config.max_request_size / 1024 / 1024
    );
    info!("  Credentials: {} access key(s)", config.credentials.len());
    if config.allow_legacy_access_key_only {
        warn!(
            "  Legacy access-key-only mode ENABLED for {} key(s)",
            config.allowed_access_keys.len()
        );
    }
    if config.allow_host_candidate_fallbacks {
        info!("  Host candidate fallbacks: enabled (proxied deployments)");
    }
    if let Some(ref path) = config.auth_debug_log {
        info!("  Auth debug log: {:?}", path);
    }

    let store = Arc::new(FsStore::new(config.data_dir.clone()).await?);

    let state = Arc::new(AppState {
        store,
        max_request_size: config.max_request_size,
    });
    let auth_config = Arc::new(config.auth_config());
    let server_info = Arc::new(ServerInfo {
        server_name: config.effective_server_name(),
        server_port: config.listen_addr.port(),
        tls: config.tls_enabled(),
    });

    // Path-style S3 routes:
    //   GET    /{bucket}              - list objects
    //   POST   /{bucket}?delete       - bulk delete
    //   PUT    /{bucket}/{key}        - upload object (or part with ?uploadId&partNumber)
    //   GET    /{bucket}/{key}        - download object (Range supported)
    //   HEAD   /{bucket}/{key}        - object metadata
    //   POST   /{bucket}/{key}        - multipart initiate/complete
    //   DELETE /{bucket}/{key}        - delete object (or abort with ?uploadId)
    let bucket_routes = get(list_objects)
        .put(create_bucket)
        .delete(delete_bucket)
        .head(head_bucket)
        .post(post_bucket)
        .fallback(method_not_allowed);

    let app = Router::new()
        // Root: HEAD probe for S3 client compatibility; nothing else served
        .route("/", get(root_get).head(head_root).fallback(method_not_allowed))
        // Object operations (wildcard routes first - more specific)
        .route(
            "/:bucket/*key",
            get(get_object)
                .put(put_object)
                .delete(delete_object)
                .head(head_object)
                .post(post_object)
                .fallback(method_not_allowed),
        )
        // Bucket operations (with and without trailing slash)
        .route("/:bucket", bucket_routes.clone())
        .route("/:bucket/", bucket_routes)
        .layer(TraceLayer::new_for_http())
        // SigV4 authentication; its config arrives via the Extension layers
        .layer(middleware::from_fn(sigv4_auth_middleware))
        .layer(Extension(auth_config))
        .layer(Extension(server_info))
        // Path validation + declared-size cap, before authentication
        .layer(middleware::from_fn_with_state(
            state.clone(),
            pre_route_checks,
        ))
        // Streaming byte cap behind the declared-length check; slack covers
        // aws-chunked framing overhead on a body of exactly the max size
        .layer(DefaultBodyLimit::max(
            config.max_request_size.saturating_add(64 * 1024) as usize,
        ))
        .with_state(state);

    if let Some(tls) = &config.tls {
        let rustls = rustls_config(tls, &config.effective_server_name()).await?;
        if tls.cert_path.is_some() {
            info!("  TLS: enabled (user-provided certificate)");
        } else {
            warn!("  TLS: enabled (auto-generated self-signed certificate)");
        }

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!("basalt listening on https://{}", config.listen_addr);
        axum_server::bind_rustls(config.listen_addr, rustls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("basalt listening on http://{}", config.listen_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown())
            .await?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Build the rustls config for the HTTPS listener.
///
/// With both PEM paths configured the certificate comes from disk.
/// Otherwise an ephemeral self-signed certificate is generated covering
/// the configured server name plus loopback, enough for lab and test
/// deployments where clients skip verification anyway.
async fn rustls_config(
    tls: &TlsConfig,
    server_name: &str,
) -> Result<RustlsConfig, Box<dyn std::error::Error>> {
    if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
        return Ok(RustlsConfig::from_pem_file(cert, key).await?);
    }

    let mut subject_alt_names = vec![server_name.to_string()];
    for fallback in ["localhost", "127.0.0.1"] {
        if server_name != fallback {
            subject_alt_names.push(fallback.to_string());
        }
    }

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = rcgen::CertificateParams::new(subject_alt_names)?.self_signed(&key_pair)?;
    Ok(RustlsConfig::from_pem(
        cert.pem().into_bytes(),
        key_pair.serialize_pem().into_bytes(),
    )
    .await?)
}

/// Resolves once the process is asked to stop (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Received Ctrl+C, initiating graceful shutdown..."),
            _ = term.recv() => warn!("Received SIGTERM, initiating graceful shutdown..."),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        warn!("Received Ctrl+C, initiating graceful shutdown...");
    }
}
