use crate::auth::TokenAuthenticator;
use crate::obs::{Metrics, MetricsLayer};
use crate::s3::sigv4::Presigner;
use crate::s3::S3Store;
use crate::util::config::Config;
use crate::util::server_path::ServerPath;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use chrono::Duration;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub mod transfer;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub tokens: TokenAuthenticator,
    pub store: S3Store,
    pub server_path: ServerPath,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, String> {
        let server_path = ServerPath::new(&config.server_path)?;
        let signer = Presigner::from_config(&config).map_err(|err| err.message())?;
        let tokens = TokenAuthenticator::new(
            config.token_secret.as_bytes(),
            Duration::seconds(config.token_ttl_seconds),
        );
        Ok(Self {
            metrics: Metrics::new(),
            tokens,
            store: S3Store::new(signer),
            server_path,
            config,
        })
    }
}

/// LFS routes, mounted under the configured server path template. The
/// `{project}` path parameter is the project selector.
pub fn router(state: AppState) -> Router {
    let prefix = state.server_path.route_prefix();
    Router::new()
        .route("/", get(transfer::root_handler))
        .route(
            &format!("{prefix}/objects/batch"),
            post(transfer::batch_handler),
        )
        .route(
            &format!("{prefix}/objects/{{oid}}"),
            get(transfer::legacy_show_handler),
        )
        .route(
            &format!("{prefix}/objects"),
            post(transfer::legacy_upload_handler),
        )
        .route(&format!("{prefix}/verify"), post(transfer::verify_handler))
        .with_state(state)
}

pub struct Servers {
    handles: Vec<JoinHandle<()>>,
}

impl Servers {
    pub async fn run_all(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

pub fn build_servers(state: AppState) -> Result<Servers, String> {
    let mut handles = Vec::new();

    let lfs_app = router(state.clone()).layer(MetricsLayer::new(state.metrics.clone()));
    handles.push(spawn_server(&state.config.listen, lfs_app)?);

    let metrics_app = metrics_router(state.clone());
    handles.push(spawn_server(&state.config.metrics_listen, metrics_app)?);

    Ok(Servers { handles })
}

fn spawn_server(addr: &str, app: Router) -> Result<JoinHandle<()>, String> {
    let socket: SocketAddr = addr
        .parse()
        .map_err(|_| format!("invalid listen addr {addr}"))?;
    let handle = tokio::spawn(async move {
        let listener = match TcpListener::bind(socket).await {
            Ok(val) => val,
            Err(_) => return,
        };
        let _ = axum::serve(listener, app).await;
    });
    Ok(handle)
}

pub fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&state.metrics.gather(), &mut buffer);
    String::from_utf8_lossy(&buffer).to_string()
}
