use crate::api::AppState;
use crate::auth;
use crate::util::config::Config;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn base_config() -> Config {
    Config {
        s3_region: "us-east-1".to_string(),
        s3_bucket: "lfs-objects".to_string(),
        s3_access_key_id: "AKIDEXAMPLE".to_string(),
        s3_secret_access_key: "secret".to_string(),
        s3_endpoint: "http://127.0.0.1:1".to_string(),
        token_secret: "broker-token-secret".to_string(),
        token_ttl_seconds: 900,
        presign_ttl_seconds: 900,
        server_path: "/:project/lfs".to_string(),
        public_url: None,
        server_ssl: false,
        verbose_errors: false,
        listen: "127.0.0.1:0".to_string(),
        metrics_listen: "127.0.0.1:0".to_string(),
        log_level: "info".to_string(),
        insecure_dev: false,
    }
}

pub fn build_state(endpoint: &str) -> AppState {
    let mut config = base_config();
    config.s3_endpoint = endpoint.to_string();
    AppState::new(config).expect("app state")
}

pub fn auth_header(state: &AppState, project: &str) -> String {
    auth::header_value(&state.tokens.issue(project))
}

/// In-process stand-in for the object store: answers signed HEAD probes
/// from a fixed key -> size map. Responding with a sized body lets hyper
/// advertise Content-Length on the HEAD response without sending a payload.
pub struct FakeObjectStore {
    pub endpoint: String,
    handle: JoinHandle<()>,
}

impl Drop for FakeObjectStore {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_object_store(objects: &[(&str, u64)]) -> FakeObjectStore {
    let map: Arc<HashMap<String, u64>> = Arc::new(
        objects
            .iter()
            .map(|(key, size)| (key.to_string(), *size))
            .collect(),
    );
    let app = Router::new()
        .route("/{*path}", any(fake_head_handler))
        .with_state(map);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakeObjectStore {
        endpoint: format!("http://{}", addr),
        handle,
    }
}

async fn fake_head_handler(
    State(objects): State<Arc<HashMap<String, u64>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let signed = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("AWS4-HMAC-SHA256"))
        .unwrap_or(false);
    let path = uri.path().trim_start_matches('/');
    let key = match path.strip_prefix("lfs-objects/") {
        Some(key) if signed => key,
        _ => return StatusCode::FORBIDDEN.into_response(),
    };
    match objects.get(key) {
        Some(size) => Response::new(Body::from(vec![0u8; *size as usize])),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn state_with_store(objects: &[(&str, u64)]) -> (AppState, FakeObjectStore) {
    let store = spawn_object_store(objects).await;
    let state = build_state(&store.endpoint);
    (state, store)
}
