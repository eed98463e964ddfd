use crate::api::AppState;
use crate::auth::{self, AuthError};
use crate::lfs::{
    self, Action, BatchObject, BatchRequest, BatchResponse, ObjectSpec, Operation, UploadOutcome,
    CONTENT_TYPE_LFS,
};
use crate::s3::sigv4::{PresignedUrl, SignError};
use crate::s3::{object_key, StoreError};
use crate::util::http::base_url;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

enum TransferError {
    Auth(AuthError),
    BadRequest(&'static str),
    NoHost,
    Store(StoreError),
    Sign(SignError),
}

impl From<AuthError> for TransferError {
    fn from(err: AuthError) -> Self {
        TransferError::Auth(err)
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        TransferError::Store(err)
    }
}

impl From<SignError> for TransferError {
    fn from(err: SignError) -> Self {
        TransferError::Sign(err)
    }
}

pub async fn root_handler() -> &'static str {
    "Git LFS S3 broker is online."
}

pub async fn legacy_show_handler(
    State(state): State<AppState>,
    Path((project, oid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let response = serve_legacy_show(&state, &project, &oid, &headers)
        .await
        .unwrap_or_else(|err| render_error(&state, err));
    record_lfs_request(&state, "legacy-show", response.status());
    response
}

async fn serve_legacy_show(
    state: &AppState,
    project: &str,
    oid: &str,
    headers: &HeaderMap,
) -> Result<Response, TransferError> {
    auth::authenticate(&state.tokens, headers, project)?;
    let base = base_url(&state.config, headers).ok_or(TransferError::NoHost)?;
    let key = object_key(project, oid);
    let stored = state.store.head_object(&key).await?;
    if !stored.exists {
        return Ok(lfs_json(
            StatusCode::NOT_FOUND,
            json!({ "message": "Object not found" }),
        ));
    }

    let grant = download_grant(state, &key)?.into_header_auth();
    let self_href = format!(
        "{}{}/objects/{}",
        base,
        state.server_path.render(project),
        oid
    );
    let body = json!({
        "oid": oid,
        "size": stored.size,
        "_links": {
            "self": { "href": self_href },
            "download": {
                "href": grant.href,
                "headers": { "Authorization": grant.authorization },
                "expires": grant.expires,
            }
        }
    });
    Ok(lfs_json(StatusCode::OK, body))
}

pub async fn legacy_upload_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = serve_legacy_upload(&state, &project, &headers, &body)
        .await
        .unwrap_or_else(|err| render_error(&state, err));
    record_lfs_request(&state, "legacy-upload", response.status());
    response
}

async fn serve_legacy_upload(
    state: &AppState,
    project: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, TransferError> {
    auth::authenticate(&state.tokens, headers, project)?;
    let base = base_url(&state.config, headers).ok_or(TransferError::NoHost)?;
    let spec: ObjectSpec =
        serde_json::from_slice(body).map_err(|_| TransferError::BadRequest("invalid request body"))?;
    let key = object_key(project, &spec.oid);
    let stored = state.store.head_object(&key).await?;
    debug!(project, oid = %spec.oid, exists = stored.exists, "resolved object state");

    match lfs::decide(&spec, &stored) {
        UploadOutcome::DownloadReady => {
            let grant = download_grant(state, &key)?;
            Ok(lfs_json(
                StatusCode::OK,
                json!({ "_links": { "download": { "href": grant.href() } } }),
            ))
        }
        UploadOutcome::UploadRequired => {
            let grant = upload_grant(state, &key)?;
            let token = state.tokens.issue(project);
            let body = json!({
                "_links": {
                    "upload": {
                        "href": grant.href(),
                        "header": { "content-type": "" },
                    },
                    "verify": {
                        "href": verify_href(state, &base, project),
                        "header": { "Authorization": auth::header_value(&token) },
                    }
                }
            });
            Ok(lfs_json(StatusCode::ACCEPTED, body))
        }
    }
}

pub async fn batch_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = serve_batch(&state, &project, &headers, &body)
        .await
        .unwrap_or_else(|err| render_error(&state, err));
    record_lfs_request(&state, "batch", response.status());
    response
}

async fn serve_batch(
    state: &AppState,
    project: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, TransferError> {
    auth::authenticate(&state.tokens, headers, project)?;
    let base = base_url(&state.config, headers).ok_or(TransferError::NoHost)?;
    let request: BatchRequest =
        serde_json::from_slice(body).map_err(|_| TransferError::BadRequest("invalid request body"))?;
    let operation = Operation::parse(&request.operation);

    let mut objects = Vec::with_capacity(request.objects.len());
    for spec in &request.objects {
        objects.push(batch_entry(state, &base, project, operation, spec).await?);
    }
    Ok(lfs_json(
        StatusCode::OK,
        serde_json::to_value(BatchResponse { objects }).expect("serialize response"),
    ))
}

/// One object's outcome, computed independently of its siblings. Decision
/// outcomes render as per-item actions or error entries inside the 200
/// envelope; only broker-side failures escape as request errors.
async fn batch_entry(
    state: &AppState,
    base: &str,
    project: &str,
    operation: Option<Operation>,
    spec: &ObjectSpec,
) -> Result<BatchObject, TransferError> {
    let Some(operation) = operation else {
        return Ok(BatchObject::with_error(spec, 400, "Invalid operation"));
    };
    let key = object_key(project, &spec.oid);
    let stored = state.store.head_object(&key).await?;

    let entry = match (operation, lfs::decide(spec, &stored)) {
        (Operation::Download, UploadOutcome::UploadRequired) => {
            BatchObject::with_error(spec, 404, "Object does not exist")
        }
        (_, UploadOutcome::DownloadReady) => {
            let grant = download_grant(state, &key)?;
            let mut actions = BTreeMap::new();
            actions.insert("download", Action::new(grant.href(), grant.expires_in()));
            BatchObject::with_actions(spec, actions)
        }
        (Operation::Upload, UploadOutcome::UploadRequired) => {
            let grant = upload_grant(state, &key)?;
            let mut actions = BTreeMap::new();
            actions.insert(
                "upload",
                Action::new(grant.href(), grant.expires_in()).with_header("content-type", ""),
            );
            actions.insert("verify", verify_action(state, base, project));
            BatchObject::with_actions(spec, actions)
        }
    };
    Ok(entry)
}

pub async fn verify_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = serve_verify(&state, &project, &headers, &body)
        .await
        .unwrap_or_else(|err| render_error(&state, err));
    record_lfs_request(&state, "verify", response.status());
    response
}

async fn serve_verify(
    state: &AppState,
    project: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, TransferError> {
    auth::authenticate(&state.tokens, headers, project)?;
    let spec: ObjectSpec =
        serde_json::from_slice(body).map_err(|_| TransferError::BadRequest("invalid request body"))?;
    let stored = state
        .store
        .head_object(&object_key(project, &spec.oid))
        .await?;
    if stored.exists && stored.size == spec.size {
        Ok(StatusCode::OK.into_response())
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}

fn download_grant(state: &AppState, key: &str) -> Result<PresignedUrl, TransferError> {
    let grant = state
        .store
        .signer()
        .presign("GET", key, state.config.presign_ttl_seconds, true)?;
    state.metrics.grants_issued.with_label_values(&["get"]).inc();
    Ok(grant)
}

fn upload_grant(state: &AppState, key: &str) -> Result<PresignedUrl, TransferError> {
    let grant = state
        .store
        .signer()
        .presign("PUT", key, state.config.presign_ttl_seconds, true)?;
    state.metrics.grants_issued.with_label_values(&["put"]).inc();
    Ok(grant)
}

fn verify_href(state: &AppState, base: &str, project: &str) -> String {
    format!("{}{}/verify", base, state.server_path.render(project))
}

fn verify_action(state: &AppState, base: &str, project: &str) -> Action {
    let token = state.tokens.issue(project);
    Action::new(verify_href(state, base, project), state.config.token_ttl_seconds)
        .with_header("Authorization", &auth::header_value(&token))
}

fn lfs_json(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [("Content-Type", CONTENT_TYPE_LFS)],
        body.to_string(),
    )
        .into_response()
}

fn render_error(state: &AppState, err: TransferError) -> Response {
    match err {
        TransferError::Auth(err) => {
            state
                .metrics
                .auth_failures
                .with_label_values(&[auth_failure_label(err)])
                .inc();
            auth::unauthorized_response(&state.config, err)
        }
        TransferError::BadRequest(message) => {
            lfs_json(StatusCode::BAD_REQUEST, json!({ "message": message }))
        }
        TransferError::NoHost => {
            tracing::error!("request carried no usable host header and no public URL is set");
            internal_error()
        }
        TransferError::Store(err) => {
            tracing::error!(error = %err.message(), "object store probe failed");
            internal_error()
        }
        TransferError::Sign(err) => {
            tracing::error!(error = %err.message(), "presign failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    lfs_json(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "internal server error" }),
    )
}

fn auth_failure_label(err: AuthError) -> &'static str {
    match err {
        AuthError::Missing => "missing",
        AuthError::Malformed => "malformed",
        AuthError::BadSignature => "bad_signature",
        AuthError::ProjectMismatch => "project_mismatch",
        AuthError::Expired => "expired",
    }
}

fn record_lfs_request(state: &AppState, op: &str, status: StatusCode) {
    state
        .metrics
        .lfs_requests
        .with_label_values(&[op, &status.as_u16().to_string()])
        .inc();
}

#[cfg(test)]
mod tests {
    use crate::api::{router, AppState};
    use crate::test_support::{self, FakeObjectStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    const EXISTING_OID: &str =
        "087a4597b239a1ab0e916956f187c7d404b3c3b8aaf3b1fb99027ec1d19cbb59";
    const EXISTING_SIZE: u64 = 123456;
    const MISSING_OID: &str =
        "0000000000000000000000000000000000000000000000000000000000000000";
    const MISSING_SIZE: u64 = 54321;

    async fn state_with_existing() -> (AppState, FakeObjectStore) {
        let key = format!("test-repo/{}", EXISTING_OID);
        test_support::state_with_store(&[(key.as_str(), EXISTING_SIZE)]).await
    }

    fn get_request(state: &AppState, uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("Host", "broker.local:8080")
            .header("Authorization", test_support::auth_header(state, "test-repo"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_request(state: &AppState, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Host", "broker.local:8080")
            .header("Authorization", test_support::auth_header(state, "test-repo"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn root_reports_liveness_without_auth() {
        let state = test_support::build_state("http://127.0.0.1:1");
        let response = router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert!(String::from_utf8_lossy(&bytes).contains("online"));
    }

    #[tokio::test]
    async fn legacy_show_returns_download_link_with_header_auth() {
        let (state, _store) = state_with_existing().await;
        let uri = format!("/test-repo/lfs/objects/{}", EXISTING_OID);
        let response = router(state.clone())
            .oneshot(get_request(&state, &uri))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("Content-Type")
                .and_then(|value| value.to_str().ok()),
            Some("application/vnd.git-lfs+json")
        );

        let body = json_body(response).await;
        assert_eq!(body["oid"], EXISTING_OID);
        assert_eq!(body["size"], EXISTING_SIZE);
        assert_eq!(
            body["_links"]["self"]["href"],
            format!(
                "http://broker.local:8080/test-repo/lfs/objects/{}",
                EXISTING_OID
            )
        );
        let download = &body["_links"]["download"];
        let href = download["href"].as_str().expect("href");
        assert!(href.contains(&format!("/lfs-objects/test-repo/{}", EXISTING_OID)));
        assert!(!href.contains("X-Amz-Signature"));
        let authorization = download["headers"]["Authorization"]
            .as_str()
            .expect("authorization");
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential="));
        assert!(authorization.contains("Signature="));
        assert_eq!(download["expires"], "900");
    }

    #[tokio::test]
    async fn legacy_show_returns_not_found_for_missing_object() {
        let (state, _store) = state_with_existing().await;
        let uri = format!("/test-repo/lfs/objects/{}", MISSING_OID);
        let response = router(state.clone())
            .oneshot(get_request(&state, &uri))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Object not found");
    }

    #[tokio::test]
    async fn legacy_upload_returns_download_only_for_existing_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let href = body["_links"]["download"]["href"].as_str().expect("href");
        assert!(href.contains("X-Amz-Signature"));
        assert!(href.contains("token=1"));
        assert!(body["_links"].get("upload").is_none());
        assert!(body["_links"].get("verify").is_none());
    }

    #[tokio::test]
    async fn legacy_upload_returns_upload_and_verify_for_missing_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects",
                serde_json::json!({ "oid": MISSING_OID, "size": MISSING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let upload = &body["_links"]["upload"];
        assert!(upload["href"].as_str().expect("href").contains("X-Amz-Signature"));
        assert_eq!(upload["header"]["content-type"], "");
        let verify = &body["_links"]["verify"];
        assert_eq!(
            verify["href"],
            "http://broker.local:8080/test-repo/lfs/verify"
        );
        let token_header = verify["header"]["Authorization"].as_str().expect("header");
        assert!(token_header.starts_with("RemoteAuth "));
    }

    #[tokio::test]
    async fn legacy_upload_treats_size_mismatch_as_upload_required() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE + 1 }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn legacy_upload_rejects_malformed_body() {
        let (state, _store) = state_with_existing().await;
        let request = Request::builder()
            .method("POST")
            .uri("/test-repo/lfs/objects")
            .header("Host", "broker.local:8080")
            .header("Authorization", test_support::auth_header(&state, "test-repo"))
            .body(Body::from("not json"))
            .unwrap();
        let response = router(state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_download_returns_action_for_existing_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "download",
                    "objects": [{ "oid": EXISTING_OID, "size": EXISTING_SIZE }],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let objects = body["objects"].as_array().expect("objects");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["oid"], EXISTING_OID);
        assert_eq!(objects[0]["size"], EXISTING_SIZE);
        let download = &objects[0]["actions"]["download"];
        assert!(download["href"].as_str().expect("href").contains("X-Amz-Signature"));
        assert_eq!(download["expires_in"], 900);
        assert!(objects[0].get("error").is_none());
    }

    #[tokio::test]
    async fn batch_upload_returns_upload_and_verify_actions_for_missing_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "upload",
                    "objects": [{ "oid": MISSING_OID, "size": MISSING_SIZE }],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let actions = &body["objects"][0]["actions"];
        assert!(actions["upload"]["href"]
            .as_str()
            .expect("href")
            .contains("X-Amz-Signature"));
        assert_eq!(actions["upload"]["header"]["content-type"], "");
        assert_eq!(
            actions["verify"]["href"],
            "http://broker.local:8080/test-repo/lfs/verify"
        );
        assert!(actions["verify"]["header"]["Authorization"]
            .as_str()
            .expect("header")
            .starts_with("RemoteAuth "));
    }

    #[tokio::test]
    async fn batch_upload_returns_download_action_for_already_uploaded_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "upload",
                    "objects": [{ "oid": EXISTING_OID, "size": EXISTING_SIZE }],
                }),
            ))
            .await
            .expect("response");
        let body = json_body(response).await;
        let actions = &body["objects"][0]["actions"];
        assert!(actions.get("download").is_some());
        assert!(actions.get("upload").is_none());
        assert!(actions.get("verify").is_none());
    }

    #[tokio::test]
    async fn batch_download_of_missing_object_is_item_error_not_http_error() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "download",
                    "objects": [{ "oid": MISSING_OID, "size": MISSING_SIZE }],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let entry = &body["objects"][0];
        assert_eq!(entry["oid"], MISSING_OID);
        assert_eq!(entry["size"], MISSING_SIZE);
        assert_eq!(entry["error"]["code"], 404);
        assert!(entry.get("actions").is_none());
    }

    #[tokio::test]
    async fn batch_unknown_operation_flags_every_object_with_400() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "badactiondoesnotexist",
                    "objects": [
                        { "oid": MISSING_OID, "size": MISSING_SIZE },
                        { "oid": EXISTING_OID, "size": EXISTING_SIZE },
                    ],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let objects = body["objects"].as_array().expect("objects");
        assert_eq!(objects.len(), 2);
        for entry in objects {
            assert_eq!(entry["error"]["code"], 400);
        }
    }

    #[tokio::test]
    async fn batch_isolates_item_outcomes() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "download",
                    "objects": [
                        { "oid": EXISTING_OID, "size": EXISTING_SIZE },
                        { "oid": MISSING_OID, "size": MISSING_SIZE },
                    ],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let objects = body["objects"].as_array().expect("objects");
        assert!(objects[0].get("actions").is_some());
        assert_eq!(objects[1]["error"]["code"], 404);
    }

    #[tokio::test]
    async fn batch_rejects_malformed_body() {
        let (state, _store) = state_with_existing().await;
        let request = Request::builder()
            .method("POST")
            .uri("/test-repo/lfs/objects/batch")
            .header("Host", "broker.local:8080")
            .header("Authorization", test_support::auth_header(&state, "test-repo"))
            .body(Body::from("{"))
            .unwrap();
        let response = router(state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_confirms_present_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/verify",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verify_rejects_missing_or_mismatched_object() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/verify",
                serde_json::json!({ "oid": MISSING_OID, "size": MISSING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/verify",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE + 1 }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_grant_token_authorizes_verify_round_trip() {
        let (state, _store) = state_with_existing().await;
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects",
                serde_json::json!({ "oid": MISSING_OID, "size": MISSING_SIZE }),
            ))
            .await
            .expect("response");
        let body = json_body(response).await;
        let token_header = body["_links"]["verify"]["header"]["Authorization"]
            .as_str()
            .expect("header")
            .to_string();

        let request = Request::builder()
            .method("POST")
            .uri("/test-repo/lfs/verify")
            .header("Host", "broker.local:8080")
            .header("Authorization", token_header.as_str())
            .body(Body::from(
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }).to_string(),
            ))
            .unwrap();
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        // The same token does not authorize a different project path.
        let request = Request::builder()
            .method("POST")
            .uri("/other-repo/lfs/verify")
            .header("Host", "broker.local:8080")
            .header("Authorization", token_header.as_str())
            .body(Body::from(
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }).to_string(),
            ))
            .unwrap();
        let response = router(state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_authorization_yields_challenge() {
        let (state, _store) = state_with_existing().await;
        let request = Request::builder()
            .method("POST")
            .uri("/test-repo/lfs/objects/batch")
            .header("Host", "broker.local:8080")
            .body(Body::from(
                serde_json::json!({ "operation": "download", "objects": [] }).to_string(),
            ))
            .unwrap();
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|value| value.to_str().ok()),
            Some("RemoteAuth realm=\"Restricted Area\"")
        );
        let body = json_body(response).await;
        assert_eq!(body["message"], "Invalid authorization");
        assert_eq!(
            state
                .metrics
                .auth_failures
                .with_label_values(&["missing"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn verbose_mode_echoes_auth_failure_reason() {
        let (mut state, _store) = state_with_existing().await;
        state.config.verbose_errors = true;
        let request = Request::builder()
            .method("POST")
            .uri("/test-repo/lfs/objects/batch")
            .header("Host", "broker.local:8080")
            .header(
                "Authorization",
                test_support::auth_header(&state, "other-repo"),
            )
            .body(Body::from(
                serde_json::json!({ "operation": "download", "objects": [] }).to_string(),
            ))
            .unwrap();
        let response = router(state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(
            body["message"],
            "authorization token bound to another project"
        );
    }

    #[tokio::test]
    async fn store_failure_is_fatal_to_the_request() {
        let (reference, store) = state_with_existing().await;
        // Point the broker at a bucket the store denies; the probe comes
        // back 403 and the request fails with 500.
        let mut config = reference.config.clone();
        config.s3_bucket = "other-bucket".to_string();
        let state = AppState::new(config).expect("state");
        drop(reference);
        let _keep_alive = store;

        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects/batch",
                serde_json::json!({
                    "operation": "download",
                    "objects": [{ "oid": EXISTING_OID, "size": EXISTING_SIZE }],
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["message"], "internal server error");
    }

    #[tokio::test]
    async fn store_connection_failure_is_fatal_to_the_request() {
        let state = test_support::build_state("http://127.0.0.1:1");
        let response = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/objects",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn requests_record_lfs_metrics() {
        let (state, _store) = state_with_existing().await;
        let _ = router(state.clone())
            .oneshot(post_request(
                &state,
                "/test-repo/lfs/verify",
                serde_json::json!({ "oid": EXISTING_OID, "size": EXISTING_SIZE }),
            ))
            .await
            .expect("response");
        assert_eq!(
            state
                .metrics
                .lfs_requests
                .with_label_values(&["verify", "200"])
                .get(),
            1
        );
    }
}
