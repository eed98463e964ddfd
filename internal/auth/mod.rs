use crate::lfs::CONTENT_TYPE_LFS;
use crate::util::config::Config;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub mod token;

pub use token::{AuthError, TokenAuthenticator};

/// Authorization scheme used between the broker and LFS clients. The
/// external authenticator issues tokens with the same shared secret; the
/// broker re-issues them on upload grants so clients can call verify.
const SCHEME_PREFIX: &str = "RemoteAuth ";
const CHALLENGE: &str = "RemoteAuth realm=\"Restricted Area\"";

pub fn authenticate(
    tokens: &TokenAuthenticator,
    headers: &HeaderMap,
    project: &str,
) -> Result<(), AuthError> {
    let token = remote_auth_token(headers).ok_or(AuthError::Missing)?;
    tokens.verify(token, project)
}

fn remote_auth_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(SCHEME_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Header value a client must present (and echo back on verify).
pub fn header_value(token: &str) -> String {
    format!("{}{}", SCHEME_PREFIX, token)
}

pub fn unauthorized_response(config: &Config, err: AuthError) -> Response {
    let message = if config.verbose_errors {
        err.reason()
    } else {
        "Invalid authorization"
    };
    (
        StatusCode::UNAUTHORIZED,
        [
            ("WWW-Authenticate", CHALLENGE),
            ("Content-Type", CONTENT_TYPE_LFS),
        ],
        json!({ "message": message }).to_string(),
    )
        .into_response()
}
