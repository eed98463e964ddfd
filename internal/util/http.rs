use crate::util::config::Config;
use axum::http::header::HOST;
use axum::http::HeaderMap;

/// Base URL for links that point back at this broker (self and verify
/// hrefs). An explicitly configured public URL wins; otherwise the URL is
/// rebuilt from the request's Host header and the configured scheme.
pub fn base_url(config: &Config, headers: &HeaderMap) -> Option<String> {
    if let Some(public_url) = &config.public_url {
        return Some(public_url.clone());
    }
    let host = headers.get(HOST)?.to_str().ok()?;
    let scheme = if config.server_ssl { "https" } else { "http" };
    Some(format!("{}://{}", scheme, host))
}

pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let mut diff = left.len() ^ right.len();
    let max_len = left.len().max(right.len());
    let mut index = 0usize;
    while index < max_len {
        let left_byte = left.get(index).copied().unwrap_or(0);
        let right_byte = right.get(index).copied().unwrap_or(0);
        diff |= (left_byte ^ right_byte) as usize;
        index += 1;
    }
    diff == 0
}
