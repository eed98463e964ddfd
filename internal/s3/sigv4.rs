use crate::util::config::{Config, MAX_PRESIGN_TTL_SECONDS};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignError {
    EmptyKey,
    TtlOutOfRange(i64),
    InvalidEndpoint,
}

impl SignError {
    pub fn message(&self) -> String {
        match self {
            SignError::EmptyKey => "object key must not be empty".to_string(),
            SignError::TtlOutOfRange(seconds) => format!(
                "presign TTL {} outside 1..={} seconds",
                seconds, MAX_PRESIGN_TTL_SECONDS
            ),
            SignError::InvalidEndpoint => "object store endpoint is not a valid URL".to_string(),
        }
    }
}

/// Query-presigned URL plus the lifetime it was signed for.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    url: Url,
    expires_in: i64,
}

/// A presigned grant re-rendered for clients that prefer header-based auth
/// (git-lfs#960): the authorization material moves out of the query string.
#[derive(Debug, Clone)]
pub struct HeaderAuthGrant {
    pub href: String,
    pub authorization: String,
    pub expires: String,
}

impl PresignedUrl {
    pub fn href(&self) -> String {
        self.url.to_string()
    }

    pub fn expires_in(&self) -> i64 {
        self.expires_in
    }

    pub fn into_header_auth(self) -> HeaderAuthGrant {
        let pairs: Vec<(String, String)> = self.url.query_pairs().into_owned().collect();
        let lookup = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };
        let authorization = format!(
            "{} Credential={}, SignedHeaders={}, Signature={}",
            lookup("X-Amz-Algorithm"),
            lookup("X-Amz-Credential"),
            lookup("X-Amz-SignedHeaders"),
            lookup("X-Amz-Signature"),
        );
        let expires = lookup("X-Amz-Expires");

        let mut url = self.url;
        let remaining: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(name, _)| {
                !matches!(
                    name.as_str(),
                    "X-Amz-Algorithm"
                        | "X-Amz-Credential"
                        | "X-Amz-SignedHeaders"
                        | "X-Amz-Signature"
                        | "X-Amz-Expires"
                )
            })
            .collect();
        if remaining.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&encode_query_pairs(&remaining)));
        }
        HeaderAuthGrant {
            href: url.to_string(),
            authorization,
            expires,
        }
    }
}

/// Manual SigV4 request signer for a single bucket. Produces query-presigned
/// GET/PUT URLs for clients and header-signed HEAD requests for the broker's
/// own existence probe.
#[derive(Clone, Debug)]
pub struct Presigner {
    endpoint: Url,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl Presigner {
    pub fn from_config(config: &Config) -> Result<Self, SignError> {
        Self::new(
            &config.s3_endpoint,
            &config.s3_bucket,
            &config.s3_region,
            &config.s3_access_key_id,
            &config.s3_secret_access_key,
        )
    }

    pub fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, SignError> {
        let endpoint = Url::parse(endpoint).map_err(|_| SignError::InvalidEndpoint)?;
        if endpoint.host_str().is_none() {
            return Err(SignError::InvalidEndpoint);
        }
        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            region: region.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    pub fn presign(
        &self,
        method: &str,
        key: &str,
        expires_in: i64,
        embed_token: bool,
    ) -> Result<PresignedUrl, SignError> {
        self.presign_at(method, key, expires_in, embed_token, Utc::now())
    }

    fn presign_at(
        &self,
        method: &str,
        key: &str,
        expires_in: i64,
        embed_token: bool,
        now: DateTime<Utc>,
    ) -> Result<PresignedUrl, SignError> {
        validate_ttl(expires_in)?;
        let method = method.to_uppercase();
        let scope = Scope::new(now, &self.region);
        let (mut url, path, host) = self.object_endpoint(key)?;

        let mut params = vec![
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key, scope.credential_scope),
            ),
            ("X-Amz-Date".to_string(), scope.amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires_in.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
            (
                "X-Amz-Content-Sha256".to_string(),
                UNSIGNED_PAYLOAD.to_string(),
            ),
        ];
        if embed_token {
            params.push(("token".to_string(), "1".to_string()));
        }
        // The signature binds to the exact canonical byte sequence, so the
        // query must be sorted before signing and rendered in that order.
        params.sort();

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method,
            canonical_uri(&path),
            encode_query_pairs(&params),
            host,
            UNSIGNED_PAYLOAD
        );
        let signature = self.signature(&scope, &canonical_request);
        params.push(("X-Amz-Signature".to_string(), signature));
        url.set_query(Some(&encode_query_pairs(&params)));
        Ok(PresignedUrl { url, expires_in })
    }

    /// Header-based signature for the broker's own HEAD existence probe.
    pub fn sign_head(&self, key: &str) -> Result<SignedHead, SignError> {
        self.sign_head_at(key, Utc::now())
    }

    fn sign_head_at(&self, key: &str, now: DateTime<Utc>) -> Result<SignedHead, SignError> {
        let scope = Scope::new(now, &self.region);
        let (url, path, host) = self.object_endpoint(key)?;
        let payload_hash = hex::encode(Sha256::digest(b""));

        let canonical_request = format!(
            "HEAD\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
            canonical_uri(&path),
            host,
            payload_hash,
            scope.amz_date,
            payload_hash
        );
        let signature = self.signature(&scope, &canonical_request);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            ALGORITHM, self.access_key, scope.credential_scope, signature
        );
        Ok(SignedHead {
            url,
            amz_date: scope.amz_date,
            content_sha256: payload_hash,
            authorization,
        })
    }

    fn object_endpoint(&self, key: &str) -> Result<(Url, String, String), SignError> {
        if key.is_empty() {
            return Err(SignError::EmptyKey);
        }
        let mut url = self.endpoint.clone();
        let path = format!("/{}/{}", self.bucket, key);
        url.set_path(&path);
        let host = url.host_str().ok_or(SignError::InvalidEndpoint)?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok((url, path, host))
    }

    fn signature(&self, scope: &Scope, canonical_request: &str) -> String {
        let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, scope.amz_date, scope.credential_scope, canonical_hash
        );
        derive_signature(
            &self.secret_key,
            &scope.date_stamp,
            &self.region,
            &string_to_sign,
        )
    }
}

/// Signed HEAD request: target URL plus the headers that authorize it.
#[derive(Debug, Clone)]
pub struct SignedHead {
    pub url: Url,
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

struct Scope {
    amz_date: String,
    date_stamp: String,
    credential_scope: String,
}

impl Scope {
    fn new(now: DateTime<Utc>, region: &str) -> Self {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
        Self {
            amz_date,
            date_stamp,
            credential_scope,
        }
    }
}

fn validate_ttl(expires_in: i64) -> Result<(), SignError> {
    if expires_in <= 0 || expires_in > MAX_PRESIGN_TTL_SECONDS {
        return Err(SignError::TtlOutOfRange(expires_in));
    }
    Ok(())
}

fn derive_signature(secret: &str, date_stamp: &str, region: &str, string_to_sign: &str) -> String {
    let mut key = sign(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    key = sign(&key, region.as_bytes());
    key = sign(&key, b"s3");
    key = sign(&key, b"aws4_request");
    hex::encode(sign(&key, string_to_sign.as_bytes()))
}

fn sign(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_uri(path: &str) -> String {
    let segments = path.split('/').map(encode).collect::<Vec<String>>();
    let mut out = segments.join("/");
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

fn encode_query_pairs(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect::<Vec<String>>()
        .join("&")
}

fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        match *byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
