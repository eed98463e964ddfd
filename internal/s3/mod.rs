use reqwest::header::CONTENT_LENGTH;

pub mod sigv4;

use sigv4::{Presigner, SignError};

/// The store's current knowledge of an object key. Always freshly queried,
/// never cached across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectState {
    pub exists: bool,
    pub size: u64,
}

#[derive(Debug)]
pub enum StoreError {
    Sign(SignError),
    Request(String),
    UnexpectedStatus(u16),
}

impl StoreError {
    pub fn message(&self) -> String {
        match self {
            StoreError::Sign(err) => err.message(),
            StoreError::Request(detail) => format!("object store request failed: {detail}"),
            StoreError::UnexpectedStatus(status) => {
                format!("object store returned unexpected status {status}")
            }
        }
    }
}

impl From<SignError> for StoreError {
    fn from(err: SignError) -> Self {
        StoreError::Sign(err)
    }
}

/// Storage key for an LFS object within a project namespace.
pub fn object_key(project: &str, oid: &str) -> String {
    format!("{}/{}", project, oid)
}

/// Metadata client for the backing object store. The broker never touches
/// object bytes; this is the narrow existence/size interface the decision
/// logic consumes. No retries here.
#[derive(Clone)]
pub struct S3Store {
    client: reqwest::Client,
    signer: Presigner,
}

impl S3Store {
    pub fn new(signer: Presigner) -> Self {
        Self {
            client: reqwest::Client::new(),
            signer,
        }
    }

    pub fn signer(&self) -> &Presigner {
        &self.signer
    }

    pub async fn head_object(&self, key: &str) -> Result<ObjectState, StoreError> {
        let signed = self.signer.sign_head(key)?;
        let response = self
            .client
            .head(signed.url.clone())
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.content_sha256)
            .header("authorization", &signed.authorization)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(ObjectState {
                exists: true,
                size: content_length(&response),
            }),
            404 => Ok(ObjectState {
                exists: false,
                size: 0,
            }),
            other => Err(StoreError::UnexpectedStatus(other)),
        }
    }
}

fn content_length(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
