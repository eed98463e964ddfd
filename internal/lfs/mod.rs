use crate::s3::ObjectState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CONTENT_TYPE_LFS: &str = "application/vnd.git-lfs+json";

/// Client-declared object: a content hash plus its byte size. The oid is
/// opaque here; format validation, if any, happens upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectSpec {
    pub oid: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Upload,
}

impl Operation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "download" => Some(Operation::Download),
            "upload" => Some(Operation::Upload),
            _ => None,
        }
    }
}

/// Outcome of comparing a declared object against the store's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    DownloadReady,
    UploadRequired,
}

/// The one transition of the per-object state machine: present with the
/// declared size means the object is confirmed good; anything else means
/// the client has to (re)upload.
pub fn decide(declared: &ObjectSpec, stored: &ObjectState) -> UploadOutcome {
    if stored.exists && stored.size == declared.size {
        UploadOutcome::DownloadReady
    } else {
        UploadOutcome::UploadRequired
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl Action {
    pub fn new(href: String, expires_in: i64) -> Self {
        Self {
            href,
            header: None,
            expires_in: Some(expires_in),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.header
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

/// Per-object batch entry: carries either `actions` or `error`, never both.
/// Batch responses are always HTTP 200; per-item failures live here.
#[derive(Debug, Clone, Serialize)]
pub struct BatchObject {
    pub oid: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeMap<&'static str, Action>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl BatchObject {
    pub fn with_actions(spec: &ObjectSpec, actions: BTreeMap<&'static str, Action>) -> Self {
        Self {
            oid: spec.oid.clone(),
            size: spec.size,
            actions: Some(actions),
            error: None,
        }
    }

    pub fn with_error(spec: &ObjectSpec, code: u16, message: &str) -> Self {
        Self {
            oid: spec.oid.clone(),
            size: spec.size,
            actions: None,
            error: Some(ObjectError {
                code,
                message: message.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub objects: Vec<BatchObject>,
}
