//! Represents an object (file) stored in the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Custom metadata key: when the object was written.
pub const META_UPLOADED_AT: &str = "uploadedAt";
/// Custom metadata key: owning project.
pub const META_PROJECT_ID: &str = "projectId";
/// Custom metadata key: owning deployment.
pub const META_DEPLOYMENT_ID: &str = "deploymentId";

/// Everything the store knows about a blob except its bytes.
///
/// The `ObjectMeta` struct is persisted next to the payload and returned by
/// listings, so callers can inspect objects without reading their content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Full object key (`{projectId}/{deploymentId}/{path}`).
    pub key: String,

    /// Content type (MIME type) recorded at write time.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// Timestamp when the object was written.
    pub uploaded_at: DateTime<Utc>,

    /// User-defined metadata (`uploadedAt`, `projectId`, `deploymentId`).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Options accepted by `ObjectStore::put`.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
