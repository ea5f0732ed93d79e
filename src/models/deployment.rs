//! Deployment manifest and the request/response bodies of the worker API.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The `_manifest.json` object written once per deployment.
///
/// Doubles as the project's listing index: enumerating a project means
/// listing these objects, there is no secondary index.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    pub project_id: String,
    pub deployment_id: String,
    /// Relative paths stored for this deployment, manifest excluded.
    pub files: Vec<String>,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
}

impl DeploymentManifest {
    pub fn new(
        project_id: impl Into<String>,
        deployment_id: impl Into<String>,
        files: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let file_count = files.len();
        Self {
            project_id: project_id.into(),
            deployment_id: deployment_id.into(),
            files,
            created_at,
            file_count,
        }
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

/// How a file's `content` string is encoded in an upload body.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    Base64,
}

/// One entry of the upload `files` map.
///
/// Plain strings are stored as UTF-8; the object form lets binary assets
/// travel through the JSON body as base64.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    Text(String),
    Encoded {
        content: String,
        #[serde(default)]
        encoding: FileEncoding,
    },
}

impl FileContent {
    /// Wrap raw bytes, keeping valid UTF-8 readable on the wire.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => FileContent::Text(text),
            Err(err) => FileContent::Encoded {
                content: general_purpose::STANDARD.encode(err.as_bytes()),
                encoding: FileEncoding::Base64,
            },
        }
    }

    /// Decode into the bytes that get stored.
    pub fn into_bytes(self) -> Result<Bytes, String> {
        match self {
            FileContent::Text(text)
            | FileContent::Encoded {
                content: text,
                encoding: FileEncoding::Utf8,
            } => Ok(Bytes::from(text)),
            FileContent::Encoded {
                content,
                encoding: FileEncoding::Base64,
            } => general_purpose::STANDARD
                .decode(content.as_bytes())
                .map(Bytes::from)
                .map_err(|err| format!("invalid base64 content: {err}")),
        }
    }
}

/// Body of `POST /upload`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(default)]
    pub files: BTreeMap<String, FileContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

/// Response of `POST /upload` (200 on full success, 207 otherwise).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub project_id: String,
    pub deployment_id: String,
    pub url: String,
    pub uploaded_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Body of `POST /delete`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub success: bool,
    pub deleted_count: usize,
    pub project_id: String,
    pub deployment_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed_count: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Body of `POST /cleanup`.
///
/// `retentionCount` stays loosely typed so that non-numeric values fall
/// back to the configured default instead of failing the request.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_count: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub success: bool,
    pub project_id: String,
    pub deleted_deployments: Vec<String>,
    pub deleted_file_count: usize,
}

/// Response of `GET /deployments/{projectId}`, newest first.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentList {
    pub project_id: String,
    pub deployments: Vec<DeploymentManifest>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn manifest_uses_camel_case_and_millisecond_timestamps() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let manifest = DeploymentManifest::new(
            "blog",
            "deploy-1-abc123",
            vec!["index.html".into(), "app.js".into()],
            created,
        );
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            value,
            json!({
                "projectId": "blog",
                "deploymentId": "deploy-1-abc123",
                "files": ["index.html", "app.js"],
                "createdAt": "2026-03-01T12:30:00.000Z",
                "fileCount": 2
            })
        );

        let back: DeploymentManifest = serde_json::from_value(value).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn file_content_accepts_plain_and_encoded_forms() {
        let req: UploadRequest = serde_json::from_value(json!({
            "projectId": "p",
            "files": {
                "index.html": "<h1>hi</h1>",
                "logo.png": { "content": "iVBORw==", "encoding": "base64" },
                "notes.txt": { "content": "plain" }
            }
        }))
        .unwrap();

        assert_eq!(req.files.len(), 3);
        assert_eq!(
            req.files["index.html"].clone().into_bytes().unwrap(),
            Bytes::from_static(b"<h1>hi</h1>")
        );
        assert_eq!(
            req.files["logo.png"].clone().into_bytes().unwrap(),
            Bytes::from_static(&[0x89, b'P', b'N', b'G'])
        );
        assert_eq!(
            req.files["notes.txt"].clone().into_bytes().unwrap(),
            Bytes::from_static(b"plain")
        );
    }

    #[test]
    fn invalid_base64_is_reported() {
        let content = FileContent::Encoded {
            content: "***".into(),
            encoding: FileEncoding::Base64,
        };
        let err = content.into_bytes().unwrap_err();
        assert!(err.starts_with("invalid base64 content"));
    }

    #[test]
    fn from_bytes_keeps_text_readable() {
        assert_eq!(
            FileContent::from_bytes(b"hello".to_vec()),
            FileContent::Text("hello".into())
        );
        let binary = FileContent::from_bytes(vec![0xff, 0x00, 0x10]);
        assert!(matches!(
            binary,
            FileContent::Encoded {
                encoding: FileEncoding::Base64,
                ..
            }
        ));
        assert_eq!(binary.into_bytes().unwrap().as_ref(), &[0xff, 0x00, 0x10]);
    }

    #[test]
    fn upload_result_omits_empty_errors() {
        let result = UploadResult {
            success: true,
            project_id: "p".into(),
            deployment_id: "deploy-1-a".into(),
            url: "http://x/sites/p/deploy-1-a/index.html".into(),
            uploaded_files: vec!["index.html".into()],
            errors: vec![],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("errors").is_none());
        assert_eq!(value["uploadedFiles"], json!(["index.html"]));
    }
}
