//! Data models shared by the worker and the publishing client.
//!
//! `object` describes what the object store records for every blob;
//! `deployment` holds the manifest plus the JSON bodies of the worker API.
//! Everything serializes as camelCase JSON via `serde`.

pub mod deployment;
pub mod object;
