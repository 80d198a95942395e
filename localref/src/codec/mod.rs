//! Serialized form of a document or collection subtree.
//!
//! Nested entities are embedded as structured JSON values rather than
//! re-encoded strings. Maps are ordered by key so output is deterministic.
//! Unknown keys are rejected, so a document blob never decodes as a
//! collection blob or the other way round.

use crate::error::{LocalRefError, Result};
use crate::store::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A document's field payload.
pub type Fields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentBlob {
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub subcollections: BTreeMap<String, CollectionBlob>,
    /// Never written, only kept for its sub-collections. Restored without
    /// being announced to the parent collection.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
}

impl DocumentBlob {
    /// No fields and no stored documents anywhere below.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self
                .subcollections
                .values()
                .all(|collection| collection.documents.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionBlob {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentBlob>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Convert any serializable value into document fields.
pub fn to_fields<T: Serialize>(data: &T) -> Result<Fields> {
    match serde_json::to_value(data)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(LocalRefError::NotAnObject),
    }
}

pub fn encode_document(blob: &DocumentBlob) -> Result<String> {
    Ok(serde_json::to_string(blob)?)
}

pub fn encode_collection(blob: &CollectionBlob) -> Result<String> {
    Ok(serde_json::to_string(blob)?)
}

pub fn decode_document(raw: &str) -> Result<DocumentBlob> {
    Ok(serde_json::from_str(raw)?)
}

pub fn decode_collection(raw: &str) -> Result<CollectionBlob> {
    Ok(serde_json::from_str(raw)?)
}
