//! Content records and their derived preview references.
//!
//! A `ContentRecord` exists per logical content item per owning user.
//! The record references immutable stored objects by content address and
//! is never destroyed by this core; deletion is an external concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::ObjectId;

/// How the content is intended to be rendered by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentView {
    Contents,
    Attachment,
    Media,
    Link,
}

impl Default for ContentView {
    fn default() -> Self {
        ContentView::Contents
    }
}

/// A derived preview artifact. Disposable and regenerable from the
/// source object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRef {
    pub storage_id: ObjectId,
    pub size: u64,
}

/// Typed media properties, serialized at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentProperties {
    Image {
        width: u32,
        height: u32,
    },
    Video {
        duration: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Generic(serde_json::Value),
}

/// One record per logical content item per owning user.
///
/// Uniqueness invariant: at most one record for a given
/// `(storage_id, user_id)` pair. Re-ingestion of identical bytes by the
/// same user resolves to the existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub storage_id: ObjectId,
    pub manifest_storage_id: Option<ObjectId>,
    pub manifest_static_storage_id: Option<String>,
    pub user_id: Uuid,
    pub group_id: Option<Uuid>,
    pub mime_type: String,
    pub extension: Option<String>,
    pub name: Option<String>,
    pub view: ContentView,
    pub size: u64,
    pub small_preview: Option<PreviewRef>,
    pub medium_preview: Option<PreviewRef>,
    pub large_preview: Option<PreviewRef>,
    pub preview_mime_type: Option<String>,
    pub preview_extension: Option<String>,
    pub properties: Option<ContentProperties>,
    pub is_public: bool,
    pub is_remote: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a content record, before dedup and side effects.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub storage_id: ObjectId,
    pub mime_type: String,
    pub extension: Option<String>,
    pub name: Option<String>,
    pub view: ContentView,
    pub size: u64,
    pub small_preview: Option<PreviewRef>,
    pub medium_preview: Option<PreviewRef>,
    pub large_preview: Option<PreviewRef>,
    pub preview_mime_type: Option<String>,
    pub preview_extension: Option<String>,
    pub properties: Option<ContentProperties>,
    pub is_remote: bool,
}

impl NewContent {
    pub fn new(storage_id: ObjectId, mime_type: impl Into<String>) -> Self {
        Self {
            storage_id,
            mime_type: mime_type.into(),
            extension: None,
            name: None,
            view: ContentView::default(),
            size: 0,
            small_preview: None,
            medium_preview: None,
            large_preview: None,
            preview_mime_type: None,
            preview_extension: None,
            properties: None,
            is_remote: false,
        }
    }
}

/// Minimal group surface consulted for visibility inheritance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub title: Option<String>,
    pub is_public: bool,
}
