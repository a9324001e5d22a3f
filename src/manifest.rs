//! Content manifests.
//!
//! A manifest is a small JSON document describing a stored content
//! record. It is itself stored as a content-addressed object so other
//! nodes can fetch the description without the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ContentProperties, ContentRecord, ContentView};
use crate::error::Result;
use crate::store::{ObjectId, ObjectStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewVariant {
    pub storage_id: ObjectId,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestPreview {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small: Option<PreviewVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<PreviewVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large: Option<PreviewVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// Self-describing record for a stored content object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub view: ContentView,
    pub size: u64,
    pub storage_id: ObjectId,
    pub preview: ManifestPreview,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<ContentProperties>,
    pub created_at: DateTime<Utc>,
}

impl From<&ContentRecord> for ContentManifest {
    fn from(record: &ContentRecord) -> Self {
        let variant = |p: &Option<crate::domain::PreviewRef>| {
            p.as_ref().map(|p| PreviewVariant {
                storage_id: p.storage_id.clone(),
                size: p.size,
            })
        };
        Self {
            name: record.name.clone(),
            mime_type: record.mime_type.clone(),
            extension: record.extension.clone(),
            view: record.view,
            size: record.size,
            storage_id: record.storage_id.clone(),
            preview: ManifestPreview {
                small: variant(&record.small_preview),
                medium: variant(&record.medium_preview),
                large: variant(&record.large_preview),
                mime_type: record.preview_mime_type.clone(),
                extension: record.preview_extension.clone(),
            },
            properties: record.properties.clone(),
            created_at: record.created_at,
        }
    }
}

/// Serializes any manifest-like document and stores it as an object,
/// returning the object id.
pub async fn store_manifest<T: Serialize>(
    store: &dyn ObjectStore,
    manifest: &T,
) -> Result<ObjectId> {
    let bytes = serde_json::to_vec(manifest)?;
    let object = store.put_bytes(bytes.into()).await?;
    Ok(object.id)
}
