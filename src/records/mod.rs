//! Content record management.
//!
//! Wraps record creation with the side effects the upstream surface
//! guarantees: per-user dedup, group visibility inheritance, accounting,
//! manifest generation and cataloging, plus lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::database::RecordStore;
use crate::domain::{
    ContentActionName, ContentRecord, ContentView, NewContent, UserContentAction,
};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::manifest::{self, ContentManifest};
use crate::store::{ObjectId, ObjectStore};

/// Authorization seam consulted before cataloging content for a user.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn can_catalog(&self, user_id: Uuid) -> bool;
}

/// Default gate: every user may catalog.
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn can_catalog(&self, _user_id: Uuid) -> bool {
        true
    }
}

/// Optional per-user catalog of saved content.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    async fn add_content(&self, record: &ContentRecord) -> Result<()>;
}

pub struct NoCatalog;

#[async_trait]
impl FileCatalog for NoCatalog {
    async fn add_content(&self, _record: &ContentRecord) -> Result<()> {
        Ok(())
    }
}

/// Ownership parameters accompanying a record creation.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    pub user_id: Uuid,
    pub group_id: Option<Uuid>,
    pub view: Option<ContentView>,
    pub is_public: bool,
}

impl OwnerContext {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            group_id: None,
            view: None,
            is_public: false,
        }
    }
}

pub struct ContentManager {
    store: Arc<dyn ObjectStore>,
    database: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    permissions: Arc<dyn PermissionGate>,
    catalog: Arc<dyn FileCatalog>,
}

impl ContentManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        database: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
        permissions: Arc<dyn PermissionGate>,
        catalog: Arc<dyn FileCatalog>,
    ) -> Self {
        Self {
            store,
            database,
            events,
            permissions,
            catalog,
        }
    }

    /// Creates a record for `new` owned by `owner`, or resolves to the
    /// user's existing record for the same object. Existing records only
    /// absorb a changed view; every other field stays immutable.
    pub async fn add_content(&self, new: NewContent, owner: OwnerContext) -> Result<ContentRecord> {
        if let Some(existing) = self
            .database
            .content_by_storage_and_user(&new.storage_id, owner.user_id)
            .await?
        {
            return self.merge_existing(existing, &new, &owner).await;
        }

        let mut record = self.build_record(new, &owner).await?;
        if record.size == 0 {
            record.size = self.store.stat(&record.storage_id).await?.size;
        }
        let record = self.database.insert_content(record).await?;

        self.run_side_effects(&record).await?;
        self.events.emit(Event::ContentAdded {
            content_id: record.id,
            storage_id: record.storage_id.clone(),
            user_id: record.user_id,
            update: false,
        });
        // Side effects may have attached the manifest address.
        self.database
            .content_by_id(record.id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(record.id.to_string()))
    }

    /// Adopts content published by another node, known by its manifest
    /// address. The manifest is fetched and rehydrated into a local
    /// record flagged remote; accounting charges a pin rather than an
    /// upload. Dedup is by manifest id first, then by the usual
    /// `(storage_id, user_id)` pair.
    pub async fn adopt_remote(
        &self,
        manifest_id: ObjectId,
        owner: OwnerContext,
    ) -> Result<ContentRecord> {
        if let Some(existing) = self.database.content_by_manifest_id(&manifest_id).await? {
            return Ok(existing);
        }

        let bytes = self.store.get(&manifest_id).await?;
        let manifest: ContentManifest = serde_json::from_slice(&bytes)?;

        if let Some(existing) = self
            .database
            .content_by_storage_and_user(&manifest.storage_id, owner.user_id)
            .await?
        {
            return Ok(existing);
        }

        let mut new = NewContent::new(manifest.storage_id.clone(), manifest.mime_type.clone());
        new.is_remote = true;
        new.extension = manifest.extension.clone();
        new.name = manifest.name.clone();
        new.view = manifest.view;
        new.size = manifest.size;
        let to_ref = |v: &Option<crate::manifest::PreviewVariant>| {
            v.as_ref().map(|v| crate::domain::PreviewRef {
                storage_id: v.storage_id.clone(),
                size: v.size,
            })
        };
        new.small_preview = to_ref(&manifest.preview.small);
        new.medium_preview = to_ref(&manifest.preview.medium);
        new.large_preview = to_ref(&manifest.preview.large);
        new.preview_mime_type = manifest.preview.mime_type.clone();
        new.preview_extension = manifest.preview.extension.clone();
        new.properties = manifest.properties.clone();

        let mut record = self.build_record(new, &owner).await?;
        record.manifest_storage_id = Some(manifest_id);
        if record.size == 0 {
            record.size = self.store.stat(&record.storage_id).await?.size;
        }
        let record = self.database.insert_content(record).await?;

        if let Err(err) = self
            .database
            .add_action(UserContentAction {
                user_id: record.user_id,
                name: ContentActionName::Pin,
                size: record.size,
                content_id: Some(record.id),
                created_at: Utc::now(),
            })
            .await
        {
            warn!(error = %err, "pin accounting failed");
        }
        self.events.emit(Event::ContentAdded {
            content_id: record.id,
            storage_id: record.storage_id.clone(),
            user_id: record.user_id,
            update: false,
        });
        Ok(record)
    }

    async fn build_record(&self, new: NewContent, owner: &OwnerContext) -> Result<ContentRecord> {
        // Group membership overrides the caller's visibility flag.
        let is_public = match owner.group_id {
            Some(group_id) => self
                .database
                .group(group_id)
                .await?
                .map(|g| g.is_public)
                .unwrap_or(owner.is_public),
            None => owner.is_public,
        };

        Ok(ContentRecord {
            id: Uuid::new_v4(),
            storage_id: new.storage_id,
            manifest_storage_id: None,
            manifest_static_storage_id: None,
            user_id: owner.user_id,
            group_id: owner.group_id,
            mime_type: new.mime_type,
            extension: new.extension,
            name: new.name,
            view: owner.view.unwrap_or(new.view),
            size: new.size,
            small_preview: new.small_preview,
            medium_preview: new.medium_preview,
            large_preview: new.large_preview,
            preview_mime_type: new.preview_mime_type,
            preview_extension: new.preview_extension,
            properties: new.properties,
            is_public,
            is_remote: new.is_remote,
            created_at: Utc::now(),
        })
    }

    /// Post-insert side effects run concurrently. Catalog and
    /// accounting are best-effort; a record without its manifest is not
    /// addressable, so a manifest failure fails the creation.
    async fn run_side_effects(&self, record: &ContentRecord) -> Result<ObjectId> {
        let catalog = async {
            if self.permissions.can_catalog(record.user_id).await {
                if let Err(err) = self.catalog.add_content(record).await {
                    warn!(error = %err, content = %record.id, "catalog update failed");
                }
            }
        };

        let accounting = async {
            let action = UserContentAction {
                user_id: record.user_id,
                name: ContentActionName::Upload,
                size: record.size,
                content_id: Some(record.id),
                created_at: Utc::now(),
            };
            if let Err(err) = self.database.add_action(action).await {
                warn!(error = %err, content = %record.id, "upload accounting failed");
            }
        };

        let (_, _, manifest_id) = tokio::join!(catalog, accounting, self.refresh_manifest(record));
        manifest_id
    }

    /// Stores the record's manifest and persists the manifest address.
    pub async fn refresh_manifest(&self, record: &ContentRecord) -> Result<ObjectId> {
        let manifest = ContentManifest::from(record);
        let manifest_id = manifest::store_manifest(self.store.as_ref(), &manifest).await?;
        let mut updated = record.clone();
        updated.manifest_storage_id = Some(manifest_id.clone());
        self.database.update_content(&updated).await?;
        Ok(manifest_id)
    }

    async fn merge_existing(
        &self,
        mut existing: ContentRecord,
        new: &NewContent,
        owner: &OwnerContext,
    ) -> Result<ContentRecord> {
        let mut changed = false;

        if let Some(view) = owner.view {
            if existing.view != view {
                existing.view = view;
                changed = true;
            }
        }

        // A record saved before preview support (or whose derivation
        // failed) absorbs freshly computed previews.
        let has_previews = existing.small_preview.is_some()
            || existing.medium_preview.is_some()
            || existing.large_preview.is_some();
        let incoming_previews = new.small_preview.is_some()
            || new.medium_preview.is_some()
            || new.large_preview.is_some();
        if !has_previews && incoming_previews {
            existing.small_preview = new.small_preview.clone();
            existing.medium_preview = new.medium_preview.clone();
            existing.large_preview = new.large_preview.clone();
            existing.preview_mime_type = new.preview_mime_type.clone();
            existing.preview_extension = new.preview_extension.clone();
            changed = true;
        }

        if !changed {
            return Ok(existing);
        }

        self.database.update_content(&existing).await?;
        self.refresh_manifest(&existing).await?;
        self.events.emit(Event::ContentAdded {
            content_id: existing.id,
            storage_id: existing.storage_id.clone(),
            user_id: existing.user_id,
            update: true,
        });
        self.database
            .content_by_id(existing.id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(existing.id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::domain::Group;
    use crate::ingest::single_chunk;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn manager(
        store: Arc<MemoryStore>,
        database: Arc<MemoryDatabase>,
    ) -> ContentManager {
        ContentManager::new(
            store,
            database,
            Arc::new(EventBus::default()),
            Arc::new(AllowAll),
            Arc::new(NoCatalog),
        )
    }

    #[tokio::test]
    async fn same_user_same_object_resolves_to_one_record() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let manager = manager(store.clone(), database.clone());
        let user = Uuid::new_v4();

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        let first = manager
            .add_content(
                NewContent::new(object.id.clone(), "text/plain"),
                OwnerContext::user(user),
            )
            .await
            .unwrap();
        let second = manager
            .add_content(
                NewContent::new(object.id.clone(), "text/plain"),
                OwnerContext::user(user),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(database.content_count().await, 1);
    }

    #[tokio::test]
    async fn manifest_store_failure_fails_content_creation() {
        use crate::store::{ByteStream, ObjectStat, PointerRecord, PointerStore, StoredObject};
        use std::path::Path;

        // Accepts content but rejects the small JSON writes the
        // manifest path relies on.
        struct ManifestlessStore {
            inner: MemoryStore,
        }

        #[async_trait]
        impl PointerStore for ManifestlessStore {
            async fn publish_pointer(&self, id: &ObjectId, key: &str) -> Result<String> {
                self.inner.publish_pointer(id, key).await
            }

            async fn resolve_pointer(&self, name: &str) -> Result<PointerRecord> {
                self.inner.resolve_pointer(name).await
            }
        }

        #[async_trait]
        impl ObjectStore for ManifestlessStore {
            async fn put_stream(&self, stream: ByteStream) -> Result<StoredObject> {
                self.inner.put_stream(stream).await
            }

            async fn put_bytes(&self, _bytes: Bytes) -> Result<StoredObject> {
                Err(crate::Error::Store("backend rejected write".to_string()))
            }

            async fn put_file(&self, path: &Path) -> Result<StoredObject> {
                self.inner.put_file(path).await
            }

            async fn put_directory(&self, path: &Path) -> Result<StoredObject> {
                self.inner.put_directory(path).await
            }

            async fn get(&self, id: &ObjectId) -> Result<Bytes> {
                self.inner.get(id).await
            }

            async fn get_stream(&self, id: &ObjectId) -> Result<ByteStream> {
                self.inner.get_stream(id).await
            }

            async fn stat(&self, id: &ObjectId) -> Result<ObjectStat> {
                self.inner.stat(id).await
            }
        }

        let store = Arc::new(ManifestlessStore {
            inner: MemoryStore::new(),
        });
        let database = Arc::new(MemoryDatabase::new());
        let manager = ContentManager::new(
            store.clone(),
            database.clone(),
            Arc::new(EventBus::default()),
            Arc::new(AllowAll),
            Arc::new(NoCatalog),
        );

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"payload")))
            .await
            .unwrap();
        let err = manager
            .add_content(
                NewContent::new(object.id, "text/plain"),
                OwnerContext::user(Uuid::new_v4()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, crate::Error::Store(_)));
        // The inserted row stays; a retry dedups onto it and republishes.
        assert_eq!(database.content_count().await, 1);
    }

    #[tokio::test]
    async fn group_visibility_overrides_caller_flag() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let manager = manager(store.clone(), database.clone());

        let group = Group {
            id: Uuid::new_v4(),
            title: Some("public feed".to_string()),
            is_public: true,
        };
        database.put_group(group.clone()).await.unwrap();

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"post")))
            .await
            .unwrap();
        let mut owner = OwnerContext::user(Uuid::new_v4());
        owner.group_id = Some(group.id);
        let record = manager
            .add_content(NewContent::new(object.id, "text/plain"), owner)
            .await
            .unwrap();
        assert!(record.is_public);
    }

    #[tokio::test]
    async fn size_backfills_from_store_and_charges_upload() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let manager = manager(store.clone(), database.clone());
        let user = Uuid::new_v4();

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"12345678")))
            .await
            .unwrap();
        let record = manager
            .add_content(
                NewContent::new(object.id, "application/octet-stream"),
                OwnerContext::user(user),
            )
            .await
            .unwrap();
        assert_eq!(record.size, 8);

        let charged = database
            .actions_size_sum(user, ContentActionName::Upload, record.created_at - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(charged, 8);
    }

    #[tokio::test]
    async fn remote_manifest_rehydrates_into_a_pinned_record() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let manager = manager(store.clone(), database.clone());
        let user = Uuid::new_v4();

        // Another node stored the object and published its manifest.
        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"remote bytes")))
            .await
            .unwrap();
        let manifest = crate::manifest::ContentManifest {
            name: Some("remote.txt".to_string()),
            mime_type: "text/plain".to_string(),
            extension: Some("txt".to_string()),
            view: ContentView::Contents,
            size: object.size,
            storage_id: object.id.clone(),
            preview: Default::default(),
            properties: None,
            created_at: chrono::Utc::now(),
        };
        let manifest_id = crate::manifest::store_manifest(store.as_ref(), &manifest)
            .await
            .unwrap();

        let record = manager
            .adopt_remote(manifest_id.clone(), OwnerContext::user(user))
            .await
            .unwrap();
        assert!(record.is_remote);
        assert_eq!(record.storage_id, object.id);
        assert_eq!(record.manifest_storage_id, Some(manifest_id.clone()));
        assert_eq!(record.name.as_deref(), Some("remote.txt"));

        // Adoption charges a pin, and re-adoption dedups by manifest id.
        let pinned = database
            .actions_size_sum(
                user,
                ContentActionName::Pin,
                record.created_at - chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(pinned, object.size);

        let again = manager
            .adopt_remote(manifest_id, OwnerContext::user(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(again.id, record.id);
    }

    #[tokio::test]
    async fn view_change_updates_record_and_manifest() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let manager = manager(store.clone(), database.clone());
        let user = Uuid::new_v4();

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"doc")))
            .await
            .unwrap();
        manager
            .add_content(
                NewContent::new(object.id.clone(), "text/plain"),
                OwnerContext::user(user),
            )
            .await
            .unwrap();

        let mut owner = OwnerContext::user(user);
        owner.view = Some(ContentView::Media);
        let updated = manager
            .add_content(NewContent::new(object.id, "text/plain"), owner)
            .await
            .unwrap();
        assert_eq!(updated.view, ContentView::Media);
        assert!(updated.manifest_storage_id.is_some());
    }
}
