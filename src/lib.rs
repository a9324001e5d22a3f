//! Harbor Core
//!
//! Content-addressed ingestion with quota enforcement, derivative
//! preview generation, per-user content records, and a static-pointer
//! layer that keeps a stable name resolving to the latest content
//! address. Storage, relational persistence, and media backends are
//! collaborators behind traits; this crate is the coordination core
//! consumed by an outer transport layer.

pub mod database;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod events;
pub mod ingest;
pub mod manifest;
pub mod preview;
pub mod quota;
pub mod records;
pub mod resolver;
pub mod store;

pub use error::{Error, Result};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::database::RecordStore;
use crate::domain::{ContentRecord, ContentView, NewContent, StaticBinding, UserLimit};
use crate::drivers::DriverRegistry;
use crate::events::EventBus;
use crate::ingest::{IngestOptions, IngestPipeline, IngestSource, IngestedObject, ProgressFn};
use crate::preview::PreviewOrchestrator;
use crate::records::{AllowAll, ContentManager, FileCatalog, NoCatalog, OwnerContext, PermissionGate};
use crate::resolver::StaticResolver;
use crate::store::{ObjectId, ObjectStore, PointerStore};

/// Options accompanying a top-level save call.
#[derive(Default, Clone)]
pub struct SaveOptions {
    pub group_id: Option<Uuid>,
    pub view: Option<ContentView>,
    pub is_public: bool,
    pub file_name: Option<String>,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    /// Requested upload driver (e.g. "archive").
    pub driver: Option<String>,
    /// Original source reference, consulted for preview derivation.
    pub source: Option<String>,
    pub on_progress: Option<ProgressFn>,
}

/// Facade wiring the pipeline, orchestrator, record manager and
/// resolver over one store and one database.
pub struct Harbor {
    store: Arc<dyn ObjectStore>,
    database: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    ingest: IngestPipeline,
    previews: PreviewOrchestrator,
    records: ContentManager,
    resolver: StaticResolver,
}

pub struct HarborBuilder {
    store: Arc<dyn ObjectStore>,
    pointers: Arc<dyn PointerStore>,
    database: Arc<dyn RecordStore>,
    drivers: DriverRegistry,
    permissions: Arc<dyn PermissionGate>,
    catalog: Arc<dyn FileCatalog>,
    lookup_timeout: Option<Duration>,
}

impl HarborBuilder {
    pub fn drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionGate>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn FileCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Harbor {
        let drivers = Arc::new(self.drivers);
        let events = Arc::new(EventBus::default());

        let ingest = IngestPipeline::new(self.store.clone(), self.database.clone(), drivers.clone());
        let previews = PreviewOrchestrator::new(self.store.clone(), drivers);
        let records = ContentManager::new(
            self.store.clone(),
            self.database.clone(),
            events.clone(),
            self.permissions,
            self.catalog,
        );
        let mut resolver =
            StaticResolver::new(self.database.clone(), self.pointers, events.clone());
        if let Some(timeout) = self.lookup_timeout {
            resolver = resolver.with_lookup_timeout(timeout);
        }

        Harbor {
            store: self.store,
            database: self.database,
            events,
            ingest,
            previews,
            records,
            resolver,
        }
    }
}

impl Harbor {
    pub fn builder<S, D>(store: Arc<S>, database: Arc<D>) -> HarborBuilder
    where
        S: ObjectStore + 'static,
        D: RecordStore + 'static,
    {
        HarborBuilder {
            store: store.clone(),
            pointers: store,
            database,
            drivers: DriverRegistry::builtin(),
            permissions: Arc::new(AllowAll),
            catalog: Arc::new(NoCatalog),
            lookup_timeout: None,
        }
    }

    /// Ingests `source` for `user_id`, derives previews and creates (or
    /// resolves to) the user's content record.
    pub async fn save_data(
        &self,
        user_id: Uuid,
        source: IngestSource,
        options: SaveOptions,
    ) -> Result<ContentRecord> {
        let ingested = self
            .ingest
            .ingest(
                user_id,
                source,
                options.mime_type.as_deref(),
                IngestOptions {
                    file_name: options.file_name.clone(),
                    extension_hint: options.extension.clone(),
                    driver: options.driver.clone(),
                    on_progress: options.on_progress.clone(),
                },
            )
            .await?;
        self.finish_save(user_id, ingested, options).await
    }

    /// Fetches a URL (or scrapes it through a source-capable driver)
    /// and saves the result. The URL doubles as the preview source hint.
    pub async fn save_data_by_url(
        &self,
        user_id: Uuid,
        url: &str,
        mut options: SaveOptions,
    ) -> Result<ContentRecord> {
        if options.source.is_none() {
            options.source = Some(url.to_string());
        }
        self.save_data(user_id, IngestSource::Url(url.to_string()), options)
            .await
    }

    /// Stores a local directory tree as one directory object.
    pub async fn save_directory(
        &self,
        user_id: Uuid,
        path: &Path,
        options: SaveOptions,
    ) -> Result<ContentRecord> {
        self.save_data(user_id, IngestSource::Directory(path.to_path_buf()), options)
            .await
    }

    async fn finish_save(
        &self,
        user_id: Uuid,
        ingested: IngestedObject,
        options: SaveOptions,
    ) -> Result<ContentRecord> {
        let previews = self
            .previews
            .generate(
                &ingested.object,
                &ingested.mime_type,
                ingested.extension.as_deref(),
                options.source.as_deref(),
            )
            .await?;

        let mut new = NewContent::new(ingested.object.id.clone(), ingested.mime_type);
        new.extension = ingested.extension;
        new.name = options.file_name;
        new.size = ingested.object.size;
        new.small_preview = previews.small;
        new.medium_preview = previews.medium;
        new.large_preview = previews.large;
        new.preview_mime_type = previews.mime_type;
        new.preview_extension = previews.extension;
        new.properties = ingested.properties;

        let owner = OwnerContext {
            user_id,
            group_id: options.group_id,
            view: options.view,
            is_public: options.is_public,
        };
        self.records.add_content(new, owner).await
    }

    /// Adopts content published by another node, known by its manifest
    /// address.
    pub async fn adopt_remote_content(
        &self,
        user_id: Uuid,
        manifest_id: ObjectId,
    ) -> Result<ContentRecord> {
        self.records
            .adopt_remote(manifest_id, OwnerContext::user(user_id))
            .await
    }

    pub async fn resolve_static_id(&self, static_id: &str) -> Result<Option<ObjectId>> {
        self.resolver.resolve(static_id).await
    }

    pub async fn bind_to_static_id(
        &self,
        dynamic_id: &ObjectId,
        static_id: &str,
    ) -> Result<StaticBinding> {
        self.resolver.bind(dynamic_id, static_id).await
    }

    /// Stores `entity` as a manifest object and binds the static name
    /// to it, returning both addresses.
    pub async fn publish_entity<T: Serialize>(
        &self,
        entity: &T,
        static_id: &str,
    ) -> Result<(ObjectId, StaticBinding)> {
        let manifest_id = manifest::store_manifest(self.store.as_ref(), entity).await?;
        let binding = self.resolver.bind(&manifest_id, static_id).await?;
        Ok((manifest_id, binding))
    }

    pub async fn content(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        self.database.content_by_id(id).await
    }

    pub async fn set_user_limit(&self, limit: UserLimit) -> Result<()> {
        self.database.set_user_limit(limit).await
    }

    /// Remaining content-size budget, or `None` for unlimited users.
    pub async fn limit_remaining(&self, user_id: Uuid) -> Result<Option<i64>> {
        self.ingest.limit_remaining(user_id).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
