//! In-memory record store used by tests and lightweight embedders.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RecordStore;
use crate::domain::{
    ContentActionName, ContentRecord, Group, LimitName, StaticBinding, UserContentAction,
    UserLimit,
};
use crate::error::{Error, Result};
use crate::store::ObjectId;

#[derive(Default)]
struct Inner {
    contents: Vec<ContentRecord>,
    limits: HashMap<(Uuid, LimitName), UserLimit>,
    actions: Vec<UserContentAction>,
    bindings: Vec<StaticBinding>,
    groups: HashMap<Uuid, Group>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content rows, exposed for dedup assertions in tests.
    pub async fn content_count(&self) -> usize {
        self.inner.read().await.contents.len()
    }

    /// Full history log for a static id, oldest first.
    pub async fn binding_history(&self, static_id: &str) -> Vec<StaticBinding> {
        self.inner
            .read()
            .await
            .bindings
            .iter()
            .filter(|b| b.static_id == static_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryDatabase {
    async fn insert_content(&self, record: ContentRecord) -> Result<ContentRecord> {
        let mut inner = self.inner.write().await;
        if inner
            .contents
            .iter()
            .any(|c| c.storage_id == record.storage_id && c.user_id == record.user_id)
        {
            return Err(Error::Database(format!(
                "duplicate content row for ({}, {})",
                record.storage_id, record.user_id
            )));
        }
        inner.contents.push(record.clone());
        Ok(record)
    }

    async fn update_content(&self, record: &ContentRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.contents.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("content {}", record.id))),
        }
    }

    async fn content_by_id(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .contents
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn content_by_storage_and_user(
        &self,
        storage_id: &ObjectId,
        user_id: Uuid,
    ) -> Result<Option<ContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .contents
            .iter()
            .find(|c| &c.storage_id == storage_id && c.user_id == user_id)
            .cloned())
    }

    async fn content_by_storage_id(
        &self,
        storage_id: &ObjectId,
    ) -> Result<Option<ContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .contents
            .iter()
            .find(|c| &c.storage_id == storage_id)
            .cloned())
    }

    async fn content_by_manifest_id(
        &self,
        manifest_id: &ObjectId,
    ) -> Result<Option<ContentRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .contents
            .iter()
            .find(|c| c.manifest_storage_id.as_ref() == Some(manifest_id))
            .cloned())
    }

    async fn user_limit(&self, user_id: Uuid, name: LimitName) -> Result<Option<UserLimit>> {
        Ok(self.inner.read().await.limits.get(&(user_id, name)).cloned())
    }

    async fn set_user_limit(&self, limit: UserLimit) -> Result<()> {
        self.inner
            .write()
            .await
            .limits
            .insert((limit.user_id, limit.name), limit);
        Ok(())
    }

    async fn add_action(&self, action: UserContentAction) -> Result<()> {
        self.inner.write().await.actions.push(action);
        Ok(())
    }

    async fn actions_size_sum(
        &self,
        user_id: Uuid,
        name: ContentActionName,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .await
            .actions
            .iter()
            .filter(|a| a.user_id == user_id && a.name == name && a.created_at >= since)
            .map(|a| a.size)
            .sum())
    }

    async fn append_binding(&self, binding: StaticBinding) -> Result<()> {
        let mut inner = self.inner.write().await;
        // Identical re-append is an idempotent success.
        if !inner.bindings.iter().any(|b| *b == binding) {
            inner.bindings.push(binding);
        }
        Ok(())
    }

    async fn latest_binding(&self, static_id: &str) -> Result<Option<StaticBinding>> {
        Ok(self
            .inner
            .read()
            .await
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.static_id == static_id && b.is_active)
            .max_by_key(|(idx, b)| (b.bound_at, *idx))
            .map(|(_, b)| b.clone()))
    }

    async fn group(&self, id: Uuid) -> Result<Option<Group>> {
        Ok(self.inner.read().await.groups.get(&id).cloned())
    }

    async fn put_group(&self, group: Group) -> Result<()> {
        self.inner.write().await.groups.insert(group.id, group);
        Ok(())
    }
}
