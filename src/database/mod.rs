//! Relational store boundary.
//!
//! The core consumes content/limit/history records through CRUD-style
//! calls; persistence itself is an external collaborator. An in-memory
//! implementation ships for tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ContentActionName, ContentRecord, Group, LimitName, StaticBinding, UserContentAction,
    UserLimit,
};
use crate::error::Result;
use crate::store::ObjectId;

pub use memory::MemoryDatabase;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_content(&self, record: ContentRecord) -> Result<ContentRecord>;

    async fn update_content(&self, record: &ContentRecord) -> Result<()>;

    async fn content_by_id(&self, id: Uuid) -> Result<Option<ContentRecord>>;

    /// Dedup lookup backing the one-record-per-(storage, user) invariant.
    async fn content_by_storage_and_user(
        &self,
        storage_id: &ObjectId,
        user_id: Uuid,
    ) -> Result<Option<ContentRecord>>;

    async fn content_by_storage_id(&self, storage_id: &ObjectId)
        -> Result<Option<ContentRecord>>;

    async fn content_by_manifest_id(
        &self,
        manifest_id: &ObjectId,
    ) -> Result<Option<ContentRecord>>;

    async fn user_limit(&self, user_id: Uuid, name: LimitName) -> Result<Option<UserLimit>>;

    async fn set_user_limit(&self, limit: UserLimit) -> Result<()>;

    /// Appends an accounting ledger row.
    async fn add_action(&self, action: UserContentAction) -> Result<()>;

    /// Aggregate usage scoped by action kind and time window.
    async fn actions_size_sum(
        &self,
        user_id: Uuid,
        name: ContentActionName,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Appends to the static-id history log. A write that duplicates an
    /// existing identical entry is success, not an error.
    async fn append_binding(&self, binding: StaticBinding) -> Result<()>;

    /// Latest active history item for a static id, if any.
    async fn latest_binding(&self, static_id: &str) -> Result<Option<StaticBinding>>;

    async fn group(&self, id: Uuid) -> Result<Option<Group>>;

    async fn put_group(&self, group: Group) -> Result<()>;
}
