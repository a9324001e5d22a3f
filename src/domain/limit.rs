//! Per-user quota definitions and the accounting ledger they aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named quota kinds. Only content size is enforced today.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LimitName {
    SaveContentSize,
}

/// A quota definition. Remaining budget is
/// `value - sum(accounted usage since period_start)` and may go negative
/// when usage was recorded before the limit tightened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLimit {
    pub user_id: Uuid,
    pub name: LimitName,
    pub value: u64,
    pub period_start: DateTime<Utc>,
    pub is_active: bool,
}

/// Accounted content actions. Upload and pin both count against the
/// content-size budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentActionName {
    Upload,
    Pin,
}

/// One ledger row per accounted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContentAction {
    pub user_id: Uuid,
    pub name: ContentActionName,
    pub size: u64,
    pub content_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
