//! Static pointer history items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::ObjectId;

/// One entry in the append-only static-id history log.
///
/// For a given `static_id` the item with the latest `bound_at` among
/// active items is authoritative unless a network lookup proves fresher.
/// Items are never mutated, only superseded by newer appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticBinding {
    pub static_id: String,
    pub dynamic_id: ObjectId,
    pub is_active: bool,
    pub bound_at: DateTime<Utc>,
}

impl StaticBinding {
    pub fn active(static_id: impl Into<String>, dynamic_id: ObjectId) -> Self {
        Self {
            static_id: static_id.into(),
            dynamic_id,
            is_active: true,
            bound_at: Utc::now(),
        }
    }
}
