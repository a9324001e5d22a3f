//! Static pointer resolution.
//!
//! A static id is a stable name resolving to a content address that
//! changes over time. Resolution races a network lookup against the
//! local append-only binding history; the local history is the fallback
//! of record and every call settles exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::database::RecordStore;
use crate::domain::StaticBinding;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::store::{ObjectId, PointerStore};

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const SLOW_RESOLUTION_AFTER: Duration = Duration::from_secs(5);

pub struct StaticResolver {
    database: Arc<dyn RecordStore>,
    pointers: Arc<dyn PointerStore>,
    events: Arc<EventBus>,
    lookup_timeout: Duration,
}

impl StaticResolver {
    pub fn new(
        database: Arc<dyn RecordStore>,
        pointers: Arc<dyn PointerStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            database,
            pointers,
            events,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolves `static_id` to its current target.
    ///
    /// The network answer wins only when strictly newer than the local
    /// binding; on timeout the local value (or absence) stands; on
    /// lookup error the local value is returned when one exists. A late
    /// network answer after settlement is discarded.
    pub async fn resolve(&self, static_id: &str) -> Result<Option<ObjectId>> {
        let local = self.database.latest_binding(static_id).await?;

        let settled = Arc::new(AtomicBool::new(false));
        self.spawn_slow_watch(static_id, settled.clone());

        let lookup = self.pointers.resolve_pointer(static_id);
        let outcome = tokio::time::timeout(self.lookup_timeout, lookup).await;
        settled.store(true, Ordering::Relaxed);

        match outcome {
            Ok(Ok(answer)) => {
                if let Some(local) = &local {
                    if answer.created_at <= local.bound_at {
                        return Ok(Some(local.dynamic_id.clone()));
                    }
                }
                // Fresher network answer; remember it without blocking
                // the caller.
                let binding = StaticBinding {
                    static_id: static_id.to_string(),
                    dynamic_id: answer.value.clone(),
                    is_active: true,
                    bound_at: answer.created_at,
                };
                let database = self.database.clone();
                tokio::spawn(async move {
                    if let Err(err) = database.append_binding(binding).await {
                        warn!(error = %err, "failed to record network binding");
                    }
                });
                Ok(Some(answer.value))
            }
            Ok(Err(err)) => match local {
                Some(binding) => {
                    debug!(static_id, error = %err, "lookup failed, using local binding");
                    Ok(Some(binding.dynamic_id))
                }
                None => Err(err),
            },
            Err(_) => {
                debug!(static_id, "lookup timed out, using local history");
                Ok(local.map(|b| b.dynamic_id))
            }
        }
    }

    /// Binds `static_id` to `dynamic_id`.
    ///
    /// Network publish is best-effort; the bind succeeds once the local
    /// history append does, so a partition only delays replication.
    pub async fn bind(&self, dynamic_id: &ObjectId, static_id: &str) -> Result<StaticBinding> {
        if let Err(err) = self.pointers.publish_pointer(dynamic_id, static_id).await {
            warn!(static_id, error = %err, "pointer publish failed, keeping local binding");
        }

        let binding = StaticBinding::active(static_id, dynamic_id.clone());
        self.database.append_binding(binding.clone()).await?;
        self.events.emit(Event::PointerBound {
            static_id: static_id.to_string(),
            dynamic_id: dynamic_id.clone(),
        });
        Ok(binding)
    }

    /// Purely diagnostic. Logs when a resolution is still outstanding
    /// after the slow threshold; never affects the result.
    fn spawn_slow_watch(&self, static_id: &str, settled: Arc<AtomicBool>) {
        let static_id = static_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(SLOW_RESOLUTION_AFTER).await;
            if !settled.load(Ordering::Relaxed) {
                warn!(static_id = %static_id, "static id resolution is slow");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn resolver(store: Arc<MemoryStore>, database: Arc<MemoryDatabase>) -> StaticResolver {
        StaticResolver::new(database, store, Arc::new(EventBus::default()))
            .with_lookup_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn newer_network_answer_wins_and_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store.clone(), database.clone());

        let old = ObjectId::from_content(b"old");
        let new = ObjectId::from_content(b"new");
        database
            .append_binding(StaticBinding {
                static_id: "site".to_string(),
                dynamic_id: old,
                is_active: true,
                bound_at: Utc::now() - ChronoDuration::hours(1),
            })
            .await
            .unwrap();
        store.set_pointer("site", new.clone(), Utc::now()).await;

        let resolved = resolver.resolve("site").await.unwrap();
        assert_eq!(resolved, Some(new.clone()));

        // The fresher answer lands in the local history.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let latest = database.latest_binding("site").await.unwrap().unwrap();
        assert_eq!(latest.dynamic_id, new);
    }

    #[tokio::test]
    async fn stale_network_answer_defers_to_local() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store.clone(), database.clone());

        let local = ObjectId::from_content(b"local");
        database
            .append_binding(StaticBinding::active("site", local.clone()))
            .await
            .unwrap();
        store
            .set_pointer(
                "site",
                ObjectId::from_content(b"stale"),
                Utc::now() - ChronoDuration::hours(2),
            )
            .await;

        let resolved = resolver.resolve("site").await.unwrap();
        assert_eq!(resolved, Some(local));
    }

    #[tokio::test]
    async fn timeout_falls_back_to_local_or_absent() {
        let store = Arc::new(MemoryStore::new().with_pointer_delay(Duration::from_secs(60)));
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store, database.clone());

        assert_eq!(resolver.resolve("missing").await.unwrap(), None);

        let local = ObjectId::from_content(b"cached");
        database
            .append_binding(StaticBinding::active("cached", local.clone()))
            .await
            .unwrap();
        assert_eq!(resolver.resolve("cached").await.unwrap(), Some(local));
    }

    #[tokio::test]
    async fn lookup_error_propagates_only_without_local_history() {
        let store = Arc::new(MemoryStore::new().with_pointer_failure());
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store, database.clone());

        assert!(resolver.resolve("nowhere").await.is_err());

        let local = ObjectId::from_content(b"fallback");
        database
            .append_binding(StaticBinding::active("known", local.clone()))
            .await
            .unwrap();
        assert_eq!(resolver.resolve("known").await.unwrap(), Some(local));
    }

    #[tokio::test]
    async fn rebinding_supersedes_the_previous_target() {
        let store = Arc::new(MemoryStore::new());
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store.clone(), database.clone());

        let first = ObjectId::from_content(b"v1");
        let second = ObjectId::from_content(b"v2");
        resolver.bind(&first, "blog").await.unwrap();
        resolver.bind(&second, "blog").await.unwrap();

        let resolved = resolver.resolve("blog").await.unwrap();
        assert_eq!(resolved, Some(second));
    }

    #[tokio::test]
    async fn bind_survives_publish_failure() {
        let store = Arc::new(MemoryStore::new().with_pointer_failure());
        let database = Arc::new(MemoryDatabase::new());
        let resolver = resolver(store, database.clone());

        let target = ObjectId::from_content(b"draft");
        resolver.bind(&target, "draft").await.unwrap();
        let latest = database.latest_binding("draft").await.unwrap().unwrap();
        assert_eq!(latest.dynamic_id, target);
    }
}
