//! Static pointer binding and resolution through the facade

use std::sync::Arc;
use std::time::Duration;

use harbor_core::database::MemoryDatabase;
use harbor_core::store::{MemoryStore, ObjectId, ObjectStore};
use harbor_core::Harbor;
use serde::Serialize;
use uuid::Uuid;

fn harbor(store: Arc<MemoryStore>, database: Arc<MemoryDatabase>) -> Harbor {
    init_tracing();
    Harbor::builder(store, database)
        .lookup_timeout(Duration::from_millis(200))
        .build()
}

/// Honors `RUST_LOG` when a test run needs the pipeline's trace output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Serialize)]
struct ProfileManifest {
    name: String,
    user_id: Uuid,
}

#[tokio::test]
async fn published_entity_resolves_to_its_manifest() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store.clone(), database);

    let profile = ProfileManifest {
        name: "alice".to_string(),
        user_id: Uuid::new_v4(),
    };
    let (manifest_id, binding) = harbor.publish_entity(&profile, "user.alice").await.unwrap();
    assert_eq!(binding.dynamic_id, manifest_id);

    let resolved = harbor.resolve_static_id("user.alice").await.unwrap();
    assert_eq!(resolved, Some(manifest_id.clone()));

    // The manifest is an ordinary content-addressed object.
    assert!(store.get(&manifest_id).await.is_ok());
}

#[tokio::test]
async fn rebinding_never_resolves_to_a_superseded_target() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let v1 = ObjectId::from_content(b"version 1");
    let v2 = ObjectId::from_content(b"version 2");
    harbor.bind_to_static_id(&v1, "blog.root").await.unwrap();
    harbor.bind_to_static_id(&v2, "blog.root").await.unwrap();

    for _ in 0..5 {
        let resolved = harbor.resolve_static_id("blog.root").await.unwrap();
        assert_eq!(resolved, Some(v2.clone()));
    }
}

#[tokio::test]
async fn unbound_name_with_dead_network_resolves_to_absent() {
    let store = Arc::new(MemoryStore::new().with_pointer_delay(Duration::from_secs(60)));
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let resolved = harbor.resolve_static_id("never.bound").await.unwrap();
    assert_eq!(resolved, None);
}

#[tokio::test]
async fn local_history_answers_when_the_network_is_down() {
    let store = Arc::new(MemoryStore::new().with_pointer_failure());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let target = ObjectId::from_content(b"offline target");
    harbor.bind_to_static_id(&target, "site.root").await.unwrap();

    let resolved = harbor.resolve_static_id("site.root").await.unwrap();
    assert_eq!(resolved, Some(target));
}
