//! Preview derivation behavior through the full save path

use std::sync::Arc;

use bytes::Bytes;
use harbor_core::database::MemoryDatabase;
use harbor_core::events::Event;
use harbor_core::ingest::IngestSource;
use harbor_core::store::MemoryStore;
use harbor_core::{Harbor, SaveOptions};
use uuid::Uuid;

fn harbor(store: Arc<MemoryStore>, database: Arc<MemoryDatabase>) -> Harbor {
    init_tracing();
    Harbor::builder(store, database).build()
}

/// Honors `RUST_LOG` when a test run needs the pipeline's trace output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Bytes {
    let img = image::ImageBuffer::<image::Rgb<u8>, _>::from_fn(width, height, |x, y| {
        image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 64])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    Bytes::from(out.into_inner())
}

#[tokio::test]
async fn small_image_previews_reuse_the_source_object() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let record = harbor
        .save_data(
            Uuid::new_v4(),
            IngestSource::Bytes(encode(120, 90, image::ImageFormat::Png)),
            SaveOptions {
                mime_type: Some("image/png".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // 120x90 fits every size bound, so no derivative is written.
    for preview in [
        record.small_preview,
        record.medium_preview,
        record.large_preview,
    ] {
        assert_eq!(preview.unwrap().storage_id, record.storage_id);
    }
}

#[tokio::test]
async fn gif_previews_are_rasterized_to_png() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let record = harbor
        .save_data(
            Uuid::new_v4(),
            IngestSource::Bytes(encode(64, 64, image::ImageFormat::Gif)),
            SaveOptions {
                mime_type: Some("image/gif".to_string()),
                extension: Some("gif".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Even a tiny gif produces a distinct static image.
    let medium = record.medium_preview.unwrap();
    assert_ne!(medium.storage_id, record.storage_id);
    assert_eq!(record.preview_mime_type.as_deref(), Some("image/png"));
    assert_eq!(record.preview_extension.as_deref(), Some("png"));
}

#[tokio::test]
async fn unsupported_types_save_without_previews() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);

    let record = harbor
        .save_data(
            Uuid::new_v4(),
            IngestSource::Bytes(Bytes::from_static(b"%PDF-1.4 not really")),
            SaveOptions {
                mime_type: Some("application/pdf".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(record.small_preview.is_none());
    assert!(record.medium_preview.is_none());
    assert!(record.large_preview.is_none());
    assert!(record.manifest_storage_id.is_some());
}

#[tokio::test]
async fn save_emits_a_content_added_event() {
    let store = Arc::new(MemoryStore::new());
    let database = Arc::new(MemoryDatabase::new());
    let harbor = harbor(store, database);
    let user = Uuid::new_v4();

    let mut events = harbor.events().subscribe();
    let record = harbor
        .save_data(
            user,
            IngestSource::Text("note".to_string()),
            SaveOptions::default(),
        )
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        Event::ContentAdded {
            content_id,
            user_id,
            update,
            ..
        } => {
            assert_eq!(content_id, record.id);
            assert_eq!(user_id, user);
            assert!(!update);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
