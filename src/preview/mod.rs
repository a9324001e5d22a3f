//! Preview orchestration.
//!
//! Negotiates an input mode with the resolved preview driver, derives
//! the size variants it supports, and fills in the rest from the poster
//! image when a video-style driver only produces a single frame.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::PreviewRef;
use crate::drivers::{
    ContentOutput, DriverInput, DriverOptions, DriverRegistry, OutputSize, PreviewDriver,
    PreviewKind,
};
use crate::error::{Error, Result};
use crate::store::{ByteStream, ObjectStore, StoredObject};

/// Derived preview variants for one stored object.
#[derive(Debug, Clone, Default)]
pub struct PreviewSet {
    pub small: Option<PreviewRef>,
    pub medium: Option<PreviewRef>,
    pub large: Option<PreviewRef>,
    pub mime_type: Option<String>,
    pub extension: Option<String>,
}

impl PreviewSet {
    fn slot(&mut self, size: OutputSize) -> &mut Option<PreviewRef> {
        match size {
            OutputSize::Small => &mut self.small,
            OutputSize::Medium => &mut self.medium,
            OutputSize::Large => &mut self.large,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.small.is_none() && self.medium.is_none() && self.large.is_none()
    }
}

pub struct PreviewOrchestrator {
    store: Arc<dyn ObjectStore>,
    drivers: Arc<DriverRegistry>,
}

impl PreviewOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, drivers: Arc<DriverRegistry>) -> Self {
        Self { store, drivers }
    }

    /// Derives previews for `object`. A mime type with no driver yields
    /// an empty set; a driver whose declared inputs cannot be satisfied
    /// is an error; a single failing size is skipped.
    pub async fn generate(
        &self,
        object: &StoredObject,
        mime_type: &str,
        extension: Option<&str>,
        source_hint: Option<&str>,
    ) -> Result<PreviewSet> {
        let Some((kind, driver)) = self.drivers.preview_for(mime_type, source_hint) else {
            debug!(%mime_type, "no preview driver for mime type");
            return Ok(PreviewSet::default());
        };

        // Negotiation always prefers streaming, then in-memory content,
        // then a source reference, regardless of the order the driver
        // declares its capabilities in.
        let inputs: Vec<DriverInput> = [
            DriverInput::Stream,
            DriverInput::Content,
            DriverInput::Source,
        ]
        .into_iter()
        .filter(|input| driver.supports_input(*input))
        .filter(|input| *input != DriverInput::Source || source_hint.is_some())
        .collect();
        if inputs.is_empty() {
            return Err(Error::DriverInputNotFound(driver.name().to_string()));
        }

        let mut set = PreviewSet::default();
        // Full-content materialization is shared across sizes.
        let mut cached_content: Option<Bytes> = None;

        for size in [OutputSize::Small, OutputSize::Medium, OutputSize::Large] {
            if !driver.supports_size(size) {
                continue;
            }
            let opts = DriverOptions {
                size,
                extension: extension.map(str::to_string),
            };
            match self
                .derive_one(object, &driver, &inputs, source_hint, &opts, &mut cached_content)
                .await
            {
                Ok((preview, out_mime, out_ext)) => {
                    *set.slot(size) = Some(preview);
                    set.mime_type.get_or_insert(out_mime);
                    set.extension.get_or_insert(out_ext);
                }
                Err(err) => {
                    warn!(driver = driver.name(), %size, error = %err, "preview derivation failed");
                }
            }
        }

        self.fill_from_poster(kind, &mut set).await;
        Ok(set)
    }

    /// Produces one size variant, trying the negotiated input modes in
    /// preference order.
    async fn derive_one(
        &self,
        object: &StoredObject,
        driver: &Arc<dyn PreviewDriver>,
        inputs: &[DriverInput],
        source_hint: Option<&str>,
        opts: &DriverOptions,
        cached_content: &mut Option<Bytes>,
    ) -> Result<(PreviewRef, String, String)> {
        let mut last_err = Error::DriverInputNotFound(driver.name().to_string());
        for input in inputs {
            let attempt = match input {
                DriverInput::Stream => {
                    let source = self.open_stream(object).await?;
                    match driver.process_stream(source, opts).await {
                        Ok(out) => {
                            let stored = self.store.put_stream(out.stream).await?;
                            Ok((
                                PreviewRef {
                                    storage_id: stored.id,
                                    size: stored.size,
                                },
                                out.mime_type,
                                out.extension,
                            ))
                        }
                        Err(err) => Err(err),
                    }
                }
                DriverInput::Content => {
                    let content = match cached_content {
                        Some(content) => content.clone(),
                        None => {
                            let content = self.read_content(object).await?;
                            *cached_content = Some(content.clone());
                            content
                        }
                    };
                    match driver.process_content(&content, opts).await {
                        Ok(out) => self.store_content_output(object, out).await,
                        Err(err) => Err(err),
                    }
                }
                DriverInput::Source => {
                    // Filtered upfront when no hint exists.
                    let source = source_hint.unwrap_or_default();
                    match driver.process_source(source, opts).await {
                        Ok(out) => {
                            let stored = self.store.put_bytes(out.content).await?;
                            Ok((
                                PreviewRef {
                                    storage_id: stored.id,
                                    size: stored.size,
                                },
                                out.mime_type,
                                out.extension,
                            ))
                        }
                        Err(err) => Err(err),
                    }
                }
            };
            match attempt {
                Ok(result) => return Ok(result),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    async fn store_content_output(
        &self,
        object: &StoredObject,
        out: ContentOutput,
    ) -> Result<(PreviewRef, String, String)> {
        let preview = if out.not_changed {
            // The source already satisfies the bound; reuse its object.
            PreviewRef {
                storage_id: object.id.clone(),
                size: object.size,
            }
        } else {
            let stored = self.store.put_bytes(out.content).await?;
            PreviewRef {
                storage_id: stored.id,
                size: stored.size,
            }
        };
        Ok((preview, out.mime_type, out.extension))
    }

    /// Video-style drivers produce a single poster frame. The missing
    /// sizes are derived from that frame with the image driver.
    async fn fill_from_poster(&self, kind: PreviewKind, set: &mut PreviewSet) {
        if !matches!(kind, PreviewKind::Video | PreviewKind::RemoteVideo) {
            return;
        }
        let Some(poster) = set.medium.clone() else {
            return;
        };
        let Some(image) = self.drivers.preview(PreviewKind::Image) else {
            return;
        };
        let poster_mime = set
            .mime_type
            .clone()
            .unwrap_or_else(|| "image/jpeg".to_string());
        if !poster_mime.starts_with("image") {
            return;
        }

        let content = match self.store.get(&poster.storage_id).await {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "poster frame unavailable for size fill");
                return;
            }
        };
        for size in [OutputSize::Small, OutputSize::Large] {
            if set.slot(size).is_some() || !image.supports_size(size) {
                continue;
            }
            let opts = DriverOptions {
                size,
                extension: set.extension.clone(),
            };
            let derived = match image.process_content(&content, &opts).await {
                Ok(out) if out.not_changed => Ok(poster.clone()),
                Ok(out) => match self.store.put_bytes(out.content).await {
                    Ok(stored) => Ok(PreviewRef {
                        storage_id: stored.id,
                        size: stored.size,
                    }),
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            match derived {
                Ok(preview) => *set.slot(size) = Some(preview),
                Err(err) => {
                    warn!(%size, error = %err, "poster-derived preview failed");
                }
            }
        }
    }

    async fn open_stream(&self, object: &StoredObject) -> Result<ByteStream> {
        if let Some(path) = &object.local_path {
            let file = tokio::fs::File::open(path).await?;
            let stream = tokio_util::io::ReaderStream::new(file);
            return Ok(Box::pin(stream));
        }
        self.store.get_stream(&object.id).await
    }

    async fn read_content(&self, object: &StoredObject) -> Result<Bytes> {
        if let Some(path) = &object.local_path {
            return Ok(tokio::fs::read(path).await?.into());
        }
        self.store.get(&object.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::single_chunk;
    use crate::store::MemoryStore;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = ImageBuffer::<Rgb<u8>, _>::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    #[tokio::test]
    async fn small_image_reuses_source_object_for_all_sizes() {
        let store = Arc::new(MemoryStore::new());
        let drivers = Arc::new(DriverRegistry::builtin());
        let orchestrator = PreviewOrchestrator::new(store.clone(), drivers);

        let object = store
            .put_stream(single_chunk(png_bytes(100, 80)))
            .await
            .unwrap();
        let set = orchestrator
            .generate(&object, "image/png", Some("png"), None)
            .await
            .unwrap();

        // 100x80 fits every bound, so every variant dedups to the source.
        for preview in [&set.small, &set.medium, &set.large] {
            assert_eq!(preview.as_ref().unwrap().storage_id, object.id);
        }
    }

    #[tokio::test]
    async fn oversized_image_gets_distinct_variants() {
        let store = Arc::new(MemoryStore::new());
        let drivers = Arc::new(DriverRegistry::builtin());
        let orchestrator = PreviewOrchestrator::new(store.clone(), drivers);

        let object = store
            .put_stream(single_chunk(png_bytes(3000, 2000)))
            .await
            .unwrap();
        let set = orchestrator
            .generate(&object, "image/png", Some("png"), None)
            .await
            .unwrap();

        let small = set.small.unwrap();
        assert_ne!(small.storage_id, object.id);
        assert!(store.stat(&small.storage_id).await.is_ok());
        assert_eq!(set.mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn streaming_input_wins_over_declared_capability_order() {
        use crate::drivers::{DriverOptions, StreamOutput};
        use std::sync::atomic::{AtomicBool, Ordering};

        struct BothModesDriver {
            content_used: Arc<AtomicBool>,
        }

        #[async_trait::async_trait]
        impl crate::drivers::PreviewDriver for BothModesDriver {
            fn name(&self) -> &'static str {
                "both-modes"
            }

            // Content listed first on purpose.
            fn supported_inputs(&self) -> &'static [DriverInput] {
                &[DriverInput::Content, DriverInput::Stream]
            }

            fn supported_sizes(&self) -> &'static [OutputSize] {
                &[OutputSize::Medium]
            }

            async fn process_stream(
                &self,
                input: ByteStream,
                _opts: &DriverOptions,
            ) -> Result<StreamOutput> {
                Ok(StreamOutput {
                    stream: input,
                    mime_type: "image/png".to_string(),
                    extension: "png".to_string(),
                })
            }

            async fn process_content(
                &self,
                input: &[u8],
                _opts: &DriverOptions,
            ) -> Result<ContentOutput> {
                self.content_used.store(true, Ordering::Relaxed);
                Ok(ContentOutput {
                    content: Bytes::copy_from_slice(input),
                    not_changed: false,
                    mime_type: "image/png".to_string(),
                    extension: "png".to_string(),
                })
            }
        }

        let store = Arc::new(MemoryStore::new());
        let content_used = Arc::new(AtomicBool::new(false));
        let mut registry = DriverRegistry::new();
        registry.register_preview(
            PreviewKind::Image,
            Arc::new(BothModesDriver {
                content_used: content_used.clone(),
            }),
        );
        let orchestrator = PreviewOrchestrator::new(store.clone(), Arc::new(registry));

        let object = store
            .put_stream(single_chunk(png_bytes(100, 80)))
            .await
            .unwrap();
        let set = orchestrator
            .generate(&object, "image/png", Some("png"), None)
            .await
            .unwrap();

        assert!(set.medium.is_some());
        assert!(!content_used.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn unsupported_mime_yields_empty_set() {
        let store = Arc::new(MemoryStore::new());
        let drivers = Arc::new(DriverRegistry::builtin());
        let orchestrator = PreviewOrchestrator::new(store.clone(), drivers);

        let object = store
            .put_stream(single_chunk(Bytes::from_static(b"%PDF-1.4")))
            .await
            .unwrap();
        let set = orchestrator
            .generate(&object, "application/pdf", Some("pdf"), None)
            .await
            .unwrap();
        assert!(set.is_empty());
    }
}
