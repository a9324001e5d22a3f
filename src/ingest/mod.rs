//! Ingestion pipeline.
//!
//! Turns a heterogeneous input (bytes, text, stream, URL, directory)
//! into an immutable stored object plus extracted metadata, applying
//! quota enforcement and format-specific pre-conversion on the way in.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::RecordStore;
use crate::domain::{ContentActionName, ContentProperties, LimitName};
use crate::drivers::{
    is_video_type, ConvertKind, DriverInput, DriverRegistry, MetadataKind, UploadKind,
};
use crate::error::{Error, Result};
use crate::quota;
use crate::store::{ByteStream, ObjectStore, StoredObject};

/// Anything the pipeline can ingest.
pub enum IngestSource {
    Bytes(Bytes),
    Text(String),
    Number(i64),
    Stream(ByteStream),
    Url(String),
    Directory(PathBuf),
}

/// Byte-progress callback invoked with the cumulative count.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default, Clone)]
pub struct IngestOptions {
    pub file_name: Option<String>,
    pub extension_hint: Option<String>,
    /// Explicitly requested upload driver (e.g. "archive").
    pub driver: Option<String>,
    pub on_progress: Option<ProgressFn>,
}

/// Pipeline result: the stored object plus everything resolved on the
/// way in.
pub struct IngestedObject {
    pub object: StoredObject,
    pub mime_type: String,
    pub extension: Option<String>,
    pub properties: Option<ContentProperties>,
}

pub struct IngestPipeline {
    store: Arc<dyn ObjectStore>,
    database: Arc<dyn RecordStore>,
    drivers: Arc<DriverRegistry>,
    http: reqwest::Client,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        database: Arc<dyn RecordStore>,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        Self {
            store,
            database,
            drivers,
            http: reqwest::Client::new(),
        }
    }

    /// Ingests `source` for `user_id`, enforcing the user's remaining
    /// content-size budget mid-stream.
    pub async fn ingest(
        &self,
        user_id: Uuid,
        source: IngestSource,
        declared_mime: Option<&str>,
        options: IngestOptions,
    ) -> Result<IngestedObject> {
        match source {
            IngestSource::Directory(path) => self.ingest_directory(&path).await,
            IngestSource::Url(url) => self.ingest_url(user_id, &url, declared_mime, options).await,
            IngestSource::Bytes(bytes) => {
                let stream = single_chunk(bytes);
                self.ingest_stream(user_id, stream, declared_mime, options)
                    .await
            }
            IngestSource::Text(text) => {
                let stream = single_chunk(Bytes::from(text));
                self.ingest_stream(user_id, stream, declared_mime, options)
                    .await
            }
            IngestSource::Number(n) => {
                // Numeric literals render base-10, matching upstream.
                let stream = single_chunk(Bytes::from(n.to_string()));
                self.ingest_stream(user_id, stream, declared_mime, options)
                    .await
            }
            IngestSource::Stream(stream) => {
                self.ingest_stream(user_id, stream, declared_mime, options)
                    .await
            }
        }
    }

    async fn ingest_directory(&self, path: &std::path::Path) -> Result<IngestedObject> {
        let object = self.store.put_directory(path).await?;
        Ok(IngestedObject {
            object,
            mime_type: "directory".to_string(),
            extension: Some("none".to_string()),
            properties: None,
        })
    }

    async fn ingest_url(
        &self,
        user_id: Uuid,
        url: &str,
        declared_mime: Option<&str>,
        mut options: IngestOptions,
    ) -> Result<IngestedObject> {
        if options.file_name.is_none() {
            options.file_name = url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }

        // A requested upload driver that understands source references
        // scrapes the link itself instead of a plain fetch.
        if let Some(name) = options.driver.clone() {
            let driver = self.drivers.upload_by_name(&name)?;
            if driver.supports_input(DriverInput::Source) {
                let out = driver.process_source(url).await?;
                options.driver = None;
                return self
                    .save_stream(user_id, out.stream, out.mime_type, Some(out.extension), options)
                    .await;
            }
        }

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus(response.status().as_u16()));
        }
        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|r| r.map_err(|e| io::Error::new(io::ErrorKind::Other, e))),
        );

        let mime = self.resolve_mime(declared_mime.or(header_mime.as_deref()), &options);
        let extension = self.resolve_extension(&options, &mime);
        self.save_stream(user_id, stream, mime, extension, options)
            .await
    }

    async fn ingest_stream(
        &self,
        user_id: Uuid,
        stream: ByteStream,
        declared_mime: Option<&str>,
        options: IngestOptions,
    ) -> Result<IngestedObject> {
        let mime = self.resolve_mime(declared_mime, &options);
        let extension = self.resolve_extension(&options, &mime);
        self.save_stream(user_id, stream, mime, extension, options)
            .await
    }

    /// Core streaming path: convert, guard, then persist and extract
    /// metadata concurrently from the same logical stream.
    async fn save_stream(
        &self,
        user_id: Uuid,
        mut stream: ByteStream,
        mut mime_type: String,
        mut extension: Option<String>,
        options: IngestOptions,
    ) -> Result<IngestedObject> {
        let mut properties: Option<ContentProperties> = None;

        // Video is made streamable before it is stored; the transcoder
        // reports duration as a side property.
        if is_video_type(&mime_type) {
            if let Some(converter) = self.drivers.convert(ConvertKind::VideoStreamable) {
                let out = converter
                    .process_stream(stream, extension.as_deref())
                    .await?;
                stream = out.stream;
                mime_type = out.mime_type;
                extension = Some(out.extension);
                if let Some(duration) = out.duration {
                    properties = Some(ContentProperties::Video {
                        duration,
                        width: None,
                        height: None,
                    });
                }
            } else {
                debug!(%mime_type, "no streamable converter registered, storing raw video");
            }
        }

        let remaining = self.limit_remaining(user_id).await?;
        let (guarded, quota_status) = quota::guard(stream, remaining);
        stream = guarded;
        if let Some(progress) = options.on_progress.clone() {
            stream = with_progress(stream, progress);
        }

        let metadata_driver = mime_type
            .starts_with("image")
            .then(|| {
                MetadataKind::from_top_level("image").and_then(|k| self.drivers.metadata(k))
            })
            .flatten();

        let (persist_stream, metadata_stream) = match metadata_driver {
            Some(_) => {
                let (a, b) = tee(stream);
                (a, Some(b))
            }
            None => (stream, None),
        };

        let persist = self.persist(persist_stream, &options, &mut mime_type, &mut extension);

        let extract = async {
            match (metadata_driver, metadata_stream) {
                (Some(driver), Some(stream)) => match driver.process_stream(stream).await {
                    Ok(props) => Some(props),
                    // Best-effort only; never fails the ingestion.
                    Err(err) => {
                        warn!(error = %err, "metadata extraction failed");
                        None
                    }
                },
                _ => None,
            }
        };

        let (object, extracted) = tokio::join!(persist, extract);
        let object = match object {
            Ok(object) => object,
            // Stores are free to rewrap the trip error; the guard's own
            // flag decides what actually happened mid-stream.
            Err(err) if quota_status.tripped() => {
                debug!(error = %err, "store failure after quota trip");
                return Err(Error::LimitReached);
            }
            Err(err) => return Err(err),
        };

        if properties.is_none() {
            properties = extracted;
        }

        Ok(IngestedObject {
            object,
            mime_type,
            extension,
            properties,
        })
    }

    async fn persist(
        &self,
        stream: ByteStream,
        options: &IngestOptions,
        mime_type: &mut String,
        extension: &mut Option<String>,
    ) -> Result<StoredObject> {
        if let Some(name) = &options.driver {
            let driver = self.drivers.upload_by_name(name)?;
            if !driver.supports_input(DriverInput::Stream) {
                return Err(Error::UnsupportedInput {
                    driver: name.clone(),
                    input: DriverInput::Stream,
                });
            }
            let out = driver.process_stream(stream).await?;
            let mut object = self.store.put_directory(out.artifact.path()).await?;
            // Unpacked total, independent of the packed representation.
            object.size = out.size;
            if let Some(mime) = out.mime_type {
                *mime_type = mime;
            }
            if let Some(ext) = out.extension {
                *extension = Some(ext);
            }
            return Ok(object);
        }

        let mut object = if self.store.supports_stream_put() {
            self.store.put_stream(stream).await?
        } else {
            let spool = self
                .drivers
                .upload(UploadKind::File)
                .ok_or_else(|| Error::DriverNotFound(UploadKind::File.to_string()))?;
            let out = spool.process_stream(stream).await?;
            let mut object = self.store.put_file(out.artifact.path()).await?;
            object.local_path = Some(out.artifact.path().to_path_buf());
            object.cleanup = Some(out.artifact);
            object
        };

        // Store-side chunking may disagree with bytes counted mid-stream;
        // the stat size is authoritative.
        object.size = self.store.stat(&object.id).await?.size;
        Ok(object)
    }

    /// Remaining content-size budget for the user, or `None` when no
    /// active limit exists. May be negative.
    pub async fn limit_remaining(&self, user_id: Uuid) -> Result<Option<i64>> {
        let Some(limit) = self
            .database
            .user_limit(user_id, LimitName::SaveContentSize)
            .await?
        else {
            return Ok(None);
        };
        if !limit.is_active {
            return Ok(None);
        }

        let uploaded = self
            .database
            .actions_size_sum(user_id, ContentActionName::Upload, limit.period_start)
            .await?;
        let pinned = self
            .database
            .actions_size_sum(user_id, ContentActionName::Pin, limit.period_start)
            .await?;

        Ok(Some(limit.value as i64 - uploaded as i64 - pinned as i64))
    }

    fn resolve_mime(&self, declared: Option<&str>, options: &IngestOptions) -> String {
        if let Some(mime) = declared {
            return mime.to_string();
        }
        if let Some(name) = &options.file_name {
            if let Some(guess) = mime_guess::from_path(name).first() {
                return guess.essence_str().to_string();
            }
        }
        if let Some(ext) = &options.extension_hint {
            if let Some(guess) = mime_guess::from_ext(ext).first() {
                return guess.essence_str().to_string();
            }
        }
        "application/octet-stream".to_string()
    }

    fn resolve_extension(&self, options: &IngestOptions, mime_type: &str) -> Option<String> {
        options
            .extension_hint
            .clone()
            .or_else(|| options.file_name.as_deref().and_then(extension_from_name))
            .or_else(|| {
                mime_type
                    .rsplit('/')
                    .next()
                    .map(|s| s.to_ascii_lowercase())
            })
    }
}

pub(crate) fn single_chunk(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

fn extension_from_name(name: &str) -> Option<String> {
    let mut parts = name.rsplitn(2, '.');
    let ext = parts.next()?;
    // A name without a dot has no extension.
    parts.next()?;
    Some(ext.to_ascii_lowercase())
}

fn with_progress(stream: ByteStream, progress: ProgressFn) -> ByteStream {
    let mut seen = 0u64;
    Box::pin(stream.map(move |item| {
        if let Ok(chunk) = &item {
            seen += chunk.len() as u64;
            progress(seen);
        }
        item
    }))
}

fn mirror_io_error(err: &io::Error) -> io::Error {
    if quota::is_limit_reached(err) {
        quota::limit_error()
    } else {
        io::Error::new(err.kind(), err.to_string())
    }
}

/// Duplicates a stream to two consumers. The pump stops as soon as both
/// sides hang up, dropping the source so upstream sees cancellation.
fn tee(mut stream: ByteStream) -> (ByteStream, ByteStream) {
    let (tx_a, mut rx_a) = mpsc::channel::<io::Result<Bytes>>(16);
    let (tx_b, mut rx_b) = mpsc::channel::<io::Result<Bytes>>(16);

    tokio::spawn(async move {
        let mut a_open = true;
        let mut b_open = true;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if a_open && tx_a.send(Ok(chunk.clone())).await.is_err() {
                        a_open = false;
                    }
                    if b_open && tx_b.send(Ok(chunk)).await.is_err() {
                        b_open = false;
                    }
                    if !a_open && !b_open {
                        break;
                    }
                }
                Err(err) => {
                    if a_open {
                        let _ = tx_a.send(Err(mirror_io_error(&err))).await;
                    }
                    if b_open {
                        let _ = tx_b.send(Err(err)).await;
                    }
                    break;
                }
            }
        }
    });

    let a = Box::pin(async_stream::stream! {
        while let Some(item) = rx_a.recv().await {
            yield item;
        }
    });
    let b = Box::pin(async_stream::stream! {
        while let Some(item) = rx_b.recv().await {
            yield item;
        }
    });
    (a, b)
}
