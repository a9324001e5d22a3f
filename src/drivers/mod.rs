//! Driver capability registry.
//!
//! Drivers are pluggable processing backends for a media kind and a
//! logical operation (upload/preview/convert/metadata-extract). Each one
//! declares the input modes and output sizes it supports; orchestration
//! code negotiates the cheapest supported mode and never calls an
//! undeclared one. The registry is a closed mapping built at startup,
//! not a string-keyed lookup resolved at call time.

pub mod archive;
pub mod file;
pub mod image;
pub mod remote;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::ContentProperties;
use crate::error::{Error, Result};
use crate::store::{ByteStream, TempArtifact};

pub use archive::ArchiveUploadDriver;
pub use file::FileUploadDriver;
pub use image::{ImageMetadataDriver, ImagePreviewDriver};
pub use remote::{is_hosted_video_url, RemoteThumbnailDriver};

/// Input modes a driver can consume.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum DriverInput {
    /// A live read-stream of the source bytes.
    Stream,
    /// The full object content in memory.
    Content,
    /// The original source reference (e.g. a URL).
    Source,
}

/// Derivative artifact sizes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum OutputSize {
    Small,
    Medium,
    Large,
}

/// Per-invocation options passed to preview drivers.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub size: OutputSize,
    pub extension: Option<String>,
}

pub struct StreamOutput {
    pub stream: ByteStream,
    pub mime_type: String,
    pub extension: String,
}

pub struct ContentOutput {
    pub content: Bytes,
    pub mime_type: String,
    pub extension: String,
    /// Output equals input; callers must reuse the source object instead
    /// of storing a duplicate.
    pub not_changed: bool,
}

pub struct SourceOutput {
    pub content: Bytes,
    pub mime_type: String,
    pub extension: String,
}

pub struct ConvertOutput {
    pub stream: ByteStream,
    pub mime_type: String,
    pub extension: String,
    pub duration: Option<f64>,
}

pub struct UploadOutput {
    /// Temp materialization of the upload, removed on drop.
    pub artifact: TempArtifact,
    pub size: u64,
    pub mime_type: Option<String>,
    pub extension: Option<String>,
}

/// Preview derivation backend.
#[async_trait]
pub trait PreviewDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_inputs(&self) -> &'static [DriverInput];

    fn supported_sizes(&self) -> &'static [OutputSize];

    fn supports_input(&self, input: DriverInput) -> bool {
        self.supported_inputs().contains(&input)
    }

    fn supports_size(&self, size: OutputSize) -> bool {
        self.supported_sizes().contains(&size)
    }

    async fn process_stream(
        &self,
        _input: ByteStream,
        _opts: &DriverOptions,
    ) -> Result<StreamOutput> {
        Err(Error::UnsupportedInput {
            driver: self.name().to_string(),
            input: DriverInput::Stream,
        })
    }

    async fn process_content(
        &self,
        _input: &[u8],
        _opts: &DriverOptions,
    ) -> Result<ContentOutput> {
        Err(Error::UnsupportedInput {
            driver: self.name().to_string(),
            input: DriverInput::Content,
        })
    }

    async fn process_source(
        &self,
        _source: &str,
        _opts: &DriverOptions,
    ) -> Result<SourceOutput> {
        Err(Error::UnsupportedInput {
            driver: self.name().to_string(),
            input: DriverInput::Source,
        })
    }
}

/// Pre-storage ingestion backend (spooling, unpacking, scraping).
#[async_trait]
pub trait UploadDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_inputs(&self) -> &'static [DriverInput];

    fn supports_input(&self, input: DriverInput) -> bool {
        self.supported_inputs().contains(&input)
    }

    async fn process_stream(&self, _input: ByteStream) -> Result<UploadOutput> {
        Err(Error::UnsupportedInput {
            driver: self.name().to_string(),
            input: DriverInput::Stream,
        })
    }

    async fn process_source(&self, _source: &str) -> Result<StreamOutput> {
        Err(Error::UnsupportedInput {
            driver: self.name().to_string(),
            input: DriverInput::Source,
        })
    }
}

/// Format conversion backend applied before storage.
#[async_trait]
pub trait ConvertDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_stream(&self, input: ByteStream, extension: Option<&str>)
        -> Result<ConvertOutput>;
}

/// Metadata extraction backend. Best-effort consumers swallow failures.
#[async_trait]
pub trait MetadataDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_stream(&self, input: ByteStream) -> Result<ContentProperties>;
}

/// Logical preview kinds the registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreviewKind {
    Image,
    Gif,
    Video,
    RemoteVideo,
}

/// Upload driver slots. Parsed from caller-requested driver names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UploadKind {
    Archive,
    File,
}

/// Convert driver slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConvertKind {
    VideoStreamable,
}

/// Metadata driver slots, keyed by mime top-level type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Image,
}

impl MetadataKind {
    pub fn from_top_level(top_level: &str) -> Option<Self> {
        match top_level {
            "image" => Some(MetadataKind::Image),
            _ => None,
        }
    }
}

/// Video detection mirrors upstream behavior: some encoders only declare
/// the container in the subtype.
pub fn is_video_type(mime: &str) -> bool {
    mime.starts_with("video")
        || mime.ends_with("mp4")
        || mime.ends_with("avi")
        || mime.ends_with("mov")
        || mime.ends_with("quicktime")
}

/// Closed set of drivers, assembled once at startup.
#[derive(Default)]
pub struct DriverRegistry {
    preview: HashMap<PreviewKind, Arc<dyn PreviewDriver>>,
    upload: HashMap<UploadKind, Arc<dyn UploadDriver>>,
    convert: HashMap<ConvertKind, Arc<dyn ConvertDriver>>,
    metadata: HashMap<MetadataKind, Arc<dyn MetadataDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in lightweight drivers. Heavyweight
    /// backends (video transcode, video thumbnailing) are supplied by
    /// the embedder via the `register_*` methods.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let image = Arc::new(ImagePreviewDriver::new());
        registry.register_preview(PreviewKind::Image, image.clone());
        registry.register_preview(PreviewKind::Gif, image);
        registry.register_preview(PreviewKind::RemoteVideo, Arc::new(RemoteThumbnailDriver::new()));
        registry.register_upload(UploadKind::Archive, Arc::new(ArchiveUploadDriver::new()));
        registry.register_upload(UploadKind::File, Arc::new(FileUploadDriver::new()));
        registry.register_metadata(MetadataKind::Image, Arc::new(ImageMetadataDriver::new()));
        registry
    }

    pub fn register_preview(&mut self, kind: PreviewKind, driver: Arc<dyn PreviewDriver>) {
        self.preview.insert(kind, driver);
    }

    pub fn register_upload(&mut self, kind: UploadKind, driver: Arc<dyn UploadDriver>) {
        self.upload.insert(kind, driver);
    }

    pub fn register_convert(&mut self, kind: ConvertKind, driver: Arc<dyn ConvertDriver>) {
        self.convert.insert(kind, driver);
    }

    pub fn register_metadata(&mut self, kind: MetadataKind, driver: Arc<dyn MetadataDriver>) {
        self.metadata.insert(kind, driver);
    }

    pub fn preview(&self, kind: PreviewKind) -> Option<Arc<dyn PreviewDriver>> {
        self.preview.get(&kind).cloned()
    }

    pub fn upload(&self, kind: UploadKind) -> Option<Arc<dyn UploadDriver>> {
        self.upload.get(&kind).cloned()
    }

    /// Resolves a caller-requested upload driver name against the closed
    /// set, surfacing configuration errors distinctly from absence.
    pub fn upload_by_name(&self, name: &str) -> Result<Arc<dyn UploadDriver>> {
        let kind: UploadKind = name
            .parse()
            .map_err(|_| Error::DriverNotFound(name.to_string()))?;
        self.upload(kind)
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))
    }

    pub fn convert(&self, kind: ConvertKind) -> Option<Arc<dyn ConvertDriver>> {
        self.convert.get(&kind).cloned()
    }

    pub fn metadata(&self, kind: MetadataKind) -> Option<Arc<dyn MetadataDriver>> {
        self.metadata.get(&kind).cloned()
    }

    /// Derives the preview driver for a mime type and optional source
    /// hint. Subtype wins over top-level type; a hosted-video source
    /// forces the remote thumbnail driver. Absence is valid state.
    pub fn preview_for(
        &self,
        mime_type: &str,
        source_hint: Option<&str>,
    ) -> Option<(PreviewKind, Arc<dyn PreviewDriver>)> {
        if let Some(source) = source_hint {
            if is_hosted_video_url(source) {
                return self
                    .preview(PreviewKind::RemoteVideo)
                    .map(|d| (PreviewKind::RemoteVideo, d));
            }
        }

        let mut parts = mime_type.splitn(2, '/');
        let top_level = parts.next().unwrap_or("");
        let subtype = parts.next().unwrap_or("");

        let by_subtype = match subtype {
            "gif" => Some(PreviewKind::Gif),
            _ => None,
        };
        if let Some(kind) = by_subtype {
            if let Some(driver) = self.preview(kind) {
                return Some((kind, driver));
            }
        }

        let kind = match top_level {
            "image" => Some(PreviewKind::Image),
            _ if is_video_type(mime_type) => Some(PreviewKind::Video),
            _ => None,
        }?;
        self.preview(kind).map(|d| (kind, d))
    }
}
