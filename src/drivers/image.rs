//! Built-in image drivers: preview rasterization and dimension probing.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use image::{ImageFormat, ImageReader};
use tracing::debug;

use super::{
    ContentOutput, DriverInput, DriverOptions, MetadataDriver, OutputSize, PreviewDriver,
};
use crate::domain::ContentProperties;
use crate::error::{Error, Result};
use crate::store::ByteStream;

/// Maximum output dimension per size.
fn max_dimension(size: OutputSize) -> u32 {
    match size {
        OutputSize::Small => 256,
        OutputSize::Medium => 1024,
        OutputSize::Large => 2048,
    }
}

/// Raster image previews via the `image` crate.
///
/// Consumes full content, resizes to the requested bound, and reports
/// `not_changed` when the source already fits so callers can reuse the
/// original object. GIF input is always rasterized to a static PNG.
pub struct ImagePreviewDriver;

impl ImagePreviewDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImagePreviewDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreviewDriver for ImagePreviewDriver {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supported_inputs(&self) -> &'static [DriverInput] {
        &[DriverInput::Content]
    }

    fn supported_sizes(&self) -> &'static [OutputSize] {
        &[OutputSize::Small, OutputSize::Medium, OutputSize::Large]
    }

    async fn process_content(&self, input: &[u8], opts: &DriverOptions) -> Result<ContentOutput> {
        let data = Bytes::copy_from_slice(input);
        let size = opts.size;
        let gif_hint = opts.extension.as_deref() == Some("gif");

        tokio::task::spawn_blocking(move || render(data, size, gif_hint))
            .await
            .map_err(|e| Error::Driver(e.to_string()))?
    }
}

fn render(data: Bytes, size: OutputSize, gif_hint: bool) -> Result<ContentOutput> {
    let format = image::guess_format(&data).ok();
    let is_gif = gif_hint || format == Some(ImageFormat::Gif);

    let img = image::load_from_memory(&data).map_err(|e| Error::Driver(e.to_string()))?;
    let bound = max_dimension(size);
    let needs_resize = img.width() > bound || img.height() > bound;

    if !needs_resize && !is_gif {
        let format = format.unwrap_or(ImageFormat::Png);
        debug!(size = %size, "source already within bounds, reusing content");
        return Ok(ContentOutput {
            content: data,
            mime_type: format.to_mime_type().to_string(),
            extension: primary_extension(format),
            not_changed: true,
        });
    }

    let resized = if needs_resize {
        img.thumbnail(bound, bound)
    } else {
        img
    };

    // GIFs rasterize to a static PNG; JPEG keeps its format, everything
    // else re-encodes as PNG.
    let out_format = match format {
        Some(ImageFormat::Jpeg) if !is_gif => ImageFormat::Jpeg,
        _ => ImageFormat::Png,
    };

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, out_format)
        .map_err(|e| Error::Driver(e.to_string()))?;

    Ok(ContentOutput {
        content: out.into_inner().into(),
        mime_type: out_format.to_mime_type().to_string(),
        extension: primary_extension(out_format),
        not_changed: false,
    })
}

fn primary_extension(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .copied()
        .unwrap_or("bin")
        .to_string()
}

/// Reads image dimensions without a full decode.
pub struct ImageMetadataDriver;

impl ImageMetadataDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageMetadataDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataDriver for ImageMetadataDriver {
    fn name(&self) -> &'static str {
        "image-metadata"
    }

    async fn process_stream(&self, mut input: ByteStream) -> Result<ContentProperties> {
        let mut buf = Vec::new();
        while let Some(chunk) = input.try_next().await.map_err(Error::from_stream)? {
            buf.extend_from_slice(&chunk);
        }

        let (width, height) = tokio::task::spawn_blocking(move || {
            ImageReader::new(Cursor::new(buf))
                .with_guessed_format()
                .map_err(|e| Error::Driver(e.to_string()))?
                .into_dimensions()
                .map_err(|e| Error::Driver(e.to_string()))
        })
        .await
        .map_err(|e| Error::Driver(e.to_string()))??;

        Ok(ContentProperties::Image { width, height })
    }
}
