//! Archive upload driver: unpacks a zip stream into a temp directory.

use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::debug;

use super::{DriverInput, UploadDriver, UploadOutput};
use crate::error::{Error, Result};
use crate::store::{ByteStream, TempArtifact};

/// Unpacks archive uploads so they can be stored as directory objects.
///
/// The reported size is the total of the unpacked files, independent of
/// the compressed input size. The returned temp directory is removed
/// when the output artifact is dropped.
pub struct ArchiveUploadDriver;

impl ArchiveUploadDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArchiveUploadDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadDriver for ArchiveUploadDriver {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn supported_inputs(&self) -> &'static [DriverInput] {
        &[DriverInput::Stream]
    }

    async fn process_stream(&self, mut input: ByteStream) -> Result<UploadOutput> {
        let mut data = Vec::new();
        while let Some(chunk) = input.try_next().await.map_err(Error::from_stream)? {
            data.extend_from_slice(&chunk);
        }

        let (dir, size) = tokio::task::spawn_blocking(move || unpack(data))
            .await
            .map_err(|e| Error::Driver(e.to_string()))??;

        debug!(unpacked_bytes = size, "archive unpacked");

        Ok(UploadOutput {
            artifact: TempArtifact::Dir(dir),
            size,
            mime_type: Some("directory".to_string()),
            extension: Some("none".to_string()),
        })
    }
}

fn unpack(data: Vec<u8>) -> Result<(tempfile::TempDir, u64)> {
    let dir = tempfile::tempdir()?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
        .map_err(|e| Error::Driver(e.to_string()))?;
    archive
        .extract(dir.path())
        .map_err(|e| Error::Driver(e.to_string()))?;

    let size = unpacked_size(dir.path())?;
    Ok((dir, size))
}

fn unpacked_size(dir: &std::path::Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += unpacked_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_fixture(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut out);
            let opts = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, content) in files {
                writer.start_file(*name, opts).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        out.into_inner()
    }

    #[tokio::test]
    async fn reports_unpacked_size_not_compressed() {
        // Highly compressible payload so compressed != unpacked.
        let payload = vec![0u8; 10_000];
        let archive = zip_fixture(&[("a.bin", &payload), ("nested/b.bin", &payload)]);
        assert!(archive.len() < 20_000);

        let driver = ArchiveUploadDriver::new();
        let stream: ByteStream =
            Box::pin(futures::stream::iter(vec![Ok(bytes::Bytes::from(archive))]));
        let out = driver.process_stream(stream).await.unwrap();

        assert_eq!(out.size, 20_000);
        assert_eq!(out.mime_type.as_deref(), Some("directory"));
        assert!(out.artifact.path().join("a.bin").exists());
        assert!(out.artifact.path().join("nested/b.bin").exists());
    }

    #[tokio::test]
    async fn invalid_archive_is_a_driver_error() {
        let driver = ArchiveUploadDriver::new();
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(
            bytes::Bytes::from_static(b"not a zip"),
        )]));
        assert!(matches!(
            driver.process_stream(stream).await,
            Err(Error::Driver(_))
        ));
    }
}
