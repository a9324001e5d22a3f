//! File upload driver: spools a stream to a temp file for stores that
//! lack native stream ingestion.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;

use super::{DriverInput, UploadDriver, UploadOutput};
use crate::error::{Error, Result};
use crate::store::{ByteStream, TempArtifact};

pub struct FileUploadDriver;

impl FileUploadDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileUploadDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadDriver for FileUploadDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    fn supported_inputs(&self) -> &'static [DriverInput] {
        &[DriverInput::Stream]
    }

    async fn process_stream(&self, mut input: ByteStream) -> Result<UploadOutput> {
        let temp_path = tempfile::NamedTempFile::new()?.into_temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;

        let mut written = 0u64;
        while let Some(chunk) = input.try_next().await.map_err(Error::from_stream)? {
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        Ok(UploadOutput {
            artifact: TempArtifact::File(temp_path),
            size: written,
            mime_type: None,
            extension: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spools_stream_to_temp_file() {
        let driver = FileUploadDriver::new();
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"hello ")),
            Ok(bytes::Bytes::from_static(b"world")),
        ]));
        let out = driver.process_stream(stream).await.unwrap();
        assert_eq!(out.size, 11);
        assert_eq!(std::fs::read(out.artifact.path()).unwrap(), b"hello world");

        let path = out.artifact.path().to_path_buf();
        drop(out);
        assert!(!path.exists(), "temp file removed on drop");
    }
}
