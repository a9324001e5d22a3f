//! Remote thumbnail driver for hosted-video pages.
//!
//! Hosted-video platforms expose poster frames at well-known URLs, so a
//! thumbnail can be derived from the source link without touching the
//! stored bytes at all.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{DriverInput, DriverOptions, OutputSize, PreviewDriver, SourceOutput};
use crate::error::{Error, Result};

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?v=|shorts/|embed/)|youtu\.be/)([A-Za-z0-9_-]{6,})")
        .expect("static pattern")
});

/// Whether a source link points at a known hosted-video page.
pub fn is_hosted_video_url(url: &str) -> bool {
    video_id_from_url(url).is_some()
}

fn video_id_from_url(url: &str) -> Option<&str> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Fetches the poster frame for a hosted video. Source input only; a
/// single medium artifact is produced.
pub struct RemoteThumbnailDriver {
    client: reqwest::Client,
}

impl RemoteThumbnailDriver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RemoteThumbnailDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreviewDriver for RemoteThumbnailDriver {
    fn name(&self) -> &'static str {
        "remote-thumbnail"
    }

    fn supported_inputs(&self) -> &'static [DriverInput] {
        &[DriverInput::Source]
    }

    fn supported_sizes(&self) -> &'static [OutputSize] {
        &[OutputSize::Medium]
    }

    async fn process_source(&self, source: &str, _opts: &DriverOptions) -> Result<SourceOutput> {
        let video_id = video_id_from_url(source)
            .ok_or_else(|| Error::Driver(format!("no video id in source: {source}")))?;
        let url = format!("https://img.youtube.com/vi/{video_id}/hqdefault.jpg");
        debug!(%url, "fetching hosted-video poster");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus(response.status().as_u16()));
        }
        let content = response.bytes().await?;

        Ok(SourceOutput {
            content,
            mime_type: "image/jpeg".to_string(),
            extension: "jpg".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_hosted_video_links() {
        assert!(is_hosted_video_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(is_hosted_video_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_hosted_video_url("https://youtube.com/shorts/abcdef123"));
        assert!(!is_hosted_video_url("https://example.com/video.mp4"));
    }

    #[test]
    fn extracts_video_id() {
        assert_eq!(
            video_id_from_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1s"),
            Some("dQw4w9WgXcQ")
        );
    }
}
