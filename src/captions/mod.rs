//! Caption retrieval on top of the proxy pool
//!
//! [`TranscriptSource`] is the opaque upstream; [`CaptionFetcher`] routes
//! it through the pool when proxy routing is enabled.

mod fetcher;
mod timedtext;

pub use fetcher::{CaptionFetcher, FetchedTranscript, TranscriptCheck, TranscriptRequest};
pub use timedtext::TimedTextSource;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ErrorKind, ProxyEndpoint};

/// Short public videos known to carry captions, used by transcript probes
pub const TEST_VIDEO_IDS: &[&str] = &["jNQXAC9IVRw", "aqz-KE-bpKQ"];

/// One caption line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Start offset in seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

/// Upstream that can return the transcript of a video
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Fetch captions for `video_id` in `language`, through `proxy` when given
    async fn fetch_transcript(
        &self,
        video_id: &str,
        language: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> std::result::Result<Vec<TranscriptSegment>, ErrorKind>;
}

static VIDEO_ID_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})"));

fn is_video_id(s: &str) -> bool {
    s.len() == 11
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Pull the 11-character video id out of a watch URL, a short link or a bare id
pub fn extract_video_id(url_or_id: &str) -> Option<String> {
    let input = url_or_id.trim();
    if is_video_id(input) {
        return Some(input.to_string());
    }

    let re = VIDEO_ID_RE.as_ref().ok()?;
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
