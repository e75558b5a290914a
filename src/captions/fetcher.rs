use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, instrument};

use super::{TranscriptSegment, TranscriptSource, TEST_VIDEO_IDS};
use crate::error::{Result, RotaError};
use crate::models::{ErrorKind, ProxyEndpoint};
use crate::proxy::{FetchOptions, FetchOrchestrator, ProbeCheck, ProxiedRequest, ProxyPool};

/// Transcript of one video plus how it was obtained
#[derive(Debug, Clone, Serialize)]
pub struct FetchedTranscript {
    pub video_id: String,
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
    /// End of the last segment in seconds, rounded to two decimals
    pub total_duration: f64,
    /// Address of the proxy used, if any
    pub proxy_used: Option<String>,
    pub attempts: u32,
}

impl FetchedTranscript {
    fn new(
        video_id: &str,
        language: &str,
        segments: Vec<TranscriptSegment>,
        proxy_used: Option<String>,
        attempts: u32,
    ) -> Self {
        let total_duration = segments
            .last()
            .map(|last| ((last.start + last.duration) * 100.0).round() / 100.0)
            .unwrap_or(0.0);

        Self {
            video_id: video_id.to_string(),
            language: language.to_string(),
            segments,
            total_duration,
            proxy_used,
            attempts,
        }
    }
}

/// One transcript lookup, replayable through any proxy
pub struct TranscriptRequest<'a> {
    pub source: &'a dyn TranscriptSource,
    pub video_id: &'a str,
    pub language: &'a str,
}

#[async_trait]
impl ProxiedRequest for TranscriptRequest<'_> {
    type Output = Vec<TranscriptSegment>;

    async fn execute(
        &self,
        endpoint: &ProxyEndpoint,
    ) -> std::result::Result<Self::Output, ErrorKind> {
        self.source
            .fetch_transcript(self.video_id, self.language, Some(endpoint))
            .await
    }
}

/// Probe that fetches captions of a random test video through the proxy
pub struct TranscriptCheck {
    source: Arc<dyn TranscriptSource>,
    language: String,
}

impl TranscriptCheck {
    pub fn new(source: Arc<dyn TranscriptSource>) -> Self {
        Self {
            source,
            language: "en".to_string(),
        }
    }
}

#[async_trait]
impl ProbeCheck for TranscriptCheck {
    async fn check(&self, endpoint: &ProxyEndpoint) -> std::result::Result<(), ErrorKind> {
        let video_id = TEST_VIDEO_IDS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("jNQXAC9IVRw");

        self.source
            .fetch_transcript(video_id, &self.language, Some(endpoint))
            .await
            .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "transcript"
    }
}

/// Fetches transcripts, through the pool when proxy routing is enabled
pub struct CaptionFetcher {
    source: Arc<dyn TranscriptSource>,
    orchestrator: Option<FetchOrchestrator>,
}

impl CaptionFetcher {
    /// Fetcher that talks to the source directly
    pub fn direct(source: Arc<dyn TranscriptSource>) -> Self {
        Self {
            source,
            orchestrator: None,
        }
    }

    /// Fetcher that routes every request through `pool`
    pub fn proxied(source: Arc<dyn TranscriptSource>, pool: Arc<ProxyPool>) -> Self {
        Self {
            source,
            orchestrator: Some(FetchOrchestrator::new(pool)),
        }
    }

    pub fn uses_proxy(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Fetch with options derived from the pool configuration
    pub async fn fetch(&self, video_id: &str, language: &str) -> Result<FetchedTranscript> {
        match &self.orchestrator {
            Some(orchestrator) => {
                let options = orchestrator.default_options();
                self.fetch_with_options(video_id, language, &options).await
            }
            None => self.fetch_direct(video_id, language).await,
        }
    }

    #[instrument(skip(self, options))]
    pub async fn fetch_with_options(
        &self,
        video_id: &str,
        language: &str,
        options: &FetchOptions,
    ) -> Result<FetchedTranscript> {
        let Some(orchestrator) = &self.orchestrator else {
            return self.fetch_direct(video_id, language).await;
        };

        info!("Getting subtitles for video {} through the proxy pool", video_id);
        let request = TranscriptRequest {
            source: self.source.as_ref(),
            video_id,
            language,
        };
        let result = orchestrator.fetch_with_proxy(&request, options).await?;

        Ok(FetchedTranscript::new(
            video_id,
            language,
            result.value,
            Some(result.address),
            result.attempts,
        ))
    }

    async fn fetch_direct(&self, video_id: &str, language: &str) -> Result<FetchedTranscript> {
        info!("Getting subtitles for video {} without proxy", video_id);
        let segments = self
            .source
            .fetch_transcript(video_id, language, None)
            .await
            .map_err(RotaError::Upstream)?;

        Ok(FetchedTranscript::new(video_id, language, segments, None, 1))
    }
}
