use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{TranscriptSegment, TranscriptSource};
use crate::error::Result;
use crate::models::{ErrorKind, ProxyEndpoint};

const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct Json3Document {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: u64,
    #[serde(default)]
    d_duration_ms: u64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Caption source backed by the public timedtext endpoint
pub struct TimedTextSource {
    base_url: String,
    timeout: Duration,
    direct: Client,
}

impl TimedTextSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: TIMEDTEXT_URL.to_string(),
            timeout,
            direct: Self::client_builder(timeout).no_proxy().build()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder().timeout(timeout).user_agent(USER_AGENT)
    }

    /// Client routed through `endpoint`
    fn proxied_client(&self, endpoint: &ProxyEndpoint) -> std::result::Result<Client, ErrorKind> {
        let proxy = proxy_for(endpoint).map_err(|e| {
            warn!("Invalid proxy URL for {}: {}", endpoint.address, e);
            ErrorKind::UpstreamOtherError
        })?;

        Self::client_builder(self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| {
                warn!("Failed to build client for {}: {}", endpoint.address, e);
                ErrorKind::UpstreamOtherError
            })
    }
}

/// Proxy for `endpoint`; credentials go through `basic_auth` rather than the
/// URL so reserved characters need no escaping
fn proxy_for(endpoint: &ProxyEndpoint) -> reqwest::Result<Proxy> {
    let proxy = Proxy::all(endpoint.url())?;
    Ok(match &endpoint.credentials {
        Some(creds) => proxy.basic_auth(&creds.username, &creds.password),
        None => proxy,
    })
}

#[async_trait]
impl TranscriptSource for TimedTextSource {
    async fn fetch_transcript(
        &self,
        video_id: &str,
        language: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> std::result::Result<Vec<TranscriptSegment>, ErrorKind> {
        let client = match proxy {
            Some(endpoint) => self.proxied_client(endpoint)?,
            None => self.direct.clone(),
        };

        let response = client
            .get(&self.base_url)
            .query(&[("v", video_id), ("lang", language), ("fmt", "json3")])
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            debug!("timedtext returned {} for {}", status, video_id);
            return Err(kind);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        decode_json3(&body)
    }
}

fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ErrorKind::UpstreamRateLimited)
    } else if status.is_success() {
        None
    } else {
        Some(ErrorKind::UpstreamOtherError)
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::ConnectionRefused
    } else if err.status() == Some(StatusCode::TOO_MANY_REQUESTS) {
        ErrorKind::UpstreamRateLimited
    } else {
        ErrorKind::UpstreamOtherError
    }
}

/// Decode a json3 caption document.
///
/// An empty body means the video has no captions in that language.
fn decode_json3(body: &str) -> std::result::Result<Vec<TranscriptSegment>, ErrorKind> {
    if body.trim().is_empty() {
        return Err(ErrorKind::UpstreamOtherError);
    }

    let doc: Json3Document = serde_json::from_str(body).map_err(|e| {
        debug!("Malformed caption document: {}", e);
        ErrorKind::UpstreamOtherError
    })?;

    Ok(doc
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment {
                text: text.to_string(),
                start: event.t_start_ms as f64 / 1000.0,
                duration: event.d_duration_ms as f64 / 1000.0,
            })
        })
        .collect())
}
