use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use super::ProxyProvider;
use crate::error::{Result, RotaError};
use crate::models::{Credentials, ProxyEndpoint};

const WEBSHARE_API_URL: &str = "https://proxy.webshare.io/api/v2/proxy/list/";
/// Backbone proxies are all reached through this host, one port each
const BACKBONE_HOST: &str = "p.webshare.io";
const PAGE_SIZE: &str = "100";
const MAX_PAGES: usize = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct ProxyListPage {
    count: Option<u64>,
    next: Option<String>,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebshareProxy {
    id: Option<serde_json::Value>,
    username: String,
    password: String,
    port: u16,
}

struct CachedList {
    endpoints: Vec<ProxyEndpoint>,
    fetched_at: Instant,
}

/// Proxy list from the Webshare listing API, cached for an hour
pub struct WebshareProvider {
    client: Client,
    token: String,
    api_url: String,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedList>>,
}

impl WebshareProvider {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            token: token.into(),
            api_url: WEBSHARE_API_URL.to_string(),
            cache_ttl: CACHE_TTL,
            cache: RwLock::new(None),
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    fn cached(&self, allow_stale: bool) -> Option<Vec<ProxyEndpoint>> {
        let cache = self.cache.read();
        let cached = cache.as_ref()?;
        if allow_stale || cached.fetched_at.elapsed() < self.cache_ttl {
            Some(cached.endpoints.clone())
        } else {
            None
        }
    }

    fn store(&self, endpoints: Vec<ProxyEndpoint>) {
        *self.cache.write() = Some(CachedList {
            endpoints,
            fetched_at: Instant::now(),
        });
    }

    async fn fetch_remote(&self) -> Result<Vec<ProxyEndpoint>> {
        info!("Fetching fresh proxy list from Webshare API");

        let mut url = Url::parse_with_params(
            &self.api_url,
            &[("mode", "backbone"), ("page", "1"), ("page_size", PAGE_SIZE)],
        )
        .map_err(|e| RotaError::Provider(format!("Invalid Webshare API URL: {}", e)))?;

        let mut endpoints = Vec::new();
        for _ in 0..MAX_PAGES {
            let response = self
                .client
                .get(url.clone())
                .header(AUTHORIZATION, format!("Token {}", self.token))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(500).collect();
                return Err(RotaError::Provider(format!(
                    "Webshare API returned {}: {}",
                    status, snippet
                )));
            }

            let page: ProxyListPage = response.json().await?;
            debug!(
                "Webshare page returned {} proxies (total available: {:?})",
                page.results.len(),
                page.count
            );
            endpoints.extend(endpoints_from_page(page.results));

            match page.next {
                Some(next) => {
                    url = Url::parse(&next).map_err(|e| {
                        RotaError::Provider(format!("Invalid next page URL '{}': {}", next, e))
                    })?;
                }
                None => break,
            }
        }

        Ok(endpoints)
    }
}

/// Convert raw listing entries, skipping malformed ones.
///
/// Backbone entries share one gateway host, often on the same port, so each
/// is keyed by its listing id (or username when the id is missing).
fn endpoints_from_page(results: Vec<serde_json::Value>) -> Vec<ProxyEndpoint> {
    results
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<WebshareProxy>(raw) {
            Ok(proxy) => {
                let tag = match proxy.id {
                    Some(serde_json::Value::String(id)) => id,
                    Some(serde_json::Value::Null) | None => proxy.username.clone(),
                    Some(id) => id.to_string(),
                };
                debug!("Webshare proxy {} on port {}", tag, proxy.port);
                Some(ProxyEndpoint::tagged(
                    format!("{}:{}", BACKBONE_HOST, proxy.port),
                    &tag,
                    Some(Credentials::new(proxy.username, proxy.password)),
                ))
            }
            Err(e) => {
                error!("Missing required field in proxy data: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ProxyProvider for WebshareProvider {
    async fn fetch(&self) -> Result<Vec<ProxyEndpoint>> {
        if let Some(endpoints) = self.cached(false) {
            debug!("Returning {} proxies from cache", endpoints.len());
            return Ok(endpoints);
        }

        match self.fetch_remote().await {
            Ok(endpoints) if endpoints.is_empty() => {
                warn!("No proxies returned from Webshare API");
                Ok(endpoints)
            }
            Ok(endpoints) => {
                info!(
                    "Fetched {} backbone proxies from Webshare, all connecting through {}",
                    endpoints.len(),
                    BACKBONE_HOST
                );
                self.store(endpoints.clone());
                Ok(endpoints)
            }
            Err(e) => {
                error!("Error fetching proxies from Webshare: {}", e);
                match self.cached(true) {
                    Some(stale) => {
                        warn!("Using stale cache due to API error");
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "webshare"
    }
}
