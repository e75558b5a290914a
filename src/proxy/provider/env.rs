use async_trait::async_trait;
use tracing::{error, info, warn};

use super::ProxyProvider;
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{Credentials, ProxyEndpoint};

/// Static `host:port` list sharing one set of credentials
#[derive(Debug, Clone)]
pub struct EnvProxyProvider {
    entries: Vec<String>,
    username: Option<String>,
    password: Option<String>,
}

impl EnvProxyProvider {
    pub fn new(entries: Vec<String>, username: Option<String>, password: Option<String>) -> Self {
        Self {
            entries,
            username,
            password,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.proxy_list.clone(),
            config.username.clone(),
            config.password.clone(),
        )
    }

    fn endpoints(&self) -> Vec<ProxyEndpoint> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            error!("Missing proxy credentials in environment variables");
            return Vec::new();
        };
        if self.entries.is_empty() {
            error!("WEBSHARE_PROXY_LIST is empty");
            return Vec::new();
        }

        let credentials = Credentials::new(username.clone(), password.clone());
        let endpoints: Vec<ProxyEndpoint> = self
            .entries
            .iter()
            .filter_map(
                |entry| match ProxyEndpoint::parse(entry, Some(credentials.clone())) {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        warn!("Skipping proxy entry '{}': {}", entry, e);
                        None
                    }
                },
            )
            .collect();

        info!("Loaded {} proxies from environment variables", endpoints.len());
        endpoints
    }
}

#[async_trait]
impl ProxyProvider for EnvProxyProvider {
    async fn fetch(&self) -> Result<Vec<ProxyEndpoint>> {
        Ok(self.endpoints())
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_parses_list_with_shared_credentials() {
        let provider = EnvProxyProvider::new(
            entries(&["1.2.3.4:8001", " 5.6.7.8:8002 "]),
            Some("user".into()),
            Some("pass".into()),
        );

        let endpoints = provider.fetch().await.unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].address, "5.6.7.8:8002");
        assert_eq!(endpoints[0].url(), "http://1.2.3.4:8001");
        assert_eq!(
            endpoints[0].credentials,
            Some(Credentials::new("user", "pass"))
        );
    }

    #[tokio::test]
    async fn test_skips_entries_without_port() {
        let provider = EnvProxyProvider::new(
            entries(&["1.2.3.4", "1.2.3.4:notaport", "9.9.9.9:80"]),
            Some("user".into()),
            Some("pass".into()),
        );

        let endpoints = provider.fetch().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].address, "9.9.9.9:80");
    }

    #[tokio::test]
    async fn test_missing_credentials_yield_nothing() {
        let provider = EnvProxyProvider::new(entries(&["1.2.3.4:80"]), Some("user".into()), None);
        assert!(provider.fetch().await.unwrap().is_empty());
    }
}
