//! Sources of the proxy universe

mod env;
mod webshare;

pub use env::EnvProxyProvider;
pub use webshare::WebshareProvider;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::ProxyEndpoint;

/// Something that can list the proxies to load into the pool
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ProxyEndpoint>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Pick the provider the configuration asks for: the Webshare API when a
/// token is present, the static environment list otherwise
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn ProxyProvider>> {
    match &config.webshare_api_token {
        Some(token) => Ok(Box::new(WebshareProvider::new(token.clone())?)),
        None => Ok(Box::new(EnvProxyProvider::from_config(config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider_config(token: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            use_proxy: true,
            webshare_api_token: token.map(str::to_string),
            proxy_list: vec!["1.2.3.4:80".to_string()],
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            refresh_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_token_selects_webshare() {
        let provider = from_config(&provider_config(Some("tok"))).unwrap();
        assert_eq!(provider.name(), "webshare");
    }

    #[test]
    fn test_static_list_without_token() {
        let provider = from_config(&provider_config(None)).unwrap();
        assert_eq!(provider.name(), "env");
    }
}
