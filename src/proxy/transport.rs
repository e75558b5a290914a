//! HTTP CONNECT tunnelling through pooled proxies

use std::io;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::health::ProbeCheck;
use crate::config::ProbeTargetConfig;
use crate::models::{ErrorKind, ProxyEndpoint};

/// Open a CONNECT tunnel to `target_host:target_port` through `endpoint`
pub async fn open_tunnel(
    endpoint: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, ErrorKind> {
    let mut stream = TcpStream::connect(&endpoint.connect_addr)
        .await
        .map_err(|e| classify_io_error(&e))?;

    let authority = format_connect_authority(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let Some(creds) = &endpoint.credentials {
        let credentials = format!("{}:{}", creds.username, creds.password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        ));
    }

    request.push_str("\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| classify_io_error(&e))?;

    let mut response = vec![0u8; 1024];
    let n = stream
        .read(&mut response)
        .await
        .map_err(|e| classify_io_error(&e))?;
    if n == 0 {
        debug!("Proxy {} closed the connection before replying", endpoint.address);
        return Err(ErrorKind::ConnectionRefused);
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    let status_line = response_str.lines().next().unwrap_or("");
    classify_connect_status(status_line).map_err(|kind| {
        debug!("CONNECT through {} failed: {}", endpoint.address, status_line);
        kind
    })?;

    Ok(stream)
}

/// Map a socket error onto the failure taxonomy
pub(crate) fn classify_io_error(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::AddrNotAvailable => ErrorKind::ConnectionRefused,
        _ => ErrorKind::UpstreamOtherError,
    }
}

/// Check the status line of a CONNECT reply
fn classify_connect_status(status_line: &str) -> std::result::Result<(), ErrorKind> {
    let code = status_line
        .strip_prefix("HTTP/1.1 ")
        .or_else(|| status_line.strip_prefix("HTTP/1.0 "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|code| code.parse::<u16>().ok());

    match code {
        Some(200) => Ok(()),
        Some(429) => Err(ErrorKind::UpstreamRateLimited),
        _ => Err(ErrorKind::UpstreamOtherError),
    }
}

fn format_connect_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Probe that opens a CONNECT tunnel to a known target.
///
/// Validates both connectivity to the proxy and its ability to reach the
/// target.
#[derive(Debug, Clone)]
pub struct ConnectCheck {
    target_host: String,
    target_port: u16,
}

impl ConnectCheck {
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
        }
    }

    pub fn from_config(target: &ProbeTargetConfig) -> Self {
        Self::new(target.host.clone(), target.port)
    }
}

#[async_trait]
impl ProbeCheck for ConnectCheck {
    async fn check(&self, endpoint: &ProxyEndpoint) -> std::result::Result<(), ErrorKind> {
        open_tunnel(endpoint, &self.target_host, self.target_port)
            .await
            .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credentials;

    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    /// Fake proxy that answers one CONNECT request with `reply` and hands
    /// back the request it received
    async fn fake_proxy(reply: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let n = client.read(&mut buf).await.unwrap();
            client.write_all(reply).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (addr, task)
    }

    #[test]
    fn test_connect_status_classification() {
        assert_eq!(classify_connect_status("HTTP/1.1 200 Connection Established"), Ok(()));
        assert_eq!(classify_connect_status("HTTP/1.0 200 OK"), Ok(()));
        assert_eq!(
            classify_connect_status("HTTP/1.1 429 Too Many Requests"),
            Err(ErrorKind::UpstreamRateLimited)
        );
        assert_eq!(
            classify_connect_status("HTTP/1.1 407 Proxy Authentication Required"),
            Err(ErrorKind::UpstreamOtherError)
        );
        assert_eq!(classify_connect_status("garbage"), Err(ErrorKind::UpstreamOtherError));
    }

    #[test]
    fn test_connect_authority_brackets_ipv6() {
        assert_eq!(format_connect_authority("::1", 443), "[::1]:443");
        assert_eq!(format_connect_authority("www.google.com", 443), "www.google.com:443");
    }

    #[tokio::test]
    async fn test_tunnel_sends_basic_auth() {
        let (addr, proxy_task) = fake_proxy(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
        let endpoint = ProxyEndpoint::new(addr, Some(Credentials::new("user", "pass")));

        let tunnel = timeout(
            Duration::from_secs(2),
            open_tunnel(&endpoint, "www.google.com", 443),
        )
        .await
        .unwrap();
        assert!(tunnel.is_ok());

        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("CONNECT www.google.com:443 HTTP/1.1\r\n"));
        assert!(request.contains(&format!(
            "Proxy-Authorization: Basic {}",
            BASE64.encode("user:pass")
        )));
    }

    #[tokio::test]
    async fn test_tunnel_without_credentials_skips_auth() {
        let (addr, proxy_task) = fake_proxy(b"HTTP/1.1 200 OK\r\n\r\n").await;
        let endpoint = ProxyEndpoint::new(addr, None);

        open_tunnel(&endpoint, "example.com", 80).await.unwrap();
        let request = proxy_task.await.unwrap();
        assert!(!request.contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn test_connect_check_maps_rate_limit() {
        let (addr, _proxy_task) = fake_proxy(b"HTTP/1.1 429 Too Many Requests\r\n\r\n").await;
        let check = ConnectCheck::new("www.google.com", 443);

        let result = check.check(&ProxyEndpoint::new(addr, None)).await;
        assert_eq!(result, Err(ErrorKind::UpstreamRateLimited));
    }

    #[tokio::test]
    async fn test_connect_check_refused() {
        // Grab a free port, then close it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let check = ConnectCheck::new("www.google.com", 443);
        let result = check.check(&ProxyEndpoint::new(addr, None)).await;
        assert_eq!(result, Err(ErrorKind::ConnectionRefused));
    }
}
