use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Proxy};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::models::FetchedItem;
use super::parser::parse_feed;
use super::FeedSource;
use crate::config::FetchConfig;
use crate::{Error, Result};

const FEED_USER_AGENT: &str = concat!("rsshub/", env!("CARGO_PKG_VERSION"));
const FEED_ACCEPT: &str =
    "application/rss+xml,application/atom+xml,application/xml;q=0.9,text/xml;q=0.8,*/*;q=0.5";

/// Check that a feed URL is an absolute http(s) URL with a host
pub fn validate_feed_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidArgument(format!(
            "unsupported scheme '{}' in feed URL: {}",
            url.scheme(),
            raw
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidArgument(format!("feed URL has no host: {}", raw)));
    }

    Ok(url)
}

/// HTTP feed fetcher
pub struct FeedFetcher {
    client: Client,
    max_feed_bytes: usize,
}

impl FeedFetcher {
    /// Create a new feed fetcher with configuration
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Self::build_client(config.request_timeout_secs, &config.proxy_url)?;

        Ok(Self {
            client,
            max_feed_bytes: config.max_feed_bytes,
        })
    }

    /// Build HTTP client with optional proxy
    fn build_client(timeout_secs: u64, proxy_url: &Option<String>) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
        headers.insert(USER_AGENT, HeaderValue::from_static(FEED_USER_AGENT));

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(ref proxy) = proxy_url {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
            tracing::info!("Using HTTP proxy for feed fetching");
        }

        builder.build().map_err(Error::Http)
    }

    /// Download the raw feed body
    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::FeedParse(format!("HTTP {} for URL: {}", status, url)));
        }

        if let Some(len) = response.content_length() {
            self.ensure_content_size(len as usize, url)?;
        }

        let body = response.bytes().await?;
        self.ensure_content_size(body.len(), url)?;
        Ok(body)
    }

    fn ensure_content_size(&self, size: usize, url: &str) -> Result<()> {
        if size > self.max_feed_bytes {
            return Err(Error::FeedParse(format!(
                "Feed too large ({} bytes) for URL: {}",
                size, url
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<FetchedItem>> {
        tracing::debug!("Fetching feed from: {}", url);

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = self.download(url) => body?,
        };

        parse_feed(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Local</title>
    <link>http://localhost</link>
    <description>Served by the test</description>
    <item>
      <title>Hello</title>
      <link>http://localhost/hello</link>
      <description>World</description>
      <pubDate>Mon, 02 Jan 2006 15:04:05 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    /// Serve one canned HTTP response on a local port and return the feed URL
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/rss+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });

        format!("http://{}/feed.xml", addr)
    }

    #[test]
    fn test_validate_feed_url() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("  http://example.com/rss  ").is_ok());

        assert!(matches!(
            validate_feed_url("ftp://example.com/feed.xml"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(validate_feed_url("not a url"), Err(Error::UrlParse(_))));
        assert!(validate_feed_url("file:///etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_fetch_honors_cancelled_token() {
        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        // 192.0.2.0/24 is reserved for documentation and never routes
        let result = fetcher.fetch("http://192.0.2.1/feed.xml", &token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_error() {
        let url = serve_once("500 Internal Server Error", "boom").await;
        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();

        let result = fetcher.fetch(&url, &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::FeedParse(_))), "got {:?}", result);
    }

    #[tokio::test]
    async fn test_fetch_parses_served_feed() {
        let url = serve_once("200 OK", SAMPLE_RSS).await;
        let fetcher = FeedFetcher::new(&FetchConfig::default()).unwrap();

        let items = fetcher.fetch(&url, &CancellationToken::new()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Hello");
        assert_eq!(items[0].link, "http://localhost/hello");
        assert_eq!(items[0].description, "World");
        assert_eq!(items[0].published_at.to_rfc3339(), "2006-01-02T15:04:05+00:00");
    }

    #[test]
    fn test_content_size_limit() {
        let config = FetchConfig {
            max_feed_bytes: 10,
            ..FetchConfig::default()
        };
        let fetcher = FeedFetcher::new(&config).unwrap();
        assert!(fetcher.ensure_content_size(10, "u").is_ok());
        assert!(fetcher.ensure_content_size(11, "u").is_err());
    }
}
