//! Concurrent retrieval and merging of exit list sources.

use crate::config::HttpConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Set of known exit node addresses.
///
/// Tokens are kept as published, without any address validation. Payloads
/// are decoded as UTF-8 first, so invalid byte sequences inside a token are
/// replaced with U+FFFD.
pub type AddressSet = HashSet<String>;

/// Retrieves the raw payload of a single exit list source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the body published at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`SourceFetcher`] backed by a shared `reqwest` client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the configured timeout and user agent.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// An exit list endpoint and the payload it returned in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Endpoint URL.
    pub url: String,
    /// Body from the latest fetch, `None` if it failed.
    pub payload: Option<Vec<u8>>,
}

impl Source {
    /// A source that has not been fetched yet.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload: None,
        }
    }
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Sources attempted.
    pub sources: usize,
    /// Sources that returned a payload.
    pub succeeded: usize,
    /// Distinct addresses after merging.
    pub addresses: usize,
}

/// Fetch every source in parallel, waiting for all of them to settle.
///
/// Each request fills only its own slot, so the returned sources line up
/// with `urls`. Failures leave `payload` empty and are logged, not returned.
pub async fn fetch_sources(fetcher: &dyn SourceFetcher, urls: &[String]) -> Vec<Source> {
    let requests = urls.iter().map(|url| async move {
        let mut source = Source::new(url.as_str());
        match fetcher.fetch(url).await {
            Ok(body) => {
                debug!(source = %url, bytes = body.len(), "Fetched exit list");
                source.payload = Some(body);
            }
            Err(e) => {
                warn!(source = %url, error = %e, "Failed to fetch exit list");
            }
        }
        source
    });

    join_all(requests).await
}

/// Merge fetched payloads into one deduplicated address set.
pub fn merge_sources(sources: &[Source]) -> AddressSet {
    sources
        .iter()
        .filter_map(|source| source.payload.as_deref())
        .flat_map(|payload| {
            String::from_utf8_lossy(payload)
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run a full fetch-and-merge cycle over `urls`.
pub async fn collect(
    fetcher: &dyn SourceFetcher,
    urls: &[String],
) -> (AddressSet, RefreshOutcome) {
    let sources = fetch_sources(fetcher, urls).await;
    let addresses = merge_sources(&sources);

    let outcome = RefreshOutcome {
        sources: sources.len(),
        succeeded: sources.iter().filter(|s| s.payload.is_some()).count(),
        addresses: addresses.len(),
    };

    (addresses, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_http_config() -> HttpConfig {
        HttpConfig {
            timeout_ms: 500,
            user_agent: "tortool-test/1.0".to_string(),
        }
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_merge_splits_on_whitespace() {
        let sources = vec![Source {
            url: "a".to_string(),
            payload: Some(b"1.1.1.1\n2.2.2.2  3.3.3.3\t4.4.4.4\r\n\n".to_vec()),
        }];

        let merged = merge_sources(&sources);
        assert_eq!(merged.len(), 4);
        assert!(merged.contains("3.3.3.3"));
        assert!(merged.contains("4.4.4.4"));
    }

    #[test]
    fn test_merge_dedups_across_sources() {
        let sources = vec![
            Source {
                url: "a".to_string(),
                payload: Some(b"1.1.1.1\n2.2.2.2\n".to_vec()),
            },
            Source {
                url: "b".to_string(),
                payload: Some(b"2.2.2.2\n3.3.3.3\n".to_vec()),
            },
        ];

        let merged = merge_sources(&sources);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_skips_failed_sources() {
        let sources = vec![
            Source::new("a"),
            Source {
                url: "b".to_string(),
                payload: Some(b"5.5.5.5".to_vec()),
            },
        ];

        let merged = merge_sources(&sources);
        assert_eq!(merged.len(), 1);
        assert!(merged.contains("5.5.5.5"));
    }

    #[test]
    fn test_merge_keeps_tokens_unvalidated() {
        let sources = vec![Source {
            url: "a".to_string(),
            payload: Some(b"not-an-ip\n::1\n".to_vec()),
        }];

        let merged = merge_sources(&sources);
        assert!(merged.contains("not-an-ip"));
        assert!(merged.contains("::1"));
    }

    #[test]
    fn test_merge_replaces_invalid_utf8() {
        let sources = vec![Source {
            url: "a".to_string(),
            payload: Some(b"1.1.1.1\n1\xff\n".to_vec()),
        }];

        let merged = merge_sources(&sources);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains("1.1.1.1"));
        assert!(merged.contains("1\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exits"))
            .and(header("user-agent", "tortool-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4\n"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        let body = fetcher.fetch(&format!("{}/exits", server.uri())).await.unwrap();
        assert_eq!(body, b"1.2.3.4\n");
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("9.9.9.9"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        let result = fetcher.fetch(&server.uri()).await;
        assert!(matches!(result, Err(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn test_http_fetcher_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("1.2.3.4")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        let result = fetcher.fetch(&server.uri()).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_collect_merges_all_sources() {
        let server = MockServer::start().await;
        serve(&server, "/a", "111.111.111.111\n222.222.222.222\n").await;
        serve(&server, "/b", "333.333.333.333\n444.444.444.444\n").await;

        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        let urls = vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())];

        let (addresses, outcome) = collect(&fetcher, &urls).await;
        assert_eq!(addresses.len(), 4);
        assert_eq!(
            outcome,
            RefreshOutcome {
                sources: 2,
                succeeded: 2,
                addresses: 4
            }
        );
    }

    #[tokio::test]
    async fn test_collect_tolerates_unreachable_source() {
        let server = MockServer::start().await;
        serve(&server, "/good", "10.0.0.1\n").await;

        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        // Nothing listens on the discard port.
        let urls = vec![
            "http://127.0.0.1:9/exits".to_string(),
            format!("{}/good", server.uri()),
        ];

        let sources = fetch_sources(&fetcher, &urls).await;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].url, urls[0]);
        assert!(sources[0].payload.is_none());
        assert_eq!(sources[1].payload.as_deref(), Some(&b"10.0.0.1\n"[..]));

        let (addresses, outcome) = collect(&fetcher, &urls).await;
        assert_eq!(addresses.into_iter().collect::<Vec<_>>(), vec!["10.0.0.1"]);
        assert_eq!(outcome.succeeded, 1);
    }

    #[tokio::test]
    async fn test_collect_all_failed_is_empty() {
        let fetcher = HttpFetcher::new(&test_http_config()).unwrap();
        let urls = vec!["http://127.0.0.1:9/exits".to_string()];

        let (addresses, outcome) = collect(&fetcher, &urls).await;
        assert!(addresses.is_empty());
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.sources, 1);
    }
}
