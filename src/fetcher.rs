use log::debug;
use reqwest::{Client, header::CONTENT_LENGTH, header::HeaderMap};
use std::time::Duration;
use url::Url;

use crate::error::Error;
use crate::lane::{Lane, LaneHandle};

/// Size reported when the server does not advertise a `Content-Length`.
pub const UNKNOWN_SIZE: i64 = -1;

/// Retrieves the advertised size of remote documents with HEAD requests.
///
/// All fetches go through a single lane, so documents are requested one at a
/// time even when a whole batch is submitted at once.
pub struct SizeFetcher {
    client: Client,
    lane: Lane,
}

impl SizeFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            lane: Lane::new("fetch"),
        })
    }

    /// Queues a size lookup for `url`.
    ///
    /// The URL is validated before anything is queued, so a malformed one fails
    /// right away without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for empty or unparseable URLs and
    /// [`Error::LaneClosed`] once the fetcher is shut down. Network failures
    /// come back through the handle as [`Error::FetchFailed`].
    pub fn fetch_size(&self, url: &str) -> Result<LaneHandle<i64>, Error> {
        let parsed = parse_url(url)?;
        let client = self.client.clone();
        let url = url.to_string();

        self.lane.submit(move || async move {
            debug!("Requesting headers of {url}");

            // The response is dropped before returning, which closes the connection
            let response = client
                .head(parsed)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|source| Error::FetchFailed {
                    url: url.clone(),
                    source,
                })?;

            Ok(content_length(response.headers()))
        })
    }

    pub async fn shutdown(&self) {
        self.lane.shutdown().await;
    }
}

fn parse_url(url: &str) -> Result<Url, Error> {
    if url.trim().is_empty() {
        return Err(Error::InvalidUrl {
            url: url.to_string(),
            reason: "URL is empty".to_string(),
        });
    }

    Url::parse(url).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Reads the raw `Content-Length` header. `Response::content_length` can't be
/// used here, it reports the (empty) body of a HEAD response.
///
/// Anything that isn't a non-negative length fitting in an `i64` counts as
/// not reported.
fn content_length(headers: &HeaderMap) -> i64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .and_then(|len| i64::try_from(len).ok())
        .unwrap_or(UNKNOWN_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> SizeFetcher {
        SizeFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_reports_advertised_size() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/syllabus.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1234]))
            .expect(1)
            .mount(&server)
            .await;

        let size = fetcher()
            .fetch_size(&format!("{}/syllabus.pdf", server.uri()))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(size, 1234);
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/gone.doc", server.uri());
        let result = fetcher().fetch_size(&url).unwrap().join().await;

        assert!(matches!(result, Err(Error::FetchFailed { url: u, .. }) if u == url));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_failure() {
        let result = fetcher()
            .fetch_size("http://127.0.0.1:1/doc.pdf")
            .unwrap()
            .join()
            .await;

        assert!(matches!(result, Err(Error::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_urls_fail_before_queueing() {
        let fetcher = fetcher();

        assert!(matches!(
            fetcher.fetch_size(""),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            fetcher.fetch_size("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_after_shutdown_is_rejected() {
        let fetcher = fetcher();
        fetcher.shutdown().await;

        assert!(matches!(
            fetcher.fetch_size("https://example.com/doc.pdf"),
            Err(Error::LaneClosed("fetch"))
        ));
    }

    #[test]
    fn test_content_length_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), UNKNOWN_SIZE);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("4096"));
        assert_eq!(content_length(&headers), 4096);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(content_length(&headers), UNKNOWN_SIZE);
    }

    #[test]
    fn test_out_of_range_content_length_is_unknown() {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("-5"));
        assert_eq!(content_length(&headers), UNKNOWN_SIZE);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("-1"));
        assert_eq!(content_length(&headers), UNKNOWN_SIZE);

        // Larger than i64::MAX
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("9223372036854775808"));
        assert_eq!(content_length(&headers), UNKNOWN_SIZE);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("9223372036854775807"));
        assert_eq!(content_length(&headers), i64::MAX);
    }
}
