use std::time::Duration;

use reqwest::Client;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort online check against the configured backend URL.
///
/// Without a URL there is nothing to reach, so the device counts as online.
/// Any HTTP response, whatever its status, means the network is up.
pub async fn probe(http: &Client, url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return true;
    }

    match http.head(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(url, error = %e, "connectivity probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn empty_url_counts_as_online() {
        assert!(probe(&Client::new(), "  ").await);
    }

    #[tokio::test]
    async fn any_status_counts_as_online() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(probe(&Client::new(), &server.uri()).await);
    }

    #[tokio::test]
    async fn unreachable_host_is_offline() {
        // Nothing listens on port 1.
        assert!(!probe(&Client::new(), "http://127.0.0.1:1").await);
    }
}
