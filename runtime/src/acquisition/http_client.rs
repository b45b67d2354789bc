//! Async HTTP fetcher wrapping reqwest.
//!
//! Not a browser. Retries on 5xx and backs off on 429; transport errors and
//! timeouts are returned immediately so that one dead URL never stalls a
//! crawl.

use anyhow::{Context, Result};
use std::time::Duration;

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Response headers (selected subset).
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client for robots, sitemaps, raw page fetches, and the classifier.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let ua = concat!(
            "Mozilla/5.0 (compatible; sitegauge/",
            env!("CARGO_PKG_VERSION"),
            "; +https://github.com/sitegauge/sitegauge)"
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    /// GET with retry on 5xx and backoff on 429.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        match self.get_inner(&self.client, url, timeout).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e:#}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url, timeout).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut retries = 0u32;
        let max_retries = 2;

        loop {
            let r = client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .with_context(|| format!("GET {url}"))?;

            let status = r.status().as_u16();
            let final_url = r.url().to_string();

            if status >= 500 && retries < max_retries {
                retries += 1;
                let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == 429 && retries < max_retries {
                retries += 1;
                let retry_after = r
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(2);
                tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                continue;
            }

            let headers: Vec<(String, String)> = r
                .headers()
                .iter()
                .filter(|(k, _)| {
                    matches!(
                        k.as_str(),
                        "content-type" | "content-language" | "last-modified" | "x-robots-tag"
                    )
                })
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let body = r.text().await.unwrap_or_default();

            return Ok(HttpResponse {
                url: url.to_string(),
                final_url,
                status,
                headers,
                body,
            });
        }
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B, T>(&self, url: &str, body: &B, timeout: Duration) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let r = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = r.status();
        if !status.is_success() {
            anyhow::bail!("POST {url} returned {status}");
        }
        r.json::<T>()
            .await
            .with_context(|| format!("decoding response from {url}"))
    }

    /// Parallel GETs with bounded concurrency. Results keep input order.
    pub async fn get_many(
        &self,
        urls: &[String],
        concurrency: usize,
        timeout: Duration,
    ) -> Vec<Result<HttpResponse>> {
        use futures::stream::{self, StreamExt};

        let client = self.clone();
        stream::iter(urls.to_vec())
            .map(move |url: String| {
                let client = client.clone();
                async move { client.get(&url, timeout).await }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_returns_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("User-agent: *\nDisallow: /private", "text/plain"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let resp = client
            .get(&format!("{}/robots.txt", server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert!(resp.body.contains("Disallow"));
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_get_many_keeps_order() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c"] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(name))
                .mount(&server)
                .await;
        }
        let urls: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|n| format!("{}/{n}", server.uri()))
            .collect();
        let client = HttpClient::new(Duration::from_secs(5));
        let bodies: Vec<String> = client
            .get_many(&urls, 3, Duration::from_secs(5))
            .await
            .into_iter()
            .map(|r| r.unwrap().body)
            .collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let client = HttpClient::new(Duration::from_secs(2));
        let result = client
            .get("http://127.0.0.1:9/unreachable", Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }
}
