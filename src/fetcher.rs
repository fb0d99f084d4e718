use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{header::USER_AGENT, Client, RequestBuilder, Response, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::ScrapeConfig;

static OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"]"#).expect("og:image selector is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("{url} responded with {status}")]
    Status { url: String, status: StatusCode },
    #[error("could not parse response from {url}: {reason}")]
    Parse { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Bound on each attempt
    pub timeout: Duration,
    /// Sleep before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn single(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            timeout,
            backoff: Duration::ZERO,
        }
    }
}

pub fn build_client() -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent("UniverseHub/1.0 (News Sync)")
        .build()?;
    Ok(client)
}

/// GET `url`, retrying transport errors and timeouts.
///
/// Any HTTP response, whatever its status, ends the loop and is returned as
/// is. Only when the final attempt fails at the transport level is an error
/// returned.
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Response, FetchError> {
    send_with_retry(url, policy, || client.get(url)).await
}

/// Like [`fetch_with_retry`] with a caller-built request, rebuilt per attempt.
pub async fn send_with_retry<F>(
    url: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<Response, FetchError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        // Dropping the timed-out future aborts the in-flight request.
        let error = match tokio::time::timeout(policy.timeout, build().send()).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(source)) => FetchError::Http {
                url: url.to_string(),
                source,
            },
            Err(_) => FetchError::Timeout {
                url: url.to_string(),
                timeout: policy.timeout,
            },
        };

        if attempt > policy.max_retries {
            return Err(error);
        }

        let delay = policy.backoff * attempt;
        warn!(
            url,
            attempt,
            error = %error,
            "Fetch attempt failed, retrying in {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// Scrape the Open Graph image of an article page. Every failure, network
/// or markup, yields `None`.
pub async fn og_image(client: &Client, page_url: &str, scrape: &ScrapeConfig) -> Option<String> {
    let timeout = Duration::from_millis(scrape.timeout_ms);
    let policy = RetryPolicy::single(timeout);

    let response = match send_with_retry(page_url, &policy, || {
        client
            .get(page_url)
            .header(USER_AGENT, scrape.user_agent.as_str())
    })
    .await
    {
        Ok(response) => response,
        Err(e) => {
            debug!("Open Graph fetch failed: {}", e);
            return None;
        }
    };

    if !response.status().is_success() {
        debug!("Open Graph fetch of {} returned {}", page_url, response.status());
        return None;
    }

    let html = match tokio::time::timeout(timeout, response.text()).await {
        Ok(Ok(html)) => html,
        _ => {
            debug!("Could not read page body for {}", page_url);
            return None;
        }
    };

    extract_og_image(&html, page_url)
}

/// Read `<meta property="og:image">`, resolving relative values against the
/// page URL.
pub fn extract_og_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let content = document
        .select(&OG_IMAGE)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())?;

    if content.starts_with("http") {
        return Some(content.to_string());
    }

    let base = Url::parse(page_url).ok()?;
    base.join(content).ok().map(|u| u.to_string())
}
