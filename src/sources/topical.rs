use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::TopicalConfig;
use crate::fetcher::{send_with_retry, RetryPolicy};
use crate::images::ImageResolver;

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: Option<String>,
    full: Option<String>,
    small: Option<String>,
}

/// `/photos/random` answers with one photo, or a list when `count` is sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RandomPhotos {
    Many(Vec<Photo>),
    One(Photo),
}

impl RandomPhotos {
    fn first_url(self) -> Option<String> {
        let photo = match self {
            RandomPhotos::One(photo) => photo,
            RandomPhotos::Many(photos) => photos.into_iter().next()?,
        };
        photo.urls.regular.or(photo.urls.full).or(photo.urls.small)
    }
}

/// Keyword-driven stock photo lookup (Unsplash).
pub struct TopicalImages {
    client: Client,
    base_url: String,
    access_key: Option<String>,
    default_query: String,
    timeout: Duration,
    resolver: Arc<ImageResolver>,
}

impl TopicalImages {
    pub fn new(
        client: Client,
        config: &TopicalConfig,
        timeout: Duration,
        resolver: Arc<ImageResolver>,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone().filter(|k| !k.is_empty()),
            default_query: config.default_query.clone(),
            timeout,
            resolver,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.access_key.is_some()
    }

    /// The catalog keyword found in `text`, else the default query.
    pub fn query_for(&self, text: &str) -> String {
        self.resolver
            .catalog()
            .keyword_for(text)
            .map(|entry| entry.keyword.clone())
            .unwrap_or_else(|| self.default_query.clone())
    }

    pub async fn lookup(&self, text: &str) -> Option<String> {
        let key = self.access_key.as_deref()?;
        let query = self.query_for(text);
        let url = format!("{}/photos/random", self.base_url);
        let policy = RetryPolicy::single(self.timeout);

        let response = match send_with_retry(&url, &policy, || {
            self.client.get(&url).query(&[
                ("client_id", key),
                ("query", query.as_str()),
                ("orientation", "landscape"),
            ])
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Topical image lookup failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Topical image lookup returned {}", response.status());
            return None;
        }

        match response.json::<RandomPhotos>().await {
            Ok(photos) => photos.first_url(),
            Err(e) => {
                debug!("Topical image response unreadable: {}", e);
                None
            }
        }
    }
}
