use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::{Article, FetchError, RawArticle};
use crate::config::SpaceflightConfig;
use crate::fetcher::{fetch_with_retry, RetryPolicy};
use crate::images::ImageResolver;

/// One page of the `/articles` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPage {
    #[serde(default)]
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<ApiArticle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiArticle {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub news_site: String,
    #[serde(default)]
    pub summary: String,
    pub published_at: DateTime<Utc>,
}

/// Spaceflight News API adapter.
pub struct SpaceflightSource {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    resolver: Arc<ImageResolver>,
}

impl SpaceflightSource {
    pub fn new(
        client: Client,
        config: &SpaceflightConfig,
        policy: RetryPolicy,
        resolver: Arc<ImageResolver>,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            policy,
            resolver,
        }
    }

    pub fn articles_url(&self, limit: u32, offset: u32) -> String {
        format!("{}/articles?limit={}&offset={}", self.base_url, limit, offset)
    }

    pub async fn fetch_page(&self, limit: u32, offset: u32) -> Result<ApiPage, FetchError> {
        let url = self.articles_url(limit, offset);
        let response = fetch_with_retry(&self.client, &url, &self.policy).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        response
            .json::<ApiPage>()
            .await
            .map_err(|e| FetchError::Parse {
                url,
                reason: e.to_string(),
            })
    }

    pub async fn fetch(&self, limit: u32, offset: u32) -> Result<Vec<Article>, FetchError> {
        let page = self.fetch_page(limit, offset).await?;
        let now = Utc::now();

        let articles: Vec<Article> = page
            .results
            .into_iter()
            .map(|api_article| {
                let candidate = api_article.image_url.clone();
                let raw = RawArticle::Spaceflight(api_article);
                let image_url = self.resolver.resolve(candidate.as_deref(), &raw.image_context());
                raw.into_article(image_url, now)
            })
            .collect();

        info!("Fetched {} articles from the Spaceflight News API", articles.len());
        Ok(articles)
    }
}
