use std::sync::Arc;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tracing::info;

use super::topical::TopicalImages;
use super::{html_to_text, Article, FetchError, Origin, RawArticle, SourceKind};
use crate::config::{FeedConfig, IsroFeedConfig, ScrapeConfig};
use crate::fetcher::{fetch_with_retry, og_image, RetryPolicy};
use crate::images::ImageResolver;

static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).expect("img pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    GoogleNews,
    Isro,
}

impl FeedKind {
    pub fn source_kind(self) -> SourceKind {
        match self {
            FeedKind::GoogleNews => SourceKind::GoogleNews,
            FeedKind::Isro => SourceKind::Isro,
        }
    }

    pub fn origin(self) -> Origin {
        match self {
            FeedKind::GoogleNews => Origin::GoogleNews,
            FeedKind::Isro => Origin::Isro,
        }
    }

    pub fn default_title(self) -> &'static str {
        match self {
            FeedKind::GoogleNews => "Space News",
            FeedKind::Isro => "ISRO News",
        }
    }

    pub fn default_summary(self) -> &'static str {
        match self {
            FeedKind::GoogleNews => "Click to read more about this story.",
            FeedKind::Isro => "Latest ISRO updates",
        }
    }
}

/// The fields of a feed entry the pipeline cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Full content when the feed has it, else the description
    pub html: Option<String>,
    pub media_content_url: Option<String>,
    pub media_thumbnail_url: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn from_entry(entry: Entry) -> Self {
        let media_content_url = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

        let media_thumbnail_url = entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| t.image.uri.clone())
            .find(|uri| !uri.is_empty());

        let html = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .filter(|h| !h.trim().is_empty());

        Self {
            title: entry.title.map(|t| t.content),
            link: entry.links.first().map(|l| l.href.clone()),
            html,
            media_content_url,
            media_thumbnail_url,
            published: entry.published.or(entry.updated),
        }
    }

    /// Plain-text rendering of the item body.
    pub fn snippet(&self) -> Option<String> {
        self.html
            .as_deref()
            .map(html_to_text)
            .filter(|text| !text.is_empty())
    }

    /// Image carried by the feed itself: media content, then media
    /// thumbnail, then the first `<img>` in the body.
    pub fn embedded_image(&self) -> Option<String> {
        self.media_content_url
            .clone()
            .or_else(|| self.media_thumbnail_url.clone())
            .or_else(|| {
                let html = self.html.as_deref()?;
                IMG_SRC.captures(html).map(|caps| caps[1].to_string())
            })
    }
}

pub fn parse_items(bytes: &[u8]) -> Result<Vec<FeedItem>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(FeedItem::from_entry).collect())
}

/// RSS/Atom adapter for the Google News searches.
///
/// The general feed tries feed-embedded images, then the article's Open
/// Graph image. The ISRO feed inserts a topical stock-photo lookup between
/// those two and caps the number of items.
pub struct FeedSource {
    kind: FeedKind,
    url: String,
    max_items: Option<usize>,
    client: Client,
    policy: RetryPolicy,
    scrape: ScrapeConfig,
    resolver: Arc<ImageResolver>,
    topical: Option<TopicalImages>,
}

impl FeedSource {
    pub fn google_news(
        client: Client,
        config: &FeedConfig,
        policy: RetryPolicy,
        scrape: ScrapeConfig,
        resolver: Arc<ImageResolver>,
    ) -> Self {
        Self {
            kind: FeedKind::GoogleNews,
            url: config.url.clone(),
            max_items: None,
            client,
            policy,
            scrape,
            resolver,
            topical: None,
        }
    }

    pub fn isro(
        client: Client,
        config: &IsroFeedConfig,
        policy: RetryPolicy,
        scrape: ScrapeConfig,
        resolver: Arc<ImageResolver>,
        topical: TopicalImages,
    ) -> Self {
        Self {
            kind: FeedKind::Isro,
            url: config.url.clone(),
            max_items: Some(config.max_items),
            client,
            policy,
            scrape,
            resolver,
            topical: Some(topical),
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Article>, FetchError> {
        let response = fetch_with_retry(&self.client, &self.url, &self.policy).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let bytes = response.bytes().await.map_err(|source| FetchError::Http {
            url: self.url.clone(),
            source,
        })?;

        let mut items = parse_items(&bytes).map_err(|e| FetchError::Parse {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        if let Some(max) = self.max_items {
            items.truncate(max);
        }

        let articles = join_all(items.into_iter().map(|item| self.to_article(item))).await;

        info!(
            "Fetched {} articles from {}",
            articles.len(),
            self.kind.source_kind()
        );
        Ok(articles)
    }

    async fn to_article(&self, item: FeedItem) -> Article {
        let candidate = self.candidate_image(&item).await;
        let raw = RawArticle::Feed {
            kind: self.kind,
            item,
        };
        let image_url = self.resolver.resolve(candidate.as_deref(), &raw.image_context());
        raw.into_article(image_url, Utc::now())
    }

    /// First image any tier produces. The resolver still validates it.
    async fn candidate_image(&self, item: &FeedItem) -> Option<String> {
        if let Some(image) = item.embedded_image() {
            return Some(image);
        }

        if let Some(topical) = &self.topical {
            let context = format!(
                "{} {}",
                item.title.as_deref().unwrap_or_default(),
                item.snippet().unwrap_or_default()
            );
            if let Some(image) = topical.lookup(&context).await {
                return Some(image);
            }
        }

        let link = item.link.as_deref().filter(|l| !l.is_empty())?;
        og_image(&self.client, link, &self.scrape).await
    }
}
