//! News source adapters.
//!
//! Each adapter turns a provider payload into [`RawArticle`] values and maps
//! them through [`RawArticle::into_article`] into the canonical [`Article`].
//! Adapters report failure through [`FetchError`]; deciding what a failed
//! source means for a sync pass is left to the caller.

pub mod feed;
pub mod spaceflight;
pub mod topical;

use std::fmt;

use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Serialize;

pub use crate::fetcher::FetchError;
use feed::{FeedItem, FeedKind};
use spaceflight::ApiArticle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceKind {
    Spaceflight,
    GoogleNews,
    Isro,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Spaceflight => "Spaceflight News API",
            SourceKind::GoogleNews => "Google News",
            SourceKind::Isro => "ISRO News (Google)",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an article came from, with the provider's own id when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Spaceflight { id: i64 },
    GoogleNews,
    Isro,
}

impl Origin {
    pub fn kind(&self) -> SourceKind {
        match self {
            Origin::Spaceflight { .. } => SourceKind::Spaceflight,
            Origin::GoogleNews => SourceKind::GoogleNews,
            Origin::Isro => SourceKind::Isro,
        }
    }
}

/// A normalized article, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub source_name: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub origin: Origin,
}

impl Article {
    pub fn external_id(&self) -> String {
        external_id(&self.origin, &self.url)
    }
}

const SFN_PREFIX: &str = "sfn-";
const GOOGLE_PREFIX: &str = "gn-";
const ISRO_PREFIX: &str = "gn-isro-";

/// Deduplication key for a stored article.
///
/// API articles use their native id. Feed articles have no stable id, so
/// their URL is percent-encoded into the key, which keeps it reversible.
pub fn external_id(origin: &Origin, url: &str) -> String {
    match origin {
        Origin::Spaceflight { id } => format!("{}{}", SFN_PREFIX, id),
        Origin::GoogleNews => format!("{}{}", GOOGLE_PREFIX, urlencoding::encode(url)),
        Origin::Isro => format!("{}{}", ISRO_PREFIX, urlencoding::encode(url)),
    }
}

/// Recover the article URL from a feed-derived external id.
pub fn url_from_external_id(external_id: &str) -> Option<String> {
    let encoded = external_id
        .strip_prefix(ISRO_PREFIX)
        .or_else(|| external_id.strip_prefix(GOOGLE_PREFIX))?;
    urlencoding::decode(encoded).ok().map(|url| url.into_owned())
}

/// Provider payloads before normalization.
#[derive(Debug, Clone)]
pub enum RawArticle {
    Spaceflight(ApiArticle),
    Feed { kind: FeedKind, item: FeedItem },
}

impl RawArticle {
    /// Text the image heuristic matches keywords against.
    pub fn image_context(&self) -> String {
        match self {
            RawArticle::Spaceflight(article) => format!("{} {}", article.title, article.summary),
            RawArticle::Feed { item, .. } => format!(
                "{} {}",
                item.title.as_deref().unwrap_or_default(),
                item.snippet().unwrap_or_default()
            ),
        }
    }

    /// The single mapping from provider shape to [`Article`]. `image_url` is
    /// the already resolved image; `now` stands in for missing dates.
    pub fn into_article(self, image_url: String, now: DateTime<Utc>) -> Article {
        match self {
            RawArticle::Spaceflight(article) => Article {
                title: article.title,
                url: article.url,
                image_url,
                source_name: article.news_site,
                summary: article.summary,
                published_at: article.published_at,
                origin: Origin::Spaceflight { id: article.id },
            },
            RawArticle::Feed { kind, item } => {
                let summary = item
                    .snippet()
                    .unwrap_or_else(|| kind.default_summary().to_string());
                Article {
                    title: item
                        .title
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| kind.default_title().to_string()),
                    url: item.link.unwrap_or_default(),
                    image_url,
                    source_name: kind.source_kind().name().to_string(),
                    summary,
                    published_at: item.published.unwrap_or(now),
                    origin: kind.origin(),
                }
            }
        }
    }
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
