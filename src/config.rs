use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::fetcher::RetryPolicy;
use crate::images::ImageCatalog;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// Background refresh interval in minutes, 0 disables it
    pub refresh_interval: u64,
    /// Age in minutes after which read paths trigger a sync
    pub stale_after_minutes: i64,
    pub retry: RetryConfig,
    pub sources: SourcesConfig,
    pub scrape: ScrapeConfig,
    pub topical: TopicalConfig,
    pub images: ImageCatalog,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: "sqlite:universe_hub.db?mode=rwc".to_string(),
            refresh_interval: 0,
            stale_after_minutes: 120,
            retry: RetryConfig::default(),
            sources: SourcesConfig::default(),
            scrape: ScrapeConfig::default(),
            topical: TopicalConfig::default(),
            images: ImageCatalog::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub timeout_ms: u64,
    /// Delay unit between attempts, multiplied by the attempt number
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout_ms: 20_000,
            backoff_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            timeout: Duration::from_millis(self.timeout_ms),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub spaceflight: SpaceflightConfig,
    pub google_news: FeedConfig,
    pub isro: IsroFeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SpaceflightConfig {
    pub base_url: String,
    /// Page size requested on each sync
    pub sync_limit: u32,
}

impl Default for SpaceflightConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.spaceflightnewsapi.net/v4".to_string(),
            sync_limit: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "https://news.google.com/rss/search?q=space+astronomy&hl=en-US&gl=US&ceid=US:en"
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IsroFeedConfig {
    pub url: String,
    pub max_items: usize,
}

impl Default for IsroFeedConfig {
    fn default() -> Self {
        Self {
            url: "https://news.google.com/rss/search?q=ISRO+space+satellite+launch&hl=en-IN&gl=IN&ceid=IN:en"
                .to_string(),
            max_items: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScrapeConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
        }
    }
}

/// Keyword image provider used by the ISRO feed.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TopicalConfig {
    pub base_url: String,
    /// Lookups are skipped when no key is configured
    pub access_key: Option<String>,
    pub default_query: String,
}

impl Default for TopicalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.unsplash.com".to_string(),
            access_key: None,
            default_query: "isro rocket launch".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TokenConfig {
    pub token: String,
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Editor,
    User,
}

impl Role {
    pub fn can_publish(self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DATABASE_URL` and `UNSPLASH_ACCESS_KEY` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(key) = std::env::var("UNSPLASH_ACCESS_KEY") {
            if !key.is_empty() {
                self.topical.access_key = Some(key);
            }
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stale_after_minutes <= 0 {
            anyhow::bail!("stale_after_minutes must be positive");
        }
        if self.retry.timeout_ms == 0 {
            anyhow::bail!("retry.timeout_ms must be positive");
        }
        self.images.validate().context("invalid [images] section")?;
        Ok(())
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }

    pub fn token(&self, token: &str) -> Option<&TokenConfig> {
        self.auth.tokens.iter().find(|t| t.token == token)
    }
}
