use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::images::ImageResolver;
use crate::sources::feed::FeedSource;
use crate::sources::spaceflight::SpaceflightSource;
use crate::sources::topical::TopicalImages;
use crate::sources::{Article, FetchError, SourceKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub fetched: usize,
    pub upserted: usize,
    /// Sources whose fetch failed during the pass
    pub degraded: Vec<SourceKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh,
    Refreshed(SyncOutcome),
    RefreshFailed,
}

/// True when nothing is stored yet, or the newest touch is older than
/// `threshold`. Exactly `threshold` old still counts as fresh.
pub fn is_stale(
    latest_updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> bool {
    match latest_updated_at {
        None => true,
        Some(latest) => now - latest > threshold,
    }
}

pub struct NewsSync {
    db: Arc<Database>,
    spaceflight: SpaceflightSource,
    google_news: FeedSource,
    isro: FeedSource,
    sync_limit: u32,
    stale_after: chrono::Duration,
    /// Held for the whole pass; released even when the pass is dropped
    syncing: Mutex<()>,
}

impl NewsSync {
    pub fn new(
        db: Arc<Database>,
        config: &Config,
        client: Client,
        resolver: Arc<ImageResolver>,
    ) -> Self {
        let policy = config.retry.policy();
        let sources = &config.sources;

        let topical = TopicalImages::new(
            client.clone(),
            &config.topical,
            Duration::from_millis(config.scrape.timeout_ms),
            resolver.clone(),
        );

        Self {
            db,
            spaceflight: SpaceflightSource::new(
                client.clone(),
                &sources.spaceflight,
                policy.clone(),
                resolver.clone(),
            ),
            google_news: FeedSource::google_news(
                client.clone(),
                &sources.google_news,
                policy.clone(),
                config.scrape.clone(),
                resolver.clone(),
            ),
            isro: FeedSource::isro(
                client,
                &sources.isro,
                policy,
                config.scrape.clone(),
                resolver,
                topical,
            ),
            sync_limit: sources.spaceflight.sync_limit,
            stale_after: config.stale_after(),
            syncing: Mutex::new(()),
        }
    }

    pub fn spaceflight(&self) -> &SpaceflightSource {
        &self.spaceflight
    }

    pub fn google_news(&self) -> &FeedSource {
        &self.google_news
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.try_lock().is_err()
    }

    /// Run one pass over every source and upsert what came back.
    ///
    /// A failed source only shrinks the pass; a storage failure aborts it.
    pub async fn sync(&self) -> anyhow::Result<SyncOutcome> {
        let Ok(_running) = self.syncing.try_lock() else {
            info!("Sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        self.do_sync().await.map(SyncOutcome::Completed)
    }

    async fn do_sync(&self) -> anyhow::Result<SyncReport> {
        info!("Starting news sync");

        let (spaceflight, google_news, isro) = tokio::join!(
            self.spaceflight.fetch(self.sync_limit, 0),
            self.google_news.fetch(),
            self.isro.fetch(),
        );

        let mut report = SyncReport::default();
        let mut articles = Vec::new();
        for (kind, result) in [
            (SourceKind::Spaceflight, spaceflight),
            (SourceKind::GoogleNews, google_news),
            (SourceKind::Isro, isro),
        ] {
            articles.extend(collect(kind, result, &mut report.degraded));
        }
        report.fetched = articles.len();

        let now = Utc::now();
        for article in &articles {
            self.db
                .upsert_news(&article.external_id(), article, now)
                .await?;
            report.upserted += 1;
        }

        info!(
            fetched = report.fetched,
            upserted = report.upserted,
            degraded = report.degraded.len(),
            "News sync complete"
        );
        Ok(report)
    }

    /// Sync first when the stored news has gone stale. Never fails; a
    /// failed refresh leaves the stored data as it was.
    pub async fn ensure_fresh(&self) -> Freshness {
        let latest = match self.db.latest_updated_at().await {
            Ok(latest) => latest,
            Err(e) => {
                error!("Could not read news freshness: {}", e);
                return Freshness::RefreshFailed;
            }
        };

        if !is_stale(latest, Utc::now(), self.stale_after) {
            return Freshness::Fresh;
        }

        info!("Stored news is stale, syncing");
        match self.sync().await {
            Ok(outcome) => Freshness::Refreshed(outcome),
            Err(e) => {
                error!("Refresh of stale news failed: {}", e);
                Freshness::RefreshFailed
            }
        }
    }
}

fn collect(
    kind: SourceKind,
    result: Result<Vec<Article>, FetchError>,
    degraded: &mut Vec<SourceKind>,
) -> Vec<Article> {
    match result {
        Ok(articles) => articles,
        Err(e) => {
            warn!(source = %kind, "Source degraded: {}", e);
            degraded.push(kind);
            Vec::new()
        }
    }
}

pub async fn start_background_refresh(sync: Arc<NewsSync>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial news sync");
    if let Err(e) = sync.sync().await {
        error!("Initial news sync failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled news sync");
        if let Err(e) = sync.sync().await {
            error!("Scheduled news sync failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageCatalog;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &str) -> Config {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        config.retry.timeout_ms = 2_000;
        config.retry.backoff_ms = 1;
        config.scrape.timeout_ms = 500;
        config.sources.spaceflight.base_url = format!("{}/v4", server);
        config.sources.google_news.url = format!("{}/rss/general", server);
        config.sources.isro.url = format!("{}/rss/isro", server);
        config.topical.base_url = server.to_string();
        config
    }

    async fn create_sync(config: &Config) -> (NewsSync, Arc<Database>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        let db = Arc::new(db);
        let resolver = Arc::new(ImageResolver::with_seed(config.images.clone(), 3));
        let sync = NewsSync::new(db.clone(), config, Client::new(), resolver);
        (sync, db)
    }

    fn api_page(ids: &[i64]) -> serde_json::Value {
        let results: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "title": format!("Launch report {}", id),
                    "url": format!("https://spacenews.example.com/{}", id),
                    "image_url": format!("https://cdn.example.com/{}.jpg", id),
                    "news_site": "SpaceNews",
                    "summary": "Liftoff",
                    "published_at": "2024-12-09T12:00:00Z"
                })
            })
            .collect();
        serde_json::json!({ "count": ids.len(), "next": null, "previous": null, "results": results })
    }

    fn rss_with_images(prefix: &str, count: usize) -> String {
        let items: String = (1..=count)
            .map(|i| {
                format!(
                    r#"<item><title>{prefix} story {i}</title><link>https://news.example.com/{prefix}/{i}</link>
                    <description><![CDATA[<img src="https://cdn.example.com/{prefix}-{i}.jpg">]]></description></item>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title><link>https://x.example.com</link><description>D</description>{}</channel></rss>"#,
            items
        )
    }

    async fn mount_all(server: &MockServer, api_ids: &[i64], general: usize, isro: usize) {
        Mock::given(method("GET"))
            .and(path("/v4/articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(api_page(api_ids)))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss/general"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_images("general", general)))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss/isro"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_images("isro", isro)))
            .mount(server)
            .await;
    }

    mod staleness_tests {
        use super::*;

        #[test]
        fn test_empty_store_is_stale() {
            assert!(is_stale(None, Utc::now(), chrono::Duration::minutes(120)));
        }

        #[test]
        fn test_exactly_at_threshold_is_fresh() {
            let now = Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
            let latest = now - chrono::Duration::minutes(120);
            assert!(!is_stale(Some(latest), now, chrono::Duration::minutes(120)));
        }

        #[test]
        fn test_one_second_over_is_stale() {
            let now = Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
            let latest = now - chrono::Duration::minutes(120) - chrono::Duration::seconds(1);
            assert!(is_stale(Some(latest), now, chrono::Duration::minutes(120)));
        }

        #[test]
        fn test_recent_is_fresh() {
            let now = Utc::now();
            assert!(!is_stale(
                Some(now - chrono::Duration::minutes(5)),
                now,
                chrono::Duration::minutes(120)
            ));
        }
    }

    mod sync_tests {
        use super::*;

        #[tokio::test]
        async fn test_sync_stores_every_source() {
            let server = MockServer::start().await;
            mount_all(&server, &[1, 2], 3, 2).await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            let outcome = sync.sync().await.unwrap();
            let SyncOutcome::Completed(report) = outcome else {
                panic!("expected a completed pass");
            };
            assert_eq!(report.fetched, 7);
            assert_eq!(report.upserted, 7);
            assert!(report.degraded.is_empty());
            assert_eq!(db.count_news().await.unwrap(), 7);
            assert!(db.get_news_by_external_id("sfn-1").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_sync_twice_does_not_duplicate() {
            let server = MockServer::start().await;
            mount_all(&server, &[1, 2, 3], 2, 2).await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            sync.sync().await.unwrap();
            sync.sync().await.unwrap();

            assert_eq!(db.count_news().await.unwrap(), 7);
        }

        #[tokio::test]
        async fn test_failed_source_is_degraded() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v4/articles"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/rss/general"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_images("general", 2)))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/rss/isro"))
                .respond_with(ResponseTemplate::new(200).set_body_string("not a feed"))
                .mount(&server)
                .await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            let outcome = sync.sync().await.unwrap();
            assert_eq!(
                outcome,
                SyncOutcome::Completed(SyncReport {
                    fetched: 2,
                    upserted: 2,
                    degraded: vec![SourceKind::Spaceflight, SourceKind::Isro],
                })
            );
            assert_eq!(db.count_news().await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_storage_failure_propagates_and_clears_guard() {
            let server = MockServer::start().await;
            mount_all(&server, &[1], 0, 0).await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;
            db.close().await;

            assert!(sync.sync().await.is_err());
            assert!(!sync.is_syncing());
        }

        #[tokio::test]
        async fn test_concurrent_sync_is_skipped() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v4/articles"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(api_page(&[1]))
                        .set_delay(Duration::from_millis(300)),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_images("any", 0)))
                .mount(&server)
                .await;

            let config = test_config(&server.uri());
            let (sync, _db) = create_sync(&config).await;

            let (first, second) = tokio::join!(sync.sync(), sync.sync());

            assert!(matches!(first.unwrap(), SyncOutcome::Completed(_)));
            assert_eq!(second.unwrap(), SyncOutcome::AlreadyRunning);
            assert!(!sync.is_syncing());
        }

        #[tokio::test]
        async fn test_dropped_sync_releases_guard() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v4/articles"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(api_page(&[1]))
                        .set_delay(Duration::from_millis(500)),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_images("any", 0)))
                .mount(&server)
                .await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            // Caller gives up while the API request is still in flight
            let abandoned = tokio::time::timeout(Duration::from_millis(100), sync.sync()).await;
            assert!(abandoned.is_err());
            assert!(!sync.is_syncing());

            let next = sync.sync().await.unwrap();
            assert!(matches!(next, SyncOutcome::Completed(_)));
            assert_eq!(db.count_news().await.unwrap(), 1);
        }
    }

    mod ensure_fresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_empty_store_triggers_sync() {
            let server = MockServer::start().await;
            mount_all(&server, &[1], 1, 1).await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            let freshness = sync.ensure_fresh().await;
            assert!(matches!(
                freshness,
                Freshness::Refreshed(SyncOutcome::Completed(_))
            ));
            assert_eq!(db.count_news().await.unwrap(), 3);
        }

        #[tokio::test]
        async fn test_fresh_store_skips_sync() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;

            let article = Article {
                title: "Recent".to_string(),
                url: "https://news.example.com/recent".to_string(),
                image_url: "https://cdn.example.com/recent.jpg".to_string(),
                source_name: "Google News".to_string(),
                summary: "Recent".to_string(),
                published_at: Utc::now(),
                origin: crate::sources::Origin::GoogleNews,
            };
            db.upsert_news(&article.external_id(), &article, Utc::now() - chrono::Duration::minutes(30))
                .await
                .unwrap();

            assert_eq!(sync.ensure_fresh().await, Freshness::Fresh);
        }

        #[tokio::test]
        async fn test_failed_refresh_is_swallowed() {
            let server = MockServer::start().await;
            mount_all(&server, &[1], 0, 0).await;

            let config = test_config(&server.uri());
            let (sync, db) = create_sync(&config).await;
            db.close().await;

            assert_eq!(sync.ensure_fresh().await, Freshness::RefreshFailed);
        }
    }
}
