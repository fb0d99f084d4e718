use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::sources::Article;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsRecord {
    pub id: i64,
    /// Dedup key for synced articles; absent on hand-written ones
    pub external_id: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub author_id: Option<String>,
    pub published_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl NewsRecord {
    pub fn published(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.published_at)
    }
}

/// A hand-written article from the create endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNews {
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
}

/// Fixed-width UTC form so that text order is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY,
                external_id TEXT UNIQUE,
                title TEXT NOT NULL,
                summary TEXT,
                content TEXT NOT NULL,
                url TEXT,
                image_url TEXT,
                source TEXT,
                category TEXT,
                author_id TEXT,
                published_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_news_published
            ON news(published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_news_updated
            ON news(updated_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or refresh a synced article keyed by `external_id`.
    ///
    /// On conflict the mutable fields and `updated_at` are overwritten;
    /// `published_at`, `content` and `created_at` keep their first values.
    pub async fn upsert_news(
        &self,
        external_id: &str,
        article: &Article,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let now = format_timestamp(now);

        sqlx::query(
            r#"
            INSERT INTO news (
                external_id, title, summary, content, url, image_url, source,
                published_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                title = excluded.title,
                summary = excluded.summary,
                url = excluded.url,
                image_url = excluded.image_url,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(external_id)
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.summary)
        .bind(&article.url)
        .bind(&article.image_url)
        .bind(&article.source_name)
        .bind(format_timestamp(article.published_at))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_news(
        &self,
        news: &NewNews,
        author_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NewsRecord> {
        let now = format_timestamp(now);

        let record = sqlx::query_as::<_, NewsRecord>(
            r#"
            INSERT INTO news (
                title, summary, content, image_url, source, category, author_id,
                published_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&news.title)
        .bind(&news.summary)
        .bind(&news.content)
        .bind(&news.image_url)
        .bind(&news.source)
        .bind(&news.category)
        .bind(author_id)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_news(&self, id: i64) -> anyhow::Result<Option<NewsRecord>> {
        let record = sqlx::query_as::<_, NewsRecord>("SELECT * FROM news WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn get_news_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<NewsRecord>> {
        let record = sqlx::query_as::<_, NewsRecord>("SELECT * FROM news WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Stored news, newest publication first.
    pub async fn list_news(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<NewsRecord>> {
        let records = sqlx::query_as::<_, NewsRecord>(
            r#"
            SELECT * FROM news
            ORDER BY published_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count_news(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// `updated_at` of the most recently touched record.
    pub async fn latest_updated_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let latest: Option<(String,)> =
            sqlx::query_as("SELECT updated_at FROM news ORDER BY updated_at DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        match latest {
            Some((value,)) => parse_timestamp(&value)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Unreadable updated_at value '{}'", value)),
            None => Ok(None),
        }
    }
}
