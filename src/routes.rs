use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, TokenConfig};
use crate::db::{format_timestamp, Database, NewNews, NewsRecord};
use crate::fetcher::build_client;
use crate::images::ImageResolver;
use crate::sources::{Article, Origin};
use crate::sync::{NewsSync, SyncOutcome};

pub struct AppState {
    pub db: Arc<Database>,
    pub sync: Arc<NewsSync>,
    pub resolver: Arc<ImageResolver>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: Config) -> anyhow::Result<Self> {
        let client = build_client()?;
        let resolver = Arc::new(ImageResolver::new(config.images.clone()));
        let sync = Arc::new(NewsSync::new(db.clone(), &config, client, resolver.clone()));

        Ok(Self {
            db,
            sync,
            resolver,
            config: Arc::new(config),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/cron/news", get(cron_news))
        .route("/api/sync-news", get(sync_news))
        .route("/api/news", get(live_news).post(create_news))
        .route("/api/news/archive", get(archived_news))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: if path.is_empty() {
                Vec::new()
            } else {
                vec![path.to_string()]
            },
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Forbidden,
    #[error("invalid request body")]
    Validation(Vec<ValidationIssue>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Unauthorized").into_response(),
            ApiError::Validation(issues) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(issues)).into_response()
            }
            ApiError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error: {}", err),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn run_sync(state: &AppState, trigger: &str) -> (StatusCode, Json<SyncResponse>) {
    info!("News sync triggered by {}", trigger);

    match state.sync.sync().await {
        Ok(SyncOutcome::Completed(report)) => {
            let mut message = format!(
                "News synced successfully: {} articles stored",
                report.upserted
            );
            if !report.degraded.is_empty() {
                let names: Vec<&str> = report.degraded.iter().map(|kind| kind.name()).collect();
                message.push_str(&format!(" ({} unavailable)", names.join(", ")));
            }
            (
                StatusCode::OK,
                Json(SyncResponse {
                    success: true,
                    message: Some(message),
                    error: None,
                }),
            )
        }
        Ok(SyncOutcome::AlreadyRunning) => (
            StatusCode::OK,
            Json(SyncResponse {
                success: true,
                message: Some("Sync already in progress".to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            error!("News sync via {} failed: {:#}", trigger, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SyncResponse {
                    success: false,
                    message: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn cron_news(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    run_sync(&state, "cron").await
}

pub async fn sync_news(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    run_sync(&state, "manual request").await
}

/// Numeric for stored and API articles, `gn-<index>` for live feed items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(i64),
    Text(String),
}

/// Listing shape shared by the live and archive endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ListedArticle {
    pub id: ItemId,
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub news_site: String,
    pub summary: String,
    pub published_at: String,
}

impl ListedArticle {
    fn from_article(id: ItemId, article: Article) -> Self {
        Self {
            id,
            title: article.title,
            url: article.url,
            image_url: article.image_url,
            news_site: article.source_name,
            summary: article.summary,
            published_at: format_timestamp(article.published_at),
        }
    }

    fn from_record(record: NewsRecord, resolver: &ImageResolver) -> Self {
        let summary = record.summary.unwrap_or_default();
        let context = format!("{} {}", record.title, summary);
        let image_url = resolver.resolve(record.image_url.as_deref(), &context);
        Self {
            id: ItemId::Number(record.id),
            title: record.title,
            url: record.url.unwrap_or_default(),
            image_url,
            news_site: record.source.unwrap_or_default(),
            summary,
            published_at: record.published_at,
        }
    }
}

fn default_live_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    #[serde(default = "default_live_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub results: Vec<ListedArticle>,
    pub count: usize,
    pub next: Option<String>,
}

/// Live merge of the structured API and the general feed, newest first.
pub async fn live_news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Json<LiveResponse> {
    let (api, feed) = tokio::join!(
        state.sync.spaceflight().fetch(query.limit / 2, query.offset),
        state.sync.google_news().fetch(),
    );

    let api = api.unwrap_or_else(|e| {
        warn!("Live listing without API articles: {}", e);
        Vec::new()
    });
    let feed = feed.unwrap_or_else(|e| {
        warn!("Live listing without feed articles: {}", e);
        Vec::new()
    });

    let mut merged: Vec<(DateTime<Utc>, ListedArticle)> = feed
        .into_iter()
        .enumerate()
        .map(|(index, article)| {
            let id = ItemId::Text(format!("gn-{}", index));
            (article.published_at, ListedArticle::from_article(id, article))
        })
        .collect();

    merged.extend(api.into_iter().map(|article| {
        let id = match article.origin {
            Origin::Spaceflight { id } => ItemId::Number(id),
            _ => ItemId::Text(article.external_id()),
        };
        (article.published_at, ListedArticle::from_article(id, article))
    }));

    merged.sort_by(|a, b| b.0.cmp(&a.0));
    let results: Vec<ListedArticle> = merged.into_iter().map(|(_, item)| item).collect();

    Json(LiveResponse {
        count: results.len(),
        results,
        next: None,
    })
}

fn default_archive_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    #[serde(default = "default_archive_limit")]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub results: Vec<ListedArticle>,
}

pub async fn archived_news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArchiveQuery>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    state.sync.ensure_fresh().await;

    let records = state.db.list_news(query.limit.max(0), 0).await?;
    let results = records
        .into_iter()
        .map(|record| ListedArticle::from_record(record, &state.resolver))
        .collect();

    Ok(Json(ArchiveResponse { results }))
}

/// The configured token behind a `Bearer` header, if it may publish.
fn publisher<'a>(config: &'a Config, headers: &HeaderMap) -> Option<&'a TokenConfig> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    config.token(token).filter(|t| t.role.can_publish())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_text(
    body: &serde_json::Map<String, Value>,
    field: &str,
    empty_message: &str,
    issues: &mut Vec<ValidationIssue>,
) -> String {
    match body.get(field) {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(Value::String(_)) => {
            issues.push(ValidationIssue::new(field, empty_message));
            String::new()
        }
        Some(other) => {
            issues.push(ValidationIssue::new(
                field,
                format!("Expected string, received {}", type_name(other)),
            ));
            String::new()
        }
        None => {
            issues.push(ValidationIssue::new(field, "Required"));
            String::new()
        }
    }
}

fn optional_text(
    body: &serde_json::Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match body.get(field)? {
        Value::String(text) => Some(text.clone()),
        other => {
            issues.push(ValidationIssue::new(
                field,
                format!("Expected string, received {}", type_name(other)),
            ));
            None
        }
    }
}

/// Check a create payload. Every problem is reported, not just the first.
pub fn validate_new_news(body: &Value) -> Result<NewNews, Vec<ValidationIssue>> {
    let Value::Object(body) = body else {
        return Err(vec![ValidationIssue::new(
            "",
            format!("Expected object, received {}", type_name(body)),
        )]);
    };

    let mut issues = Vec::new();
    let title = required_text(body, "title", "Title is required", &mut issues);
    let content = required_text(body, "content", "Content is required", &mut issues);
    let summary = optional_text(body, "summary", &mut issues);
    let source = optional_text(body, "source", &mut issues);
    let category = optional_text(body, "category", &mut issues);

    // An empty string means "no image".
    let image_url = match optional_text(body, "imageUrl", &mut issues) {
        Some(url) if url.is_empty() => None,
        Some(url) => match url::Url::parse(&url) {
            Ok(_) => Some(url),
            Err(_) => {
                issues.push(ValidationIssue::new("imageUrl", "Invalid url"));
                None
            }
        },
        None => None,
    };

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(NewNews {
        title,
        summary,
        content,
        image_url,
        source,
        category,
    })
}

pub async fn create_news(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NewsRecord>, ApiError> {
    let author = publisher(&state.config, &headers).ok_or(ApiError::Forbidden)?;

    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        ApiError::Validation(vec![ValidationIssue::new(
            "",
            format!("Invalid JSON: {}", e),
        )])
    })?;
    let news = validate_new_news(&value).map_err(ApiError::Validation)?;

    let record = state
        .db
        .create_news(&news, &author.user_id, Utc::now())
        .await?;
    info!("News {} created by {}", record.id, author.user_id);

    Ok(Json(record))
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
