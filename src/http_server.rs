/// HTTP Server Module
///
/// JSON API over the store, the ingester, the analysis pass and the
/// generator. Endpoints that need Twitter or Gemini answer 400 when the
/// matching credential is not configured.

use anyhow::{Context, Result};
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::analysis::{analyze_posts, combined_context, prompt_context};
use crate::config::Config;
use crate::content::{ContentGenerator, RewriteRequest};
use crate::error::{ApiError, ApiResult};
use crate::ingest::{cleanup_used_posts, fetch_all_posts, fetch_status, preview_user, FetchReport};
use crate::market::{render_market_prompt, ContextRequest, MarketSource, SOURCES};
use crate::models::{
    is_valid_username, normalize_username, Category, MonitoredUser, Post, ScheduledPost,
    ScheduledPostPatch,
};
use crate::prompts::{enhanced_tweet_prompt, thread_template, tweet_prompt, THREAD_TEMPLATES};
use crate::store::Store;
use crate::twitter::TwitterApi;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub twitter: Option<Arc<dyn TwitterApi>>,
    pub generator: Option<Arc<ContentGenerator>>,
    pub market: Arc<dyn MarketSource>,
    pub fetch_history: Arc<RwLock<FetchHistory>>,
}

/// Outcome of the last fetch-all pass, kept for the status endpoint
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchHistory {
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_saved: usize,
    pub last_errors: usize,
    pub total_fetches: u32,
}

impl FetchHistory {
    fn record(&mut self, report: &FetchReport) {
        self.last_fetch = Some(report.completed_at);
        self.last_saved = report.total_saved_tweets;
        self.last_errors = report.errors.len();
        self.total_fetches += 1;
    }
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        twitter: Option<Arc<dyn TwitterApi>>,
        generator: Option<Arc<ContentGenerator>>,
        market: Arc<dyn MarketSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            twitter,
            generator,
            market,
            fetch_history: Arc::new(RwLock::new(FetchHistory::default())),
        }
    }

    fn twitter(&self) -> ApiResult<&dyn TwitterApi> {
        self.twitter
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("Twitter Bearer Token not configured"))
    }

    fn generator(&self) -> ApiResult<&ContentGenerator> {
        self.generator
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("Gemini API key not configured"))
    }
}

/// `axum::Json` whose rejections answer with the usual `{"error": ...}` body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct JsonBody<T>(T);

/// `axum::extract::Query` with the same error shape as `JsonBody`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
struct QueryParams<T>(T);

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:username", put(update_user).delete(delete_user))
        .route("/api/fetch-tweets/:username", get(preview_tweets))
        .route("/api/fetch-all-posts", get(fetch_all).post(fetch_all))
        .route("/api/fetch-status", get(fetch_status_endpoint))
        .route("/api/daily-cleanup", post(daily_cleanup))
        .route("/api/manual-posts", get(list_manual_posts).post(create_manual_post))
        .route("/api/analyze-tweets", get(analyze_tweets))
        .route("/api/prompt-context", get(prompt_context_endpoint))
        .route("/api/external-context", get(external_context))
        .route("/api/combined-context", get(combined_context_endpoint))
        .route("/api/generate-content", post(generate_content))
        .route("/api/generate-enhanced", post(generate_enhanced))
        .route("/api/crypto/prompt-types", get(prompt_types))
        .route("/api/crypto/generate-crypto", post(generate_crypto))
        .route("/api/rewrite-content", post(rewrite_content))
        .route("/api/rewrite-enhanced", post(rewrite_enhanced))
        .route("/api/usage-stats", get(usage_stats))
        .route("/api/scheduled-posts", get(list_scheduled).post(create_scheduled))
        .route("/api/scheduled-posts/ready-to-post", get(ready_to_post))
        .route(
            "/api/scheduled-posts/:id",
            put(update_scheduled).delete(delete_scheduled),
        )
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

/// Serialize `body` and add `"success": true` next to its fields
fn success<T: Serialize>(body: T) -> ApiResult<Json<Value>> {
    let mut value = serde_json::to_value(body).context("Failed to serialize response")?;
    if let Value::Object(map) = &mut value {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Ok(Json(value))
}

fn required(value: Option<String>, message: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

fn valid_username(raw: &str) -> ApiResult<String> {
    let username = normalize_username(raw);
    if !is_valid_username(&username) {
        return Err(ApiError::bad_request(format!("Invalid username: {}", raw.trim())));
    }
    Ok(username)
}

fn parse_category(tag: &str) -> ApiResult<Category> {
    tag.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid tag: {}", tag)))
}

/// Health check endpoint
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tweet_pipeline",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ---- users ----

#[derive(Debug, Deserialize)]
struct CreateUserBody {
    username: Option<String>,
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserBody {
    new_username: Option<String>,
    tag: Option<String>,
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<MonitoredUser>>> {
    Ok(Json(state.store.list_users().await?))
}

async fn create_user(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateUserBody>,
) -> ApiResult<Json<MonitoredUser>> {
    let username = normalize_username(&required(body.username, "Username and tag are required")?);
    if username.is_empty() {
        return Err(ApiError::bad_request("Username and tag are required"));
    }
    let username = valid_username(&username)?;
    let category = parse_category(&required(body.tag, "Username and tag are required")?)?;

    let user = state
        .store
        .create_user(MonitoredUser::new(&username, category))
        .await?
        .ok_or_else(|| ApiError::bad_request("User already exists"))?;

    log::info!("Monitoring @{} ({})", user.username, user.category);
    Ok(Json(user))
}

async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    JsonBody(body): JsonBody<UpdateUserBody>,
) -> ApiResult<Json<MonitoredUser>> {
    let new_username = body
        .new_username
        .filter(|u| !normalize_username(u).is_empty())
        .map(|u| valid_username(&u))
        .transpose()?;
    let category = body.tag.as_deref().map(parse_category).transpose()?;

    if let Some(new_username) = new_username.as_deref().filter(|u| *u != username) {
        if state.store.get_user(new_username).await?.is_some() {
            return Err(ApiError::bad_request("User already exists"));
        }
    }

    let user = state
        .store
        .update_user(&username, new_username.as_deref(), category)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_user(&username).await? {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

// ---- ingestion ----

#[derive(Debug, Deserialize)]
struct CountQuery {
    count: Option<u32>,
}

async fn preview_tweets(
    State(state): State<AppState>,
    Path(username): Path<String>,
    QueryParams(query): QueryParams<CountQuery>,
) -> ApiResult<Json<Value>> {
    let twitter = state.twitter()?;
    let username = valid_username(&username)?;

    let tweets = preview_user(twitter, &username, query.count.unwrap_or(10))
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch tweets", e))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(json!({
        "user": username,
        "count": tweets.len(),
        "tweets": tweets,
    })))
}

async fn fetch_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let twitter = state.twitter()?;

    let report = fetch_all_posts(&state.config.ingest, state.store.as_ref(), twitter).await?;
    state.fetch_history.write().await.record(&report);

    success(report)
}

async fn fetch_status_endpoint(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let status = fetch_status(state.store.as_ref()).await?;
    let history = state.fetch_history.read().await.clone();

    Ok(Json(json!({
        "status": status.users,
        "database": {
            "totalTweets": status.total_tweets,
            "usedTweets": status.used_tweets,
            "unusedTweets": status.unused_tweets,
            "cleanupNeeded": status.cleanup_needed,
        },
        "lastRun": history,
    })))
}

async fn daily_cleanup(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let retention = &state.config.retention;
    let deleted = cleanup_used_posts(state.store.as_ref(), retention, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "deletedCount": deleted,
        "message": format!(
            "Cleaned up {} used tweets older than {} hours",
            deleted,
            retention.used_post_max_age.num_hours()
        ),
    })))
}

// ---- manual posts ----

#[derive(Debug, Deserialize)]
struct ManualPostBody {
    text: Option<String>,
    author: Option<String>,
    tag: Option<String>,
}

async fn create_manual_post(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ManualPostBody>,
) -> ApiResult<Json<Value>> {
    const MISSING: &str = "Text, author, and tag are required";
    let text = required(body.text, MISSING)?;
    let author = required(body.author, MISSING)?;
    let category = parse_category(&required(body.tag, MISSING)?)?;

    let post = Post::manual(&text, &author, category);
    state.store.insert_post(&post).await?;

    Ok(Json(json!({
        "success": true,
        "tweet": post,
        "message": "Manual post added successfully",
    })))
}

async fn list_manual_posts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let posts = state.store.manual_posts().await?;
    Ok(Json(json!({ "success": true, "posts": posts })))
}

// ---- analysis & context ----

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NicheQuery {
    niche: Option<String>,
}

impl NicheQuery {
    fn niche(self) -> String {
        self.niche
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "crypto".to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalQuery {
    niche: Option<String>,
    include_news: Option<bool>,
    include_prices: Option<bool>,
}

async fn analyze_tweets(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(10).max(1);
    success(analyze_posts(state.store.as_ref(), limit).await?)
}

async fn prompt_context_endpoint(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<NicheQuery>,
) -> ApiResult<Json<Value>> {
    success(prompt_context(state.store.as_ref(), &query.niche()).await?)
}

async fn external_context(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ExternalQuery>,
) -> ApiResult<Json<Value>> {
    let request = ContextRequest {
        niche: query.niche.unwrap_or_else(|| "crypto".to_string()),
        include_news: query.include_news.unwrap_or(true),
        include_prices: query.include_prices.unwrap_or(true),
    };
    let context = state.market.gather(&request).await;
    let prompt_context = render_market_prompt(&context, Utc::now());

    Ok(Json(json!({
        "success": true,
        "context": context,
        "promptContext": prompt_context,
        "sources": SOURCES,
    })))
}

async fn combined_context_endpoint(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<NicheQuery>,
) -> ApiResult<Json<Value>> {
    let combined = combined_context(
        state.store.as_ref(),
        state.market.as_ref(),
        &query.niche(),
    )
    .await?;
    success(combined)
}

/// Combined prompt for `niche`, or empty when context is switched off
async fn generation_context(state: &AppState, niche: &str, use_context: bool) -> ApiResult<String> {
    if !use_context {
        return Ok(String::new());
    }
    let combined = combined_context(state.store.as_ref(), state.market.as_ref(), niche)
        .await
        .map_err(|e| {
            ApiError::upstream(
                "Failed to fetch context data. Please try again or disable context.",
                e,
            )
        })?;
    Ok(combined.combined_prompt)
}

// ---- generation ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    niche: Option<String>,
    sub_category: Option<String>,
    user_info: Option<String>,
    use_context: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoBody {
    prompt_type: Option<String>,
    custom_context: Option<String>,
    use_context: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteBody {
    original_text: Option<String>,
    author: Option<String>,
    tag: Option<String>,
    tweet_id: Option<String>,
}

impl RewriteBody {
    fn into_request(self) -> ApiResult<RewriteRequest> {
        const MISSING: &str = "Original text and author are required";
        Ok(RewriteRequest {
            original_text: required(self.original_text, MISSING)?,
            author: required(self.author, MISSING)?,
            category: self.tag.and_then(|t| t.parse().ok()),
            post_id: self.tweet_id.filter(|id| !id.is_empty()),
        })
    }
}

const GENERATION_FAILED: &str = "Content generation failed. Please check your API key and try again.";

async fn generate_content(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<GenerateBody>,
) -> ApiResult<Json<Value>> {
    let generator = state.generator()?;
    const MISSING: &str = "Niche and subCategory are required";
    let niche = required(body.niche, MISSING)?;
    let sub_category = required(body.sub_category, MISSING)?;

    let prompt = tweet_prompt(&niche, &sub_category, body.user_info.as_deref());
    let generation = generator
        .generate_with_fallback(&prompt)
        .await
        .map_err(|e| ApiError::upstream("Gemini API error. Both models failed.", e))?;

    Ok(Json(json!({
        "content": generation.content,
        "model": generation.model,
    })))
}

async fn generate_enhanced(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<GenerateBody>,
) -> ApiResult<Json<Value>> {
    let generator = state.generator()?;
    const MISSING: &str = "Niche and subCategory are required";
    let niche = required(body.niche, MISSING)?;
    let sub_category = required(body.sub_category, MISSING)?;
    let use_context = body.use_context.unwrap_or(true);

    let context = generation_context(&state, &niche, use_context).await?;
    let prompt = enhanced_tweet_prompt(&niche, &sub_category, body.user_info.as_deref(), &context);
    let generation = generator
        .generate_flash(&prompt)
        .await
        .map_err(|e| ApiError::upstream(GENERATION_FAILED, e))?;

    Ok(Json(json!({
        "content": generation.content,
        "model": generation.model,
        "contextUsed": use_context && !context.is_empty(),
    })))
}

async fn prompt_types() -> Json<Value> {
    Json(json!({ "success": true, "promptTypes": THREAD_TEMPLATES }))
}

async fn generate_crypto(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CryptoBody>,
) -> ApiResult<Json<Value>> {
    let template = body
        .prompt_type
        .as_deref()
        .and_then(thread_template)
        .ok_or_else(|| ApiError::bad_request("Invalid prompt type"))?;
    let generator = state.generator()?;
    let use_context = body.use_context.unwrap_or(true);
    let custom = body.custom_context.as_deref().filter(|c| !c.trim().is_empty());

    let context = generation_context(&state, "crypto", use_context).await?;
    let generation = generator
        .generate_thread(template, &context, custom)
        .await
        .map_err(|e| ApiError::upstream(GENERATION_FAILED, e))?;

    Ok(Json(json!({
        "content": generation.content,
        "promptType": template.title,
        "model": generation.model,
        "contextUsed": use_context && (!context.is_empty() || custom.is_some()),
    })))
}

async fn rewrite_content(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RewriteBody>,
) -> ApiResult<Json<Value>> {
    let generator = state.generator()?;
    let request = body.into_request()?;

    let generation = generator.rewrite(state.store.as_ref(), &request).await?;
    Ok(Json(json!({
        "rewrittenText": generation.content,
        "model": generation.model,
    })))
}

async fn rewrite_enhanced(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RewriteBody>,
) -> ApiResult<Json<Value>> {
    let generator = state.generator()?;
    let request = body.into_request()?;

    let generation = generator
        .rewrite_enhanced(state.store.as_ref(), &request)
        .await?;
    Ok(Json(json!({
        "rewrittenText": generation.content,
        "model": generation.model,
        "originalAuthor": request.author,
    })))
}

async fn usage_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let counts = state.store.post_counts().await?;
    Ok(Json(json!({
        "unusedTweetsAvailable": counts.unused,
        "generation": state.generator.as_ref().map(|g| g.usage()),
        "manualFetchOnly": true,
    })))
}

// ---- scheduled posts ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduledBody {
    content: Option<String>,
    context: Option<String>,
    selected_post_ids: Option<Vec<String>>,
    scheduled_for: Option<DateTime<Utc>>,
}

/// Unparseable ids can never match a stored post
fn scheduled_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found("Scheduled post not found"))
}

async fn list_scheduled(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let posts = state.store.list_scheduled().await?;
    Ok(Json(json!({ "success": true, "posts": posts })))
}

async fn create_scheduled(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateScheduledBody>,
) -> ApiResult<Json<Value>> {
    let content = required(body.content, "Content is required")?;
    let post = ScheduledPost::new(
        &content,
        body.context,
        body.selected_post_ids.unwrap_or_default(),
        body.scheduled_for,
    );
    state.store.insert_scheduled(&post).await?;

    Ok(Json(json!({
        "success": true,
        "post": post,
        "message": "Post scheduled successfully",
    })))
}

async fn update_scheduled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<ScheduledPostPatch>,
) -> ApiResult<Json<Value>> {
    let id = scheduled_id(&id)?;
    let mut post = state
        .store
        .get_scheduled(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Scheduled post not found"))?;

    post.apply(patch, Utc::now())?;
    if !state.store.update_scheduled(&post).await? {
        return Err(ApiError::not_found("Scheduled post not found"));
    }

    Ok(Json(json!({ "success": true, "post": post })))
}

async fn delete_scheduled(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = scheduled_id(&id)?;
    if !state.store.delete_scheduled(id).await? {
        return Err(ApiError::not_found("Scheduled post not found"));
    }
    Ok(Json(json!({ "success": true, "message": "Scheduled post deleted" })))
}

async fn ready_to_post(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let posts = state.store.due_scheduled(Utc::now()).await?;
    Ok(Json(json!({ "success": true, "posts": posts })))
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("HTTP server listening on port {}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
