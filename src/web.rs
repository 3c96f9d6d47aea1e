use crate::{
    app::{
        context::RequestContext,
        demo_limiter::DemoLimiter,
        errors::AppError,
        importer::POCKET_SOURCE,
        orchestrator::{ClientContent, DemoExtraction},
        rag::SourceBookmark,
        App,
    },
    auth::{extract_bearer_token, hash_token},
    links,
    models::{AuthTokenType, ImportJob, Item, SearchHit, Source, User},
};
use axum::{
    async_trait,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const UPLOAD_LIMIT: usize = 100 * 1024 * 1024;
const EXPORT_FILE_NAME: &str = "bookshelf_export.zip";

pub struct SharedState {
    pub app: App,
    pub demo: DemoLimiter,
}

impl SharedState {
    /// Must be called inside a tokio runtime.
    pub fn new(app: App) -> Self {
        let demo = &app.config.demo;
        let demo = DemoLimiter::new(
            demo.attempts,
            Duration::from_secs(demo.window_secs),
            Duration::from_secs(demo.cleanup_secs),
        );
        Self { app, demo }
    }
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/v1/bookmarks", post(create).get(index))
        .route("/api/v1/bookmarks/check", get(check))
        .route("/api/v1/bookmarks/search", get(search))
        .route(
            "/api/v1/bookmarks/:id",
            get(get_bookmark).patch(update).delete(delete),
        )
        .route("/api/v1/bookmarks/:id/content", get(content))
        .route("/api/v1/ask", post(ask))
        .route("/api/v1/ask/remaining", get(remaining))
        .route("/api/v1/imports", post(create_import).get(list_imports))
        .route("/api/v1/imports/:id", get(get_import))
        .route("/api/v1/export", get(export))
        .route("/api/v1/demo/extract", post(demo_extract))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, waiting for import jobs to stop");
    shutdown.cancel();
}

async fn start_app(app: App, listen: String) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let worker = tokio::spawn(app.import_worker().run(shutdown.clone()));

    let state = Arc::new(SharedState::new(app));
    let router = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    log::info!("listening on {listen}");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    state.demo.stop();
    if let Err(err) = worker.await {
        log::error!("import worker panicked: {err}");
    }
    Ok(())
}

pub fn start_daemon(app: App, listen: Option<String>) -> anyhow::Result<()> {
    let listen = listen.unwrap_or_else(|| app.config.server.listen.clone());
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app, listen))
}

#[derive(Debug)]
pub struct HttpError {
    err: AppError,
    code: Option<&'static str>,
}

impl HttpError {
    /// Report server-side failures under `code` instead of `INTERNAL_ERROR`.
    fn server_code(mut self, code: &'static str) -> Self {
        if self.err.is_server_error() {
            self.code = Some(code);
        }
        self
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{:?}", self.err);
        } else {
            log::debug!("{status}: {}", self.err);
        }

        let code = self.code.unwrap_or_else(|| self.err.error_code());
        (
            status,
            Json(json!({"errorCode": code, "errorMessage": self.err.to_string()})),
        )
            .into_response()
    }
}

// This enables using `?` on anything convertible into `AppError`.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self {
            err: err.into(),
            code: None,
        }
    }
}

/// JSON body that reports decode failures in the error envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(HttpError))]
struct JsonBody<T>(T);

/// Query string that reports decode failures in the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(HttpError))]
struct QueryParams<T>(T);

/// Bearer-token authenticated user.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<SharedState>> for AuthUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<SharedState>) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or(AppError::Unauthorized)?;

        let ctx = RequestContext::anonymous();
        let user = state
            .app
            .store
            .user_by_token(&ctx, &hash_token(token), AuthTokenType::Signin)
            .await?;
        Ok(AuthUser(user))
    }
}

#[derive(Debug, Serialize)]
struct BookmarkView {
    id: String,
    title: String,
    link: String,
    excerpt: String,
}

impl From<Item> for BookmarkView {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            title: item.title,
            link: item.link,
            excerpt: item.excerpt,
        }
    }
}

/// Load `id` and hide other users' bookmarks behind `NotFound`.
async fn owned_item(state: &SharedState, ctx: &RequestContext, user: &User, id: &str) -> Result<Item, AppError> {
    let item = state.app.store.get_by_id(ctx, id).await?;
    if item.user_id != user.id {
        return Err(AppError::NotFound);
    }
    Ok(item)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    link: String,
    html_content: Option<String>,
    text_content: Option<String>,
    title: Option<String>,
    excerpt: Option<String>,
    lang: Option<String>,
    site_name: Option<String>,
    published_time: Option<String>,
    image_url: Option<String>,
}

async fn create(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    JsonBody(payload): JsonBody<CreateRequest>,
) -> Result<Json<BookmarkView>, HttpError> {
    if !links::is_url_valid(&payload.link) {
        return Err(AppError::InvalidUrl(payload.link).into());
    }

    let ctx = RequestContext::for_user(user.clone());
    let _guard = ctx.cancel_on_drop();
    log::info!("creating bookmark {} for user {}", payload.link, user.id);

    let content = ClientContent {
        html_content: payload.html_content,
        text_content: payload.text_content,
        title: payload.title,
        excerpt: payload.excerpt,
        lang: payload.lang,
        site_name: payload.site_name,
        published_time: payload.published_time,
        image_url: payload.image_url,
    };

    let ingestor = &state.app.ingestor;
    let created = if content.has_content() {
        ingestor
            .create_with_content(&ctx, &user, &payload.link, Source::Api, content)
            .await
    } else {
        ingestor.create(&ctx, &user, &payload.link, Source::Api).await
    };

    let item = created.map_err(|err| HttpError::from(err).server_code("CREATE_BOOKMARK"))?;
    Ok(Json(item.into()))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookmarkList {
    bookmarks: Vec<BookmarkView>,
    more_pages: bool,
}

async fn index(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    QueryParams(query): QueryParams<PageQuery>,
) -> Result<Json<BookmarkList>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let _guard = ctx.cancel_on_drop();

    let page = state
        .app
        .store
        .by_user(&ctx, user.id, query.page.unwrap_or(1), state.app.config.limits.page_size)
        .await?;

    Ok(Json(BookmarkList {
        bookmarks: page.items.into_iter().map(BookmarkView::from).collect(),
        more_pages: page.more_pages,
    }))
}

async fn get_bookmark(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<BookmarkView>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let item = owned_item(&state, &ctx, &user, &id).await?;
    Ok(Json(item.into()))
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    title: String,
}

async fn update(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<UpdateRequest>,
) -> Result<Json<BookmarkView>, HttpError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("title is required".to_string()).into());
    }

    let ctx = RequestContext::for_user(user.clone());
    let mut item = owned_item(&state, &ctx, &user, &id).await?;
    item.title = title.to_string();

    let item = state
        .app
        .store
        .update(&ctx, &item)
        .await
        .map_err(|err| HttpError::from(err).server_code("UPDATE_BOOKMARK"))?;
    Ok(Json(item.into()))
}

async fn delete(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let item = owned_item(&state, &ctx, &user, &id).await?;

    state
        .app
        .store
        .delete(&ctx, &item.id)
        .await
        .map_err(|err| HttpError::from(err).server_code("DELETE_BOOKMARK"))?;
    log::info!("deleted bookmark {} of user {}", item.id, user.id);
    Ok(Json(json!({ "id": item.id })))
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    url: String,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bookmark: Option<BookmarkView>,
}

async fn check(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    QueryParams(query): QueryParams<CheckQuery>,
) -> Result<Json<CheckResponse>, HttpError> {
    let link = links::canonicalize(&query.url)?;
    let ctx = RequestContext::for_user(user.clone());

    match state.app.store.get_by_link(&ctx, user.id, &link).await {
        Ok(item) => Ok(Json(CheckResponse {
            exists: true,
            bookmark: Some(item.into()),
        })),
        Err(AppError::NotFound) => Ok(Json(CheckResponse {
            exists: false,
            bookmark: None,
        })),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultView {
    id: String,
    title: String,
    link: String,
    hostname: String,
    headline: String,
    thumbnail: String,
    created_at: DateTime<Utc>,
    rank: f64,
    ai_summary: Option<String>,
    ai_excerpt: Option<String>,
    ai_tags: Option<String>,
}

impl SearchResultView {
    fn new(hit: SearchHit, include_ai: bool) -> Self {
        let (ai_summary, ai_excerpt, ai_tags) = if include_ai {
            (hit.ai_summary, hit.ai_excerpt, hit.ai_tags)
        } else {
            (None, None, None)
        };

        Self {
            hostname: links::hostname(&hit.link),
            id: hit.id,
            title: hit.title,
            link: hit.link,
            headline: hit.headline,
            thumbnail: hit.image_url,
            created_at: hit.created_at,
            rank: hit.rank,
            ai_summary,
            ai_excerpt,
            ai_tags,
        }
    }
}

async fn search(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    QueryParams(query): QueryParams<SearchQuery>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let _guard = ctx.cancel_on_drop();

    let hits = state.app.search.search(&ctx, user.id, &query.query).await?;
    let include_ai = user.is_premium();
    let bookmarks: Vec<_> = hits
        .into_iter()
        .map(|hit| SearchResultView::new(hit, include_ai))
        .collect();

    Ok(Json(json!({ "bookmarks": bookmarks })))
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    id: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<String>,
}

async fn content(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ContentResponse>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let item = owned_item(&state, &ctx, &user, &id).await?;
    let full = state.app.store.get_full(&ctx, &item.id).await?;

    Ok(Json(ContentResponse {
        id: item.id,
        content: full.content,
        markdown: full.ai_markdown,
    }))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskResponse {
    answer: String,
    source_bookmarks: Vec<SourceBookmark>,
}

async fn ask(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    JsonBody(payload): JsonBody<AskRequest>,
) -> Result<Json<AskResponse>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let _guard = ctx.cancel_on_drop();

    let answer = state.app.ask(&ctx, &payload.question).await?;
    Ok(Json(AskResponse {
        answer: answer.answer,
        source_bookmarks: answer.sources,
    }))
}

async fn remaining(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let limiter = &state.app.limiter;
    let remaining = limiter.remaining_ai_questions(&ctx, &user).await?;
    Ok(Json(json!({
        "remaining": remaining,
        "limit": limiter.ai_limit(&user),
    })))
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    source: Option<String>,
    option: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    id: String,
    source: String,
    import_option: String,
    status: String,
    total_items: i64,
    imported_count: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<ImportJob> for JobView {
    fn from(job: ImportJob) -> Self {
        Self {
            id: job.id,
            source: job.source,
            import_option: job.import_option,
            status: job.status.to_string(),
            total_items: job.total_items,
            imported_count: job.imported_count,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

async fn create_import(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    QueryParams(query): QueryParams<ImportQuery>,
    body: Bytes,
) -> Result<Json<JobView>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let source = query.source.as_deref().unwrap_or(POCKET_SOURCE);
    let option = query.option.as_deref().unwrap_or("all");

    let job = state
        .app
        .enqueue_import(&ctx, source, option, body.to_vec())
        .await?;
    Ok(Json(job.into()))
}

async fn list_imports(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let jobs: Vec<JobView> = state
        .app
        .store
        .jobs_by_user(&ctx, user.id)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    Ok(Json(json!({ "jobs": jobs })))
}

async fn get_import(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JobView>, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let job = state.app.store.get_job(&ctx, &id).await?;
    if job.user_id != user.id {
        return Err(AppError::NotFound.into());
    }
    Ok(Json(job.into()))
}

async fn export(
    State(state): State<Arc<SharedState>>,
    AuthUser(user): AuthUser,
) -> Result<Response, HttpError> {
    let ctx = RequestContext::for_user(user.clone());
    let _guard = ctx.cancel_on_drop();

    let data = state.app.export(&ctx).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILE_NAME}\""),
            ),
        ],
        data,
    )
        .into_response())
}

/// First X-Forwarded-For entry, then X-Real-IP, then the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct DemoRequest {
    #[serde(default)]
    url: String,
}

async fn demo_extract(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    JsonBody(payload): JsonBody<DemoRequest>,
) -> Result<Response, HttpError> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !state.demo.allow(&ip) {
        let attempt_count = state.demo.attempt_count(&ip);
        log::info!("demo extraction denied for {ip} after {attempt_count} attempts");
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded. Please try again later.",
                "show_signup": attempt_count >= 3,
                "attempt_count": attempt_count,
            })),
        )
            .into_response());
    }

    let url = payload.url.trim();
    if url.is_empty() {
        return Err(AppError::InvalidInput("URL is required".to_string()).into());
    }

    let ctx = RequestContext::anonymous();
    let _guard = ctx.cancel_on_drop();
    log::info!("demo extraction of {url} for {ip}");

    let extraction: DemoExtraction = state.app.ingestor.extract_only(&ctx, url).await?;
    Ok(Json(extraction).into_response())
}
