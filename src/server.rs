//! REST API server (`nk serve`).
//!
//! Serves the notes API that [`RestBackend`](crate::backend::RestBackend)
//! consumes. Storage is the hosted SQL schema; every authenticated request
//! gets a [`HostedBackend`] scoped to the token's user.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/auth/register` | Create a user, returns `{user, token}` |
//! | `POST` | `/auth/login` | Returns `{user, token}` |
//! | `POST` | `/auth/logout` | End the session |
//! | `GET`  | `/auth/me` | Current user |
//! | `GET` `POST` | `/categories` | List (with subcategories) / create |
//! | `PUT` `DELETE` | `/categories/{id}` | Update / delete (cascades) |
//! | `GET` `POST` | `/subcategories` | List (`?category_id=`) / create |
//! | `PUT` `DELETE` | `/subcategories/{id}` | Update / delete (cascades) |
//! | `GET` `POST` | `/notes` | List with filters / create |
//! | `GET` `PUT` `DELETE` | `/notes/{id}` | Fetch / update / delete |
//! | `POST` `DELETE` | `/upload/image` | Multipart upload / delete by `{url}` |
//! | `GET`  | `/search` | `q`, `type`, `limit` across notes and categories |
//! | `GET`  | `/tags` | Tag usage counts |
//! | `GET`  | `/files/{*key}` | Objects in a directory bucket |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response Envelope
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "Note not found" }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::accounts;
use crate::api::{
    AuthPayload, CreateCategoryRequest, CreateSubcategoryRequest, Envelope, GlobalSearchParams,
    GlobalSearchResults, ImageUrl, LoginRequest, MePayload, NoteFilter, RegisterRequest,
    SearchType, SubcategoryFilter, TagCount,
};
use crate::backend::{Backend, HostedBackend, OwnerContext};
use crate::bucket::ImageBucket;
use crate::config::Config;
use crate::error::{ErrorKind, NoteError};
use crate::images::{detect_content_type, ImageUpload, MAX_IMAGE_BYTES};
use crate::models::{
    Category, CategoryPatch, NewNote, Note, NotePatch, Subcategory, SubcategoryPatch,
};
use crate::{db, migrate, search};

const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pool: SqlitePool,
    bucket: Arc<ImageBucket>,
}

impl ServerState {
    pub fn new(pool: SqlitePool, bucket: ImageBucket) -> Self {
        Self {
            pool,
            bucket: Arc::new(bucket),
        }
    }

    /// Connect and migrate the database named in `[server]`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let server = config
            .server
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[server] section missing from config"))?;
        let pool = db::connect(&server.database_url).await?;
        migrate::run_migrations(&pool).await?;
        let bucket = ImageBucket::from_config(&server.bucket_or_default(&config.local.dir));
        Ok(Self::new(pool, bucket))
    }

    fn backend_for(&self, user_id: &str) -> HostedBackend {
        HostedBackend::new(
            self.pool.clone(),
            OwnerContext::new(user_id),
            (*self.bucket).clone(),
        )
    }
}

/// Starts the REST server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let server = config
        .server
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[server] section missing from config"))?;
    let bind_addr = server.bind.clone();
    let state = ServerState::from_config(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, public_url = %server.public_url(), "notes API listening");
    serve(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: ServerState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(handle_register))
        .route("/auth/login", post(handle_login))
        .route("/auth/logout", post(handle_logout))
        .route("/auth/me", get(handle_me))
        .route(
            "/categories",
            get(handle_list_categories).post(handle_create_category),
        )
        .route(
            "/categories/{id}",
            put(handle_update_category).delete(handle_delete_category),
        )
        .route(
            "/subcategories",
            get(handle_list_subcategories).post(handle_create_subcategory),
        )
        .route(
            "/subcategories/{id}",
            put(handle_update_subcategory).delete(handle_delete_subcategory),
        )
        .route("/notes", get(handle_list_notes).post(handle_create_note))
        .route(
            "/notes/{id}",
            get(handle_get_note)
                .put(handle_update_note)
                .delete(handle_delete_note),
        )
        .route(
            "/upload/image",
            post(handle_upload_image)
                .delete(handle_delete_image)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 1024 * 1024)),
        )
        .route("/search", get(handle_search))
        .route("/tags", get(handle_tags))
        .route("/files/{*key}", get(handle_file))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::failure(self.message))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        message: message.into(),
    }
}

impl From<NoteError> for AppError {
    fn from(err: NoteError) -> Self {
        let message = err.to_string();
        match (&err, err.kind()) {
            (NoteError::NotFound { .. }, _) => not_found(message),
            (NoteError::Auth(_), _) => unauthorized(message),
            (_, ErrorKind::Validation) | (_, ErrorKind::Configuration) => bad_request(message),
            (_, ErrorKind::Backend) => {
                warn!(error = %message, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message,
                }
            }
        }
    }
}

type ApiResult<T> = std::result::Result<Json<Envelope<T>>, AppError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to a user-scoped backend.
async fn authed(state: &ServerState, headers: &HeaderMap) -> Result<HostedBackend, AppError> {
    let token = bearer(headers).ok_or_else(|| unauthorized("Authentication required"))?;
    let user = accounts::resolve(&state.pool, token)
        .await?
        .ok_or_else(|| unauthorized("Invalid or expired token"))?;
    Ok(state.backend_for(&user.id))
}

fn required(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} is required", field)));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /auth ============

async fn handle_register(
    State(state): State<ServerState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<AuthPayload> {
    let user = accounts::register(&state.pool, &body.username, &body.email, &body.password).await?;
    let token = accounts::open_session(&state.pool, &user.id).await?;
    info!(username = %user.username, "user registered");
    ok(AuthPayload { user, token })
}

async fn handle_login(
    State(state): State<ServerState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<AuthPayload> {
    let user = accounts::verify(&state.pool, &body.username, &body.password)
        .await?
        .ok_or_else(|| unauthorized("Invalid username or password"))?;
    let token = accounts::open_session(&state.pool, &user.id).await?;
    ok(AuthPayload { user, token })
}

async fn handle_logout(State(state): State<ServerState>, headers: HeaderMap) -> ApiResult<()> {
    if let Some(token) = bearer(&headers) {
        accounts::close_session(&state.pool, token).await?;
    }
    ok(())
}

async fn handle_me(State(state): State<ServerState>, headers: HeaderMap) -> ApiResult<MePayload> {
    let token = bearer(&headers).ok_or_else(|| unauthorized("Authentication required"))?;
    let user = accounts::resolve(&state.pool, token)
        .await?
        .ok_or_else(|| unauthorized("Invalid or expired token"))?;
    ok(MePayload { user })
}

// ============ /categories ============

async fn handle_list_categories(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Category>> {
    let backend = authed(&state, &headers).await?;
    ok(backend.list_categories().await?)
}

async fn handle_create_category(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateCategoryRequest>,
) -> ApiResult<Category> {
    let backend = authed(&state, &headers).await?;
    required("name", &body.name)?;
    required("color", &body.color)?;
    ok(backend.create_category(body.name.trim(), &body.color).await?)
}

async fn handle_update_category(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<CategoryPatch>,
) -> ApiResult<Category> {
    let backend = authed(&state, &headers).await?;
    if let Some(name) = &patch.name {
        required("name", name)?;
    }
    if backend.get_category(&id).await?.is_none() {
        return Err(not_found("Category not found"));
    }
    backend.update_category(&id, &patch).await?;
    let updated = backend
        .get_category(&id)
        .await?
        .ok_or_else(|| not_found("Category not found"))?;
    ok(updated)
}

async fn handle_delete_category(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let backend = authed(&state, &headers).await?;
    if backend.get_category(&id).await?.is_none() {
        return Err(not_found("Category not found"));
    }
    backend.delete_category(&id).await?;
    ok(())
}

// ============ /subcategories ============

async fn handle_list_subcategories(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(filter): Query<SubcategoryFilter>,
) -> ApiResult<Vec<Subcategory>> {
    let backend = authed(&state, &headers).await?;
    ok(backend
        .list_subcategories(filter.category_id.as_deref())
        .await?)
}

async fn handle_create_subcategory(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateSubcategoryRequest>,
) -> ApiResult<Subcategory> {
    let backend = authed(&state, &headers).await?;
    required("name", &body.name)?;
    required("category_id", &body.category_id)?;
    ok(backend
        .create_subcategory(&body.category_id, body.name.trim())
        .await?)
}

async fn handle_update_subcategory(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<SubcategoryPatch>,
) -> ApiResult<Subcategory> {
    let backend = authed(&state, &headers).await?;
    if let Some(name) = &patch.name {
        required("name", name)?;
    }
    if backend.get_subcategory(&id).await?.is_none() {
        return Err(not_found("Subcategory not found"));
    }
    backend.update_subcategory(&id, &patch).await?;
    let updated = backend
        .get_subcategory(&id)
        .await?
        .ok_or_else(|| not_found("Subcategory not found"))?;
    ok(updated)
}

async fn handle_delete_subcategory(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let backend = authed(&state, &headers).await?;
    if backend.get_subcategory(&id).await?.is_none() {
        return Err(not_found("Subcategory not found"));
    }
    backend.delete_subcategory(&id).await?;
    ok(())
}

// ============ /notes ============

async fn handle_list_notes(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(filter): Query<NoteFilter>,
) -> ApiResult<Vec<Note>> {
    let backend = authed(&state, &headers).await?;
    let mut notes = backend.list_notes().await?;

    if let Some(sub) = &filter.subcategory_id {
        notes.retain(|n| &n.subcategory_id == sub);
    }
    if let Some(cid) = &filter.category_id {
        let subs: Vec<String> = backend
            .list_subcategories(Some(cid))
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        notes.retain(|n| subs.contains(&n.subcategory_id));
    }
    if let Some(q) = filter.search.as_deref().filter(|q| !q.is_empty()) {
        notes.retain(|n| search::matches_query(n, q));
    }
    let tags = filter.tag_list();
    if !tags.is_empty() {
        notes.retain(|n| tags.iter().any(|t| n.tags.contains(t)));
    }

    let offset = filter.offset.unwrap_or(0) as usize;
    let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    debug!(count = notes.len(), offset, "listing notes");
    ok(notes.into_iter().skip(offset).take(limit).collect())
}

async fn handle_create_note(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<NewNote>,
) -> ApiResult<Note> {
    let backend = authed(&state, &headers).await?;
    required("title", &body.title)?;
    required("subcategory_id", &body.subcategory_id)?;
    ok(backend.create_note(&body).await?)
}

async fn handle_get_note(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Note> {
    let backend = authed(&state, &headers).await?;
    let note = backend
        .get_note(&id)
        .await?
        .ok_or_else(|| not_found("Note not found"))?;
    ok(note)
}

async fn handle_update_note(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<NotePatch>,
) -> ApiResult<Note> {
    let backend = authed(&state, &headers).await?;
    if let Some(title) = &patch.title {
        required("title", title)?;
    }
    if backend.get_note(&id).await?.is_none() {
        return Err(not_found("Note not found"));
    }
    backend.update_note(&id, &patch).await?;
    let updated = backend
        .get_note(&id)
        .await?
        .ok_or_else(|| not_found("Note not found"))?;
    ok(updated)
}

async fn handle_delete_note(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let backend = authed(&state, &headers).await?;
    if backend.get_note(&id).await?.is_none() {
        return Err(not_found("Note not found"));
    }
    backend.delete_note(&id).await?;
    ok(())
}

// ============ /upload/image ============

async fn handle_upload_image(
    State(state): State<ServerState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<ImageUrl> {
    let backend = authed(&state, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| detect_content_type(&file_name).to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;

        let upload = ImageUpload::new(file_name, content_type, bytes.to_vec());
        upload.validate()?;
        let url = backend.upload_image(&upload).await?;
        return ok(ImageUrl { url });
    }
    Err(bad_request("No file provided"))
}

async fn handle_delete_image(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<ImageUrl>,
) -> ApiResult<()> {
    let backend = authed(&state, &headers).await?;
    if state.bucket.key_for_url(&body.url).is_none() {
        return Err(not_found("Image not found"));
    }
    backend.delete_image(&body.url).await?;
    ok(())
}

// ============ GET /search ============

async fn handle_search(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(params): Query<GlobalSearchParams>,
) -> ApiResult<GlobalSearchResults> {
    let backend = authed(&state, &headers).await?;
    let q = params.q.trim();
    if q.is_empty() {
        return Err(bad_request("Search query is required"));
    }
    let lowered = q.to_lowercase();
    let limit = params.limit.map(|l| l as usize).unwrap_or(DEFAULT_SEARCH_LIMIT);
    let wants = |kind: SearchType| params.kind == SearchType::All || params.kind == kind;

    let mut results = GlobalSearchResults::default();
    if wants(SearchType::Notes) {
        results.notes = backend
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| search::matches_query(n, q))
            .take(limit)
            .collect();
    }
    if wants(SearchType::Categories) || wants(SearchType::Subcategories) {
        let categories = backend.list_categories().await?;
        if wants(SearchType::Subcategories) {
            results.subcategories = categories
                .iter()
                .flat_map(|c| c.subcategories.iter())
                .filter(|s| s.name.to_lowercase().contains(&lowered))
                .take(limit)
                .cloned()
                .collect();
        }
        if wants(SearchType::Categories) {
            results.categories = categories
                .into_iter()
                .filter(|c| c.name.to_lowercase().contains(&lowered))
                .take(limit)
                .collect();
        }
    }
    ok(results)
}

// ============ GET /tags ============

async fn handle_tags(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> ApiResult<Vec<TagCount>> {
    let backend = authed(&state, &headers).await?;
    let notes = backend.list_notes().await?;
    ok(search::tag_counts(&notes)
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect())
}

// ============ GET /files/{*key} ============

async fn handle_file(
    State(state): State<ServerState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state
        .bucket
        .read_local(&key)?
        .ok_or_else(|| not_found("File not found"))?;
    Ok((
        [(header::CONTENT_TYPE, detect_content_type(&key))],
        bytes,
    )
        .into_response())
}
