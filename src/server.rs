//! JSON HTTP API.
//!
//! Serves projects, versions, pages, navigation trees, images, search, and
//! bundle upload over REST. Handlers delegate to the same core functions
//! the CLI commands use; the server just adds routing, auth, and the JSON
//! error envelope.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (always open) |
//! | `GET`/`POST` | `/api/v1/projects` | List / create projects |
//! | `GET`/`PATCH`/`DELETE` | `/api/v1/projects/{machine_name}` | Retrieve / update / delete |
//! | `GET` | `/api/v1/projects/{machine_name}/latest` | The latest version |
//! | `GET` | `/api/v1/projects/{machine_name}/versions` | List versions |
//! | `GET`/`DELETE` | `…/versions/{version}` | Retrieve / delete a version |
//! | `GET` | `…/versions/{version}/tree` | Reconstructed page tree |
//! | `GET` | `…/versions/{version}/toc` | Parsed global contents |
//! | `GET` | `…/versions/{version}/pages/{path}` | Page detail |
//! | `GET` | `…/versions/{version}/images/{id}` | Image bytes |
//! | `POST` | `/api/v1/import?force=` | Upload a zip bundle |
//! | `GET`/`POST` | `/api/v1/classifiers` | List / create classifiers |
//! | `GET` | `/api/v1/search` | Full-text search with facets |
//!
//! # Auth
//!
//! Bearer API keys from `[server].api_keys`. An empty key list disables
//! auth entirely (private-network deployments); `/health` is always open.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: x" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found`
//! (404), `conflict` (409), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::classifiers;
use crate::config::Config;
use crate::db;
use crate::get as pages;
use crate::importer::{self, ImportError};
use crate::media;
use crate::models::{PageImage, Project, Version};
use crate::projects;
use crate::search;
use crate::toc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Starts the HTTP server. Binds to `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pool: db::connect(config).await?,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/projects", get(handle_list_projects).post(handle_create_project))
        .route(
            "/projects/{machine_name}",
            get(handle_get_project)
                .patch(handle_update_project)
                .delete(handle_delete_project),
        )
        .route("/projects/{machine_name}/latest", get(handle_latest))
        .route("/projects/{machine_name}/versions", get(handle_list_versions))
        .route(
            "/projects/{machine_name}/versions/{version}",
            get(handle_get_version).delete(handle_delete_version),
        )
        .route(
            "/projects/{machine_name}/versions/{version}/tree",
            get(handle_tree),
        )
        .route(
            "/projects/{machine_name}/versions/{version}/toc",
            get(handle_toc),
        )
        .route(
            "/projects/{machine_name}/versions/{version}/pages/{*path}",
            get(handle_get_page),
        )
        .route(
            "/projects/{machine_name}/versions/{version}/images/{id}",
            get(handle_get_image),
        )
        .route(
            "/import",
            post(handle_import).layer(DefaultBodyLimit::max(512 * 1024 * 1024)),
        )
        .route(
            "/classifiers",
            get(handle_list_classifiers).post(handle_create_classifier),
        )
        .route("/search", get(handle_search))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let app = Router::new()
        .route("/health", get(handle_health))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    println!("docharbor API listening on http://{}", bind_addr);
    if config.server.api_keys.is_empty() {
        println!("Warning: no API keys configured, requests are unauthenticated.");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Auth ============

/// Bearer-token gate over the `/api/v1` routes. An empty configured key
/// list disables the check.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.server.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if state.config.server.api_keys.iter().any(|key| key == token) => {
            Ok(next.run(request).await)
        }
        _ => Err(unauthorized("missing or invalid API key")),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps core-layer errors to HTTP responses: typed import errors get
/// precise statuses, message patterns cover the validation helpers.
fn classify_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<ImportError>() {
        Some(ImportError::UnknownProject(_)) => return not_found(err.to_string()),
        Some(ImportError::VersionExists { .. }) => return conflict(err.to_string()),
        Some(ImportError::MissingGlobalContext) | Some(ImportError::InvalidBundle(_)) => {
            return bad_request(err.to_string())
        }
        None => {}
    }

    let msg = err.to_string();
    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("invalid")
        || msg.contains("already exists")
    {
        if msg.contains("already exists") {
            conflict(msg)
        } else {
            bad_request(msg)
        }
    } else {
        internal(msg)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        classify_error(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        internal(err.to_string())
    }
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

// ============ Projects ============

#[derive(Serialize)]
struct ProjectDetail {
    #[serde(flatten)]
    project: Project,
    classifiers: Vec<String>,
    related_links: Vec<crate::models::RelatedLink>,
    latest_version: Option<String>,
}

async fn project_detail(pool: &SqlitePool, project: Project) -> Result<ProjectDetail, AppError> {
    let classifier_names = classifiers::project_classifiers(pool, &project.id).await?;
    let links = projects::related_links(pool, &project.id).await?;
    let versions = projects::list_versions(pool, &project.id).await?;
    let latest_version = versions
        .iter()
        .find(|v| v.is_latest)
        .map(|v| v.version.clone());
    Ok(ProjectDetail {
        project,
        classifiers: classifier_names,
        related_links: links,
        latest_version,
    })
}

#[derive(Deserialize)]
struct ListProjectsQuery {
    classifier: Option<String>,
    q: Option<String>,
}

#[derive(Serialize)]
struct ProjectListResponse {
    projects: Vec<ProjectDetail>,
}

async fn handle_list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<ProjectListResponse>, AppError> {
    let found = projects::list_projects(
        &state.pool,
        query.classifier.as_deref(),
        query.q.as_deref(),
    )
    .await?;

    let mut details = Vec::with_capacity(found.len());
    for project in found {
        details.push(project_detail(&state.pool, project).await?);
    }
    Ok(Json(ProjectListResponse { projects: details }))
}

#[derive(Deserialize)]
struct CreateProjectRequest {
    machine_name: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    classifiers: Vec<String>,
}

async fn handle_create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectDetail>), AppError> {
    let project = projects::create_project(
        &state.pool,
        &request.machine_name,
        &request.title,
        request.description.as_deref(),
    )
    .await?;
    for name in &request.classifiers {
        classifiers::classify_project(&state.pool, &project.machine_name, name).await?;
    }
    info!(project = %project.machine_name, "project created");
    let detail = project_detail(&state.pool, project).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn handle_get_project(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
) -> Result<Json<ProjectDetail>, AppError> {
    let project = projects::get_project(&state.pool, &machine_name)
        .await?
        .ok_or_else(|| not_found(format!("project not found: {machine_name}")))?;
    Ok(Json(project_detail(&state.pool, project).await?))
}

#[derive(Deserialize)]
struct UpdateProjectRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// When present, replaces the project's classifier set.
    #[serde(default)]
    classifiers: Option<Vec<String>>,
}

async fn handle_update_project(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
    Json(request): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectDetail>, AppError> {
    let project = projects::update_project(
        &state.pool,
        &machine_name,
        request.title.as_deref(),
        request.description.as_deref(),
    )
    .await?;

    if let Some(names) = &request.classifiers {
        sqlx::query("DELETE FROM project_classifiers WHERE project_id = ?")
            .bind(&project.id)
            .execute(&state.pool)
            .await?;
        for name in names {
            classifiers::classify_project(&state.pool, &machine_name, name).await?;
        }
    }

    Ok(Json(project_detail(&state.pool, project).await?))
}

async fn handle_delete_project(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted =
        projects::delete_project(&state.pool, &state.config.media.root, &machine_name).await?;
    if deleted {
        info!(project = %machine_name, "project deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("project not found: {machine_name}")))
    }
}

// ============ Versions ============

async fn resolve_version(
    state: &AppState,
    machine_name: &str,
    version: &str,
) -> Result<Version, AppError> {
    let project = projects::get_project(&state.pool, machine_name)
        .await?
        .ok_or_else(|| not_found(format!("project not found: {machine_name}")))?;
    projects::get_version(&state.pool, &project.id, version)
        .await?
        .ok_or_else(|| not_found(format!("version not found: {machine_name} {version}")))
}

#[derive(Serialize)]
struct VersionListResponse {
    versions: Vec<Version>,
}

async fn handle_list_versions(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
) -> Result<Json<VersionListResponse>, AppError> {
    let project = projects::get_project(&state.pool, &machine_name)
        .await?
        .ok_or_else(|| not_found(format!("project not found: {machine_name}")))?;
    let versions = projects::list_versions(&state.pool, &project.id).await?;
    Ok(Json(VersionListResponse { versions }))
}

async fn handle_latest(
    State(state): State<AppState>,
    Path(machine_name): Path<String>,
) -> Result<Json<Version>, AppError> {
    let project = projects::get_project(&state.pool, &machine_name)
        .await?
        .ok_or_else(|| not_found(format!("project not found: {machine_name}")))?;
    let versions = projects::list_versions(&state.pool, &project.id).await?;
    versions
        .into_iter()
        .find(|v| v.is_latest)
        .map(Json)
        .ok_or_else(|| not_found(format!("no versions imported for {machine_name}")))
}

async fn handle_get_version(
    State(state): State<AppState>,
    Path((machine_name, version)): Path<(String, String)>,
) -> Result<Json<Version>, AppError> {
    Ok(Json(resolve_version(&state, &machine_name, &version).await?))
}

async fn handle_delete_version(
    State(state): State<AppState>,
    Path((machine_name, version)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let deleted =
        projects::delete_version(&state.pool, &state.config, &machine_name, &version).await?;
    if deleted {
        info!(project = %machine_name, %version, "version deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!(
            "version not found: {machine_name} {version}"
        )))
    }
}

// ============ Navigation ============

async fn handle_tree(
    State(state): State<AppState>,
    Path((machine_name, version)): Path<(String, String)>,
) -> Result<Json<toc::TreeNode>, AppError> {
    let found = resolve_version(&state, &machine_name, &version).await?;
    let head_id = found
        .head_page_id
        .ok_or_else(|| not_found(format!("version has no pages: {machine_name} {version}")))?;
    let links = toc::page_links(&state.pool, &found.id).await?;
    toc::build_page_tree(&links, &head_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("version has no pages: {machine_name} {version}")))
}

#[derive(Serialize)]
struct TocResponse {
    entries: Vec<toc::TocEntry>,
}

async fn handle_toc(
    State(state): State<AppState>,
    Path((machine_name, version)): Path<(String, String)>,
) -> Result<Json<TocResponse>, AppError> {
    let found = resolve_version(&state, &machine_name, &version).await?;
    let entries = match found.global_toc.as_deref() {
        Some(html) => toc::parse_global_toc(html, state.config.toc.max_depth)?,
        None => Vec::new(),
    };
    Ok(Json(TocResponse { entries }))
}

// ============ Pages & images ============

async fn handle_get_page(
    State(state): State<AppState>,
    Path((machine_name, version, path)): Path<(String, String, String)>,
) -> Result<Json<pages::PageResponse>, AppError> {
    pages::get_page(&state.pool, &machine_name, &version, &path)
        .await?
        .map(Json)
        .ok_or_else(|| {
            not_found(format!("page not found: {machine_name} {version} {path}"))
        })
}

async fn handle_get_image(
    State(state): State<AppState>,
    Path((machine_name, version, id)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let found = resolve_version(&state, &machine_name, &version).await?;

    let row = sqlx::query(
        "SELECT id, version_id, orig_path, file_path, content_hash FROM images \
         WHERE id = ? AND version_id = ?",
    )
    .bind(&id)
    .bind(&found.id)
    .fetch_optional(&state.pool)
    .await?;
    let Some(row) = row else {
        return Err(not_found(format!("image not found: {id}")));
    };
    let image = PageImage {
        id: row.get("id"),
        version_id: row.get("version_id"),
        orig_path: row.get("orig_path"),
        file_path: row.get("file_path"),
        content_hash: row.get("content_hash"),
    };

    let bytes = tokio::fs::read(&image.file_path)
        .await
        .map_err(|e| internal(format!("failed to read image {}: {e}", image.file_path)))?;
    let content_type = media::content_type_for(&image.orig_path);

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

// ============ Import ============

#[derive(Deserialize)]
struct ImportQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct ImportResponse {
    project: String,
    version: String,
    pages: usize,
    images: usize,
}

/// Accepts a zip bundle as the raw request body, stages it to a temp file,
/// and runs the import pipeline on it.
async fn handle_import(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<ImportResponse>), AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must be a zip bundle"));
    }

    // Staging and the zip parse are file-heavy; keep them off the async
    // worker threads.
    let bundle = tokio::task::spawn_blocking(move || {
        let staged =
            std::env::temp_dir().join(format!("docharbor-upload-{}.zip", Uuid::new_v4()));
        let loaded = std::fs::write(&staged, &body)
            .map_err(|e| anyhow::anyhow!("failed to stage upload: {e}"))
            .and_then(|_| importer::Bundle::load(&staged));
        let _ = std::fs::remove_file(&staged);
        loaded
    })
    .await
    .map_err(|e| internal(format!("import task failed: {e}")))??;

    let outcome =
        importer::import_loaded_bundle(&state.pool, &state.config, &bundle, query.force).await?;

    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            project: outcome.machine_name,
            version: outcome.version,
            pages: outcome.pages,
            images: outcome.images,
        }),
    ))
}

// ============ Classifiers ============

#[derive(Serialize)]
struct ClassifierListResponse {
    classifiers: Vec<crate::models::Classifier>,
    tree: Vec<classifiers::ClassifierNode>,
}

async fn handle_list_classifiers(
    State(state): State<AppState>,
) -> Result<Json<ClassifierListResponse>, AppError> {
    let found = classifiers::list_classifiers(&state.pool).await?;
    let names: Vec<String> = found.iter().map(|c| c.name.clone()).collect();
    let tree = classifiers::build_tree(&names);
    Ok(Json(ClassifierListResponse {
        classifiers: found,
        tree,
    }))
}

#[derive(Deserialize)]
struct CreateClassifierRequest {
    name: String,
}

async fn handle_create_classifier(
    State(state): State<AppState>,
    Json(request): Json<CreateClassifierRequest>,
) -> Result<(StatusCode, Json<crate::models::Classifier>), AppError> {
    let classifier = classifiers::ensure_classifier(&state.pool, &request.name).await?;
    Ok((StatusCode::CREATED, Json(classifier)))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    project: Option<String>,
    version: Option<String>,
    classifier: Option<String>,
    #[serde(default)]
    latest: bool,
    limit: Option<i64>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<search::SearchResults>, AppError> {
    if query.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let filters = search::SearchFilters {
        project: query.project,
        version: query.version,
        classifier: query.classifier,
        latest: query.latest,
        limit: query.limit,
    };
    let results = search::search_pages(&state.pool, &state.config, &query.q, &filters)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            // FTS5 reports unbalanced quotes etc. as syntax errors
            if msg.contains("syntax error") || msg.contains("fts5") {
                bad_request(format!("invalid query: {msg}"))
            } else {
                classify_error(e)
            }
        })?;
    Ok(Json(results))
}
