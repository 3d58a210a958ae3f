//! Axum JSON API over the catalog, profile, and sync layers.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cordex_catalog::{CatalogError, CatalogService, SearchParams};
use cordex_store::{Page, Preferences, ProfileStore, StoreError};
use cordex_sync::{SyncError, SyncPipeline};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "cordex-web";

pub const DEFAULT_LISTING_LIMIT: usize = 15;
pub const DEFAULT_TRENDING_LIMIT: usize = 20;
pub const DEFAULT_STATS_LIMIT: usize = 10;
pub const DEFAULT_CONTRIBUTION_LIMIT: usize = 12;
pub const DEFAULT_TOP_PROJECTS_LIMIT: usize = 15;
pub const DEFAULT_ORGANIZATIONS_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
    pub profiles: Arc<dyn ProfileStore>,
    pub sync: Arc<SyncPipeline>,
}

impl AppState {
    pub fn new(
        catalog: Arc<CatalogService>,
        profiles: Arc<dyn ProfileStore>,
        sync: Arc<SyncPipeline>,
    ) -> Self {
        Self {
            catalog,
            profiles,
            sync,
        }
    }
}

/// Every failure the API can surface, mapped to a status code in one place.
/// Handlers propagate with `?`; nothing else decides status codes.
#[derive(Debug)]
pub enum ApiError {
    Catalog(CatalogError),
    Store(StoreError),
    Sync(SyncError),
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::Sync(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Catalog(CatalogError::Store(inner)) => store_status(inner),
            ApiError::Store(inner) => store_status(inner),
            ApiError::Sync(SyncError::AlreadyRunning) => StatusCode::CONFLICT,
            ApiError::Sync(SyncError::Download { .. }) | ApiError::Sync(SyncError::Transport(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Sync(SyncError::Budget { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Sync(SyncError::Archive { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Sync(SyncError::Store(inner)) => store_status(inner),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Catalog(err) => err.to_string(),
            ApiError::Store(err) => err.to_string(),
            ApiError::Sync(err) => err.to_string(),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, message = %self.message(), "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/projects", get(list_handler))
        .route("/api/projects/search", get(search_handler))
        .route("/api/projects/recent", get(recent_handler))
        .route("/api/projects/expiring-soon", get(expiring_soon_handler))
        .route("/api/projects/closed", get(closed_handler))
        .route("/api/organizations", get(organizations_handler))
        .route("/api/projects/{id}", get(project_handler))
        .route("/api/projects/{id}/keywords", get(project_keywords_handler))
        .route("/api/keywords/trending", get(trending_handler))
        .route("/api/keywords/suggest", get(suggest_handler))
        .route("/api/statistics/projects-by-country", get(stats_by_country_handler))
        .route("/api/statistics/projects-per-programme", get(stats_per_programme_handler))
        .route("/api/statistics/contribution-by-country", get(stats_contribution_handler))
        .route("/api/statistics/projects-over-time", get(stats_over_time_handler))
        .route("/api/statistics/top-organizations", get(stats_top_orgs_handler))
        .route("/api/statistics/top-projects", get(stats_top_projects_handler))
        .route("/api/statistics/summary", get(stats_summary_handler))
        .route("/api/sync", post(sync_handler))
        .route(
            "/api/users/{user}/favorites",
            get(favorites_handler)
                .post(add_favorite_handler)
                .put(reorder_favorites_handler)
                .delete(clear_favorites_handler),
        )
        .route(
            "/api/users/{user}/favorites/{project_id}",
            delete(remove_favorite_handler),
        )
        .route(
            "/api/users/{user}/history",
            get(history_handler)
                .post(record_view_handler)
                .delete(clear_history_handler),
        )
        .route(
            "/api/users/{user}/history/{project_id}",
            delete(remove_view_handler),
        )
        .route(
            "/api/users/{user}/preferences",
            get(preferences_handler).put(set_preferences_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("CORDEX_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    q: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ProjectIdBody {
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct FavoriteOrderBody {
    order: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    analyzer_available: bool,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        analyzer_available: state.catalog.analyzer_available(),
    })
}

#[derive(Debug, Serialize)]
struct ListResponse {
    projects: Vec<cordex_core::Project>,
    total: u64,
    page: usize,
    per_page: usize,
}

async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<ListResponse> {
    let page = Page::new(
        query.page.unwrap_or(1),
        query
            .per_page
            .unwrap_or(cordex_catalog::DEFAULT_PER_PAGE)
            .clamp(1, cordex_catalog::MAX_PER_PAGE),
    );
    let (projects, total) = state.catalog.list(page).await?;
    Ok(Json(ListResponse {
        projects,
        total,
        page: page.number(),
        per_page: page.per_page(),
    }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<cordex_catalog::SearchResults> {
    Ok(Json(state.catalog.search(&params).await?))
}

async fn project_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<cordex_catalog::EnrichedProject> {
    Ok(Json(state.catalog.fetch(&id).await?))
}

async fn recent_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::EnrichedProject>> {
    let limit = query.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
    Ok(Json(state.catalog.recent(limit).await?))
}

async fn expiring_soon_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::EnrichedProject>> {
    let limit = query.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
    Ok(Json(state.catalog.expiring_soon(limit).await?))
}

async fn closed_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::EnrichedProject>> {
    let limit = query.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
    Ok(Json(state.catalog.closed(limit).await?))
}

async fn organizations_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::OrganizationEntry>> {
    let links = state.catalog.store().scan_links().await?;
    Ok(Json(cordex_catalog::organization_directory(
        &links,
        query.limit.unwrap_or(DEFAULT_ORGANIZATIONS_LIMIT),
    )))
}

async fn project_keywords_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Vec<String>> {
    Ok(Json(state.catalog.project_keywords(&id).await?))
}

async fn trending_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::KeywordCount>> {
    let limit = query.limit.unwrap_or(DEFAULT_TRENDING_LIMIT);
    Ok(Json(state.catalog.trending_keywords(limit).await?))
}

async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestQuery>,
) -> ApiResult<Vec<String>> {
    let needle = query.q.unwrap_or_default();
    let limit = query.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
    Ok(Json(state.catalog.keyword_suggestions(&needle, limit).await?))
}

async fn stats_by_country_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::CountryProjects>> {
    let links = state.catalog.store().scan_links().await?;
    Ok(Json(cordex_catalog::projects_by_country(
        &links,
        query.limit.unwrap_or(DEFAULT_STATS_LIMIT),
    )))
}

async fn stats_per_programme_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<cordex_catalog::ProgrammeProjects>> {
    let projects = state.catalog.store().scan_projects().await?;
    Ok(Json(cordex_catalog::projects_per_programme(&projects)))
}

async fn stats_contribution_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::CountryContribution>> {
    let projects = state.catalog.store().scan_projects().await?;
    let links = state.catalog.store().scan_links().await?;
    Ok(Json(cordex_catalog::eu_contribution_by_country(
        &projects,
        &links,
        query.limit.unwrap_or(DEFAULT_CONTRIBUTION_LIMIT),
    )))
}

async fn stats_over_time_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<cordex_catalog::YearProjects>> {
    let projects = state.catalog.store().scan_projects().await?;
    Ok(Json(cordex_catalog::projects_over_time(&projects)))
}

async fn stats_top_orgs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::TopOrganization>> {
    let links = state.catalog.store().scan_links().await?;
    Ok(Json(cordex_catalog::top_organizations(
        &links,
        query.limit.unwrap_or(DEFAULT_STATS_LIMIT),
    )))
}

async fn stats_top_projects_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<cordex_catalog::TopProject>> {
    let projects = state.catalog.store().scan_projects().await?;
    Ok(Json(cordex_catalog::top_projects_by_contribution(
        &projects,
        query.limit.unwrap_or(DEFAULT_TOP_PROJECTS_LIMIT),
    )))
}

async fn stats_summary_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<cordex_catalog::CatalogSummary> {
    let projects = state.catalog.store().scan_projects().await?;
    let links = state.catalog.store().scan_links().await?;
    Ok(Json(cordex_catalog::catalog_summary(&projects, &links)))
}

/// Synchronous trigger: the response carries the full run summary. A second
/// trigger while a run is in flight gets 409.
async fn sync_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<cordex_sync::SyncRunSummary> {
    Ok(Json(state.sync.run_once().await?))
}

#[derive(Debug, Serialize)]
struct FavoritesResponse {
    favorites: Vec<String>,
}

async fn favorites_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
) -> ApiResult<FavoritesResponse> {
    let favorites = state.profiles.favorites(&user).await?;
    Ok(Json(FavoritesResponse { favorites }))
}

async fn add_favorite_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
    Json(body): Json<ProjectIdBody>,
) -> ApiResult<FavoritesResponse> {
    state.profiles.add_favorite(&user, &body.project_id).await?;
    let favorites = state.profiles.favorites(&user).await?;
    Ok(Json(FavoritesResponse { favorites }))
}

async fn reorder_favorites_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
    Json(body): Json<FavoriteOrderBody>,
) -> ApiResult<FavoritesResponse> {
    state.profiles.reorder_favorites(&user, body.order).await?;
    let favorites = state.profiles.favorites(&user).await?;
    Ok(Json(FavoritesResponse { favorites }))
}

async fn remove_favorite_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((user, project_id)): AxumPath<(String, String)>,
) -> ApiResult<FavoritesResponse> {
    state.profiles.remove_favorite(&user, &project_id).await?;
    let favorites = state.profiles.favorites(&user).await?;
    Ok(Json(FavoritesResponse { favorites }))
}

async fn clear_favorites_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
) -> ApiResult<FavoritesResponse> {
    state.profiles.clear_favorites(&user).await?;
    Ok(Json(FavoritesResponse {
        favorites: Vec::new(),
    }))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<cordex_store::HistoryEntry>,
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<HistoryResponse> {
    let limit = query.limit.unwrap_or(cordex_store::HISTORY_CAP);
    let history = state.profiles.history(&user, limit).await?;
    Ok(Json(HistoryResponse { history }))
}

async fn record_view_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
    Json(body): Json<ProjectIdBody>,
) -> Result<StatusCode, ApiError> {
    state.profiles.record_view(&user, &body.project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_view_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((user, project_id)): AxumPath<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.profiles.remove_view(&user, &project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.profiles.clear_history(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn preferences_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
) -> ApiResult<Preferences> {
    Ok(Json(state.profiles.preferences(&user).await?))
}

async fn set_preferences_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<String>,
    Json(body): Json<Preferences>,
) -> ApiResult<Preferences> {
    state.profiles.set_preferences(&user, body.clone()).await?;
    Ok(Json(body))
}
