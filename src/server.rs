//! REST API over the PRD pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version and configured backends |
//! | `POST` | `/prds` | Create a PRD from JSON sections |
//! | `POST` | `/prds/markdown` | Create a PRD from Markdown text |
//! | `GET`  | `/prds` | List PRDs |
//! | `GET`  | `/prds/{id}` | PRD with sections, chunks and tests |
//! | `DELETE` | `/prds/{id}` | Delete a PRD everywhere |
//! | `GET`  | `/prds/{id}/chunks` | Chunks of a PRD |
//! | `POST` | `/prds/{id}/optimize` | LLM optimisation |
//! | `GET`  | `/prds/{id}/export/markdown` | Markdown export |
//! | `GET`  | `/prds/{id}/test-coverage` | Requirements covered by tests |
//! | `GET`  | `/prds/{id}/documentation-coverage` | Requirements covered by docs |
//! | `POST` | `/prds/{id}/generate-test-suite` | LLM tests for every requirement |
//! | `GET`  | `/prds/{id}/tests` | Test chunks with the requirement they test |
//! | `POST` | `/prds/{id}/generate-user-manual` | LLM user manual (`?audience=`) |
//! | `POST` | `/prds/{id}/generate-api-docs` | LLM API documentation |
//! | `POST` | `/prds/{id}/generate-technical-spec` | LLM technical specification |
//! | `POST` | `/prds/{id}/generate-release-notes` | LLM release notes for a version |
//! | `POST` | `/search` | Semantic, keyword or hybrid search |
//! | `GET`  | `/chunks/{id}` | One chunk |
//! | `PATCH` | `/chunks/{id}` | Edit text, type, priority or tags and re-index |
//! | `POST` | `/chunks/{id}/generate-tests` | LLM tests for one requirement |
//! | `GET`  | `/chunks/{id}/tests` | Tests linked to a requirement |
//! | `GET`  | `/chunks/{id}/documentation` | Documentation linked to a requirement |
//! | `GET`  | `/chunks/{id}/context` | Graph neighbourhood of a chunk |
//! | `GET`  | `/graph/chunks/{id}/dependencies` | Direct, transitive and circular dependencies |
//! | `GET`  | `/graph/chunks/{id}/dependents` | Chunks depending on this one |
//! | `POST` | `/graph/relationships` | Create an edge by hand |
//! | `GET`  | `/stats` | Store, graph and vector statistics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `llm_unavailable` (400),
//! `internal` (500). Request bodies that are not valid JSON for the endpoint
//! are a `bad_request` in the same envelope.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{classify, PipelineError};
use crate::export::render_markdown;
use crate::generate::{self, DocKind, TestOptions, TestType};
use crate::graph::ChunkNode;
use crate::llm::{ChatClient, OpenRouterClient};
use crate::models::{Chunk, NewPrd, RelationshipType};
use crate::optimize::{self, DEFAULT_GOAL};
use crate::parser::parse_markdown;
use crate::pipeline::{ChunkPatch, Pipeline};
use crate::search::{SearchHit, SearchMode};
use crate::vector::SearchFilters;

const MAX_SEARCH_LIMIT: usize = 100;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    /// Fixed chat client; when `None` one is built from `[llm]` per request.
    llm: Option<Arc<dyn ChatClient>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn ChatClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    fn chat_client(&self) -> Result<Arc<dyn ChatClient>, AppError> {
        match &self.llm {
            Some(client) => Ok(client.clone()),
            None => {
                let client = OpenRouterClient::from_config(&self.pipeline.config().llm)
                    .map_err(AppError::from)?;
                Ok(Arc::new(client))
            }
        }
    }
}

/// Open the pipeline and serve the API on `[server].bind` until terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = Arc::new(Pipeline::open(config).await?);
    let app = build_router(AppState::new(pipeline));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("cvPRD API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/prds", post(handle_create_prd).get(handle_list_prds))
        .route("/prds/markdown", post(handle_create_markdown))
        .route("/prds/{id}", get(handle_get_prd).delete(handle_delete_prd))
        .route("/prds/{id}/chunks", get(handle_prd_chunks))
        .route("/prds/{id}/optimize", post(handle_optimize))
        .route("/prds/{id}/export/markdown", get(handle_export_markdown))
        .route("/prds/{id}/test-coverage", get(handle_test_coverage))
        .route("/prds/{id}/documentation-coverage", get(handle_doc_coverage))
        .route("/prds/{id}/generate-test-suite", post(handle_generate_test_suite))
        .route("/prds/{id}/tests", get(handle_prd_tests))
        .route("/prds/{id}/generate-user-manual", post(handle_generate_user_manual))
        .route("/prds/{id}/generate-api-docs", post(handle_generate_api_docs))
        .route("/prds/{id}/generate-technical-spec", post(handle_generate_technical_spec))
        .route("/prds/{id}/generate-release-notes", post(handle_generate_release_notes))
        .route("/search", post(handle_search))
        .route("/chunks/{id}", get(handle_get_chunk).patch(handle_patch_chunk))
        .route("/chunks/{id}/context", get(handle_chunk_context))
        .route("/chunks/{id}/generate-tests", post(handle_generate_tests))
        .route("/chunks/{id}/tests", get(handle_chunk_tests))
        .route("/chunks/{id}/documentation", get(handle_chunk_documentation))
        .route("/graph/chunks/{id}/dependencies", get(handle_dependencies))
        .route("/graph/chunks/{id}/dependents", get(handle_dependents))
        .route("/graph/relationships", post(handle_create_relationship))
        .route("/stats", get(handle_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// Typed pipeline failures map to 4xx; anything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match classify(&err) {
            Some(PipelineError::NotFound(_)) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            Some(PipelineError::Validation(msg)) => bad_request(msg.clone()),
            Some(e @ PipelineError::LlmUnavailable(_)) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "llm_unavailable",
                message: e.to_string(),
            },
            None => {
                tracing::error!(error = ?err, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: format!("{:#}", err),
                }
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

/// `Json` whose rejections use the API error envelope.
struct ApiJson<T>(T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(bad_request(rejection.body_text())),
        }
    }
}

// ============ Health & stats ============

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.health())
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult<crate::pipeline::Stats> {
    Ok(Json(state.pipeline.stats().await?))
}

// ============ PRDs ============

async fn handle_create_prd(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewPrd>,
) -> ApiResult<crate::pipeline::ProcessResult> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    Ok(Json(state.pipeline.process_prd(req.into_prd()).await?))
}

#[derive(Deserialize)]
struct CreateMarkdownRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    content: String,
}

async fn handle_create_markdown(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateMarkdownRequest>,
) -> ApiResult<crate::pipeline::ProcessResult> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    let prd = parse_markdown(&req.content, req.name.trim(), req.description);
    Ok(Json(state.pipeline.process_prd(prd).await?))
}

#[derive(Serialize)]
struct PrdListResponse {
    prds: Vec<crate::models::PrdSummary>,
}

async fn handle_list_prds(State(state): State<AppState>) -> ApiResult<PrdListResponse> {
    Ok(Json(PrdListResponse {
        prds: state.pipeline.list_prds().await?,
    }))
}

async fn handle_get_prd(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::models::PrdDetails> {
    Ok(Json(state.pipeline.get_prd(&id).await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    status: &'static str,
    prd_id: String,
}

async fn handle_delete_prd(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    state.pipeline.delete_prd(&id).await?;
    Ok(Json(DeleteResponse {
        status: "deleted",
        prd_id: id,
    }))
}

async fn handle_prd_chunks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Chunk>> {
    Ok(Json(state.pipeline.prd_chunks(&id).await?))
}

#[derive(Deserialize)]
struct OptimizeParams {
    optimization_goal: Option<String>,
}

async fn handle_optimize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OptimizeParams>,
) -> ApiResult<optimize::OptimizationReport> {
    // Unknown PRDs are a 404 even when no LLM is configured.
    state.pipeline.load_prd(&id).await?;
    let client = state.chat_client()?;
    let goal = params
        .optimization_goal
        .filter(|g| !g.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GOAL.to_string());
    Ok(Json(
        optimize::optimize_prd(&state.pipeline, client.as_ref(), &id, &goal).await?,
    ))
}

async fn handle_export_markdown(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let details = state.pipeline.get_prd(&id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_markdown(&details),
    )
        .into_response())
}

async fn handle_test_coverage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::graph::Coverage> {
    Ok(Json(
        state.pipeline.coverage(&id, RelationshipType::Tests).await?,
    ))
}

async fn handle_doc_coverage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::graph::Coverage> {
    Ok(Json(
        state
            .pipeline
            .coverage(&id, RelationshipType::Documents)
            .await?,
    ))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    prd_id: Option<String>,
    #[serde(default)]
    filters: Option<SearchFilters>,
    #[serde(default)]
    mode: Option<String>,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchHit>,
    count: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SearchRequest>,
) -> ApiResult<SearchResponse> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !(1..=MAX_SEARCH_LIMIT).contains(&req.limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }
    let mode = match req.mode.as_deref() {
        None => SearchMode::default(),
        Some(m) => SearchMode::parse(m).ok_or_else(|| {
            bad_request(format!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                m
            ))
        })?,
    };

    let mut filters = req.filters.unwrap_or_default();
    if req.prd_id.is_some() {
        filters.prd_id = req.prd_id;
    }

    let results = state
        .pipeline
        .search(&req.query, mode, req.limit, &filters)
        .await?;
    Ok(Json(SearchResponse {
        query: req.query,
        count: results.len(),
        results,
    }))
}

// ============ Chunks & graph ============

async fn handle_get_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Chunk> {
    Ok(Json(state.pipeline.get_chunk(&id).await?))
}

async fn handle_patch_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<ChunkPatch>,
) -> ApiResult<Chunk> {
    Ok(Json(state.pipeline.patch_chunk(&id, patch).await?))
}

#[derive(Deserialize)]
struct ContextParams {
    #[serde(default = "default_context_depth")]
    max_depth: usize,
}

fn default_context_depth() -> usize {
    2
}

async fn handle_chunk_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ContextParams>,
) -> ApiResult<crate::pipeline::ChunkContext> {
    Ok(Json(
        state.pipeline.chunk_context(&id, params.max_depth).await?,
    ))
}

#[derive(Deserialize)]
struct DependencyParams {
    #[serde(default = "default_dependency_depth")]
    depth: usize,
}

fn default_dependency_depth() -> usize {
    3
}

async fn handle_dependencies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DependencyParams>,
) -> ApiResult<crate::pipeline::DependencyReport> {
    Ok(Json(
        state.pipeline.dependency_report(&id, params.depth).await?,
    ))
}

async fn handle_dependents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ChunkNode>> {
    Ok(Json(state.pipeline.dependents(&id).await?))
}

#[derive(Deserialize)]
struct CreateRelationshipRequest {
    source_chunk_id: String,
    target_chunk_id: String,
    relationship_type: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CreatedResponse {
    status: &'static str,
}

async fn handle_create_relationship(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateRelationshipRequest>,
) -> ApiResult<CreatedResponse> {
    let rel_type = RelationshipType::parse(&req.relationship_type).ok_or_else(|| {
        bad_request(format!(
            "unknown relationship type: {}",
            req.relationship_type
        ))
    })?;
    let strength = req
        .metadata
        .as_ref()
        .and_then(|m| m.get("strength"))
        .and_then(|s| s.as_f64());

    state
        .pipeline
        .create_manual_relationship(&req.source_chunk_id, &req.target_chunk_id, rel_type, strength)
        .await?;
    Ok(Json(CreatedResponse { status: "created" }))
}

// ============ Generated tests ============

#[derive(Deserialize)]
struct GenerateTestsRequest {
    #[serde(default = "default_test_type")]
    test_type: String,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default = "default_true")]
    include_code_stub: bool,
}

fn default_test_type() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct GenerateTestsResponse {
    chunk_id: String,
    test_cases: Vec<generate::GeneratedTest>,
    count: usize,
}

async fn handle_generate_tests(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<GenerateTestsRequest>,
) -> ApiResult<GenerateTestsResponse> {
    state.pipeline.get_chunk(&id).await?;
    let client = state.chat_client()?;
    let options = TestOptions {
        test_type: TestType::parse_lenient(&req.test_type),
        framework: req.framework.filter(|f| !f.trim().is_empty()),
        include_code_stub: req.include_code_stub,
    };
    let test_cases = generate::generate_tests(&state.pipeline, client.as_ref(), &id, &options).await?;
    Ok(Json(GenerateTestsResponse {
        chunk_id: id,
        count: test_cases.len(),
        test_cases,
    }))
}

#[derive(Deserialize, Default)]
struct GenerateTestSuiteRequest {
    #[serde(default)]
    framework: Option<String>,
}

async fn handle_generate_test_suite(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<GenerateTestSuiteRequest>,
) -> ApiResult<generate::TestSuiteReport> {
    state.pipeline.load_prd(&id).await?;
    let client = state.chat_client()?;
    let framework = req.framework.filter(|f| !f.trim().is_empty());
    Ok(Json(
        generate::generate_test_suite(&state.pipeline, client.as_ref(), &id, framework).await?,
    ))
}

#[derive(Serialize)]
struct TestListResponse {
    tests: Vec<generate::TestSummary>,
}

async fn handle_prd_tests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TestListResponse> {
    Ok(Json(TestListResponse {
        tests: generate::prd_tests(&state.pipeline, &id).await?,
    }))
}

async fn handle_chunk_tests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Chunk>> {
    Ok(Json(generate::chunk_tests(&state.pipeline, &id).await?))
}

// ============ Generated documentation ============

#[derive(Deserialize)]
struct ManualParams {
    #[serde(default = "default_audience")]
    audience: String,
}

fn default_audience() -> String {
    "end users".to_string()
}

async fn docs_response(
    state: &AppState,
    id: &str,
    kind: DocKind,
    audience: &str,
) -> ApiResult<generate::DocReport> {
    state.pipeline.load_prd(id).await?;
    let client = state.chat_client()?;
    Ok(Json(
        generate::generate_docs(&state.pipeline, client.as_ref(), id, kind, audience).await?,
    ))
}

async fn handle_generate_user_manual(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ManualParams>,
) -> ApiResult<generate::DocReport> {
    docs_response(&state, &id, DocKind::UserManual, &params.audience).await
}

async fn handle_generate_api_docs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<generate::DocReport> {
    docs_response(&state, &id, DocKind::ApiDocs, "").await
}

async fn handle_generate_technical_spec(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<generate::DocReport> {
    docs_response(&state, &id, DocKind::TechnicalSpec, "").await
}

#[derive(Deserialize)]
struct ReleaseNotesRequest {
    version: String,
    #[serde(default)]
    changes: Vec<String>,
}

async fn handle_generate_release_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReleaseNotesRequest>,
) -> ApiResult<serde_json::Value> {
    if req.version.trim().is_empty() {
        return Err(bad_request("version must not be empty"));
    }
    state.pipeline.load_prd(&id).await?;
    let client = state.chat_client()?;
    Ok(Json(
        generate::generate_release_notes(&state.pipeline, client.as_ref(), &id, &req.version, &req.changes)
            .await?,
    ))
}

async fn handle_chunk_documentation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Chunk>> {
    Ok(Json(generate::chunk_documentation(&state.pipeline, &id).await?))
}
