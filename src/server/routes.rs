use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::analyzer::{AnalyzeDone, AnalyzeRequest, Finding};
use crate::complete::complete_view;
use crate::diagnostics::{self, DiagnosticFilter};
use crate::goto::{self, GotoCallback};
use crate::server::errors::AppError;
use crate::server::jobs::{JobState, MessageKind};
use crate::server::state::AppState;
use crate::settings::PathContext;
use crate::workspace::views::View;

/// How long a goto request waits before answering with a job id.
const DEFAULT_GOTO_WAIT_MS: u64 = 2000;

fn to_json<T: serde::Serialize>(value: T) -> Result<Json<Value>, AppError> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Runs blocking engine work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("Worker task failed: {}", e)))
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

pub fn build_routes(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(health))
        // Views
        .route("/api/v1/views/open", post(open_view))
        .route("/api/v1/views/modified", post(view_modified))
        .route("/api/v1/views/saved", post(view_saved))
        .route("/api/v1/views/activated", post(view_activated))
        .route("/api/v1/views/closed", post(view_closed))
        // Queries
        .route("/api/v1/status", get(status))
        .route("/api/v1/complete", post(complete))
        .route("/api/v1/definition", post(definition))
        .route("/api/v1/implementation", post(implementation))
        .route("/api/v1/diagnostics", get(get_diagnostics))
        // Static analysis
        .route("/api/v1/analyze", post(analyze_file))
        .route("/api/v1/analyze/project", post(analyze_project))
        // Editor shell polling
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/prompts", get(list_prompts))
        .route("/api/v1/prompts/{id}", post(answer_prompt))
        .route("/api/v1/messages", get(drain_messages))
        // Cache
        .route("/api/v1/cache/clear", post(clear_cache))
        .route("/api/v1/cache", axum::routing::delete(remove_from_cache))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache();
    Json(json!({
        "status": "ok",
        "views": state.inner.views.len(),
        "cached": cache.len(),
        "parsing": cache.parsing().len(),
        "pending_jobs": state.inner.jobs.len(),
        "pending_prompts": state.inner.prompts.len(),
        "started_at": state.inner.started_at.to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OpenViewBody {
    file: PathBuf,
    language: Option<String>,
    #[serde(default)]
    settings: Value,
}

async fn open_view(
    State(state): State<AppState>,
    Json(body): Json<OpenViewBody>,
) -> Result<Json<Value>, AppError> {
    let view = state.open_view(&body.file, body.language.as_deref(), &body.settings)?;
    let queued = view.settings.cache_on_load && state.cache().add(&view, None);
    Ok(Json(json!({
        "view_id": view.id,
        "file": view.file.display().to_string(),
        "language": view.language.as_flag(),
        "queued": queued,
        "status": state.cache().status(&view.file),
    })))
}

#[derive(Deserialize)]
struct ModifiedBody {
    file: PathBuf,
    buffer: String,
}

async fn view_modified(
    State(state): State<AppState>,
    Json(body): Json<ModifiedBody>,
) -> Result<Json<Value>, AppError> {
    let view = state.buffer_modified(&body.file, body.buffer)?;
    Ok(Json(json!({
        "dirty": view.is_dirty(),
        "reparse_scheduled": view.settings.reparse_use_dirty_buffer,
    })))
}

#[derive(Deserialize)]
struct FileBody {
    file: PathBuf,
}

async fn view_saved(
    State(state): State<AppState>,
    Json(body): Json<FileBody>,
) -> Result<Json<Value>, AppError> {
    let view = state
        .inner
        .views
        .saved(&body.file)
        .ok_or_else(|| AppError::NotFound(format!("No open view for '{}'", body.file.display())))?;
    let queued = view.settings.reparse_on_save && state.cache().reparse(&view, Vec::new(), None);
    Ok(Json(json!({ "queued": queued })))
}

/// Unsaved buffers a lifecycle reparse should see.
fn lifecycle_unsaved(view: &View) -> Vec<crate::frontend::UnsavedFile> {
    if view.settings.reparse_use_dirty_buffer {
        view.unsaved_files()
    } else {
        Vec::new()
    }
}

async fn view_activated(
    State(state): State<AppState>,
    Json(body): Json<FileBody>,
) -> Result<Json<Value>, AppError> {
    let view = state.require_view(&body.file)?;
    let cache = state.cache();
    let queued = if cache.cached(&view.file).is_some() {
        view.settings.reparse_on_activated && cache.reparse(&view, lifecycle_unsaved(&view), None)
    } else {
        view.settings.cache_on_load && cache.add(&view, None)
    };
    Ok(Json(json!({ "queued": queued })))
}

async fn view_closed(
    State(state): State<AppState>,
    Json(body): Json<FileBody>,
) -> Result<Json<Value>, AppError> {
    let view = state
        .inner
        .views
        .close(&body.file)
        .ok_or_else(|| AppError::NotFound(format!("No open view for '{}'", body.file.display())))?;
    state.inner.generations.remove(&view.file);
    if view.settings.remove_on_close {
        state.cache().remove(&view.file);
    }
    Ok(Json(json!({ "removed": view.settings.remove_on_close })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FileQuery {
    file: PathBuf,
}

async fn status(
    State(state): State<AppState>,
    Query(params): Query<FileQuery>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({
        "file": params.file.display().to_string(),
        "status": state.cache().status(&params.file),
    })))
}

#[derive(Deserialize)]
struct CompleteBody {
    file: PathBuf,
    /// Byte offset of the caret.
    offset: usize,
    #[serde(default)]
    prefix: String,
    /// Current buffer, when it differs from what was last sent.
    buffer: Option<String>,
}

/// The view with `buffer` recorded, if one was sent.
fn current_view(state: &AppState, file: &std::path::Path, buffer: Option<String>) -> Result<View, AppError> {
    match buffer {
        Some(buffer) => state
            .inner
            .views
            .modify(file, buffer)
            .ok_or_else(|| AppError::NotFound(format!("No open view for '{}'", file.display()))),
        None => state.require_view(file),
    }
}

async fn complete(
    State(state): State<AppState>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Value>, AppError> {
    let view = current_view(&state, &body.file, body.buffer)?;
    let cache = state.cache().clone();
    let response = blocking(move || complete_view(&cache, &view, body.offset, &body.prefix)).await?;
    debug!("{} completions", response.completions.len());
    to_json(response)
}

#[derive(Deserialize)]
struct GotoBody {
    file: PathBuf,
    offset: usize,
    buffer: Option<String>,
    /// How long to wait for the answer before returning a job id.
    wait_ms: Option<u64>,
}

async fn definition(
    State(state): State<AppState>,
    Json(body): Json<GotoBody>,
) -> Result<Json<Value>, AppError> {
    run_goto(state, body, goto::get_definition).await
}

async fn implementation(
    State(state): State<AppState>,
    Json(body): Json<GotoBody>,
) -> Result<Json<Value>, AppError> {
    run_goto(state, body, goto::get_implementation).await
}

async fn run_goto(
    state: AppState,
    body: GotoBody,
    lookup: fn(&crate::cache::TuCache, &View, usize, GotoCallback),
) -> Result<Json<Value>, AppError> {
    let view = current_view(&state, &body.file, body.buffer)?;
    let (id, callback, rx) = state.inner.jobs.start();
    let cache = state.cache().clone();
    let offset = body.offset;
    tokio::task::spawn_blocking(move || lookup(&cache, &view, offset, callback));

    let wait = Duration::from_millis(body.wait_ms.unwrap_or(DEFAULT_GOTO_WAIT_MS));
    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(target)) => {
            state.inner.jobs.take_done(&id);
            Ok(Json(json!({ "job": id, "status": "done", "target": target })))
        }
        Ok(Err(_)) => Err(AppError::Internal("Goto worker dropped its result".into())),
        Err(_) => Ok(Json(json!({ "job": id, "status": "pending" }))),
    }
}

async fn get_diagnostics(
    State(state): State<AppState>,
    Query(params): Query<FileQuery>,
) -> Result<Json<Value>, AppError> {
    let entry = state.cache().cached(&params.file).ok_or_else(|| {
        AppError::NotFound(format!("'{}' is not in the cache", params.file.display()))
    })?;
    let filter = match state.inner.views.get(&params.file) {
        Some(view) => DiagnosticFilter::from_settings(&view.settings, &view.paths),
        None => DiagnosticFilter::from_settings(&state.inner.settings, &Default::default()),
    };
    let report = blocking(move || {
        let tu_state = entry.lock();
        diagnostics::group(tu_state.tu.diagnostics(), &filter)
    })
    .await?;
    Ok(Json(json!({
        "file": params.file.display().to_string(),
        "errors": report.error_count(),
        "warnings": report.warning_count(),
        "files": report.files,
    })))
}

// ---------------------------------------------------------------------------
// Static analysis
// ---------------------------------------------------------------------------

/// Posts every finding to the message queue once an analysis finished.
fn post_findings(state: &AppState) -> AnalyzeDone {
    let messages = state.inner.messages.clone();
    Box::new(move |findings: Vec<Finding>| {
        for finding in findings {
            messages.push(MessageKind::Analysis, &finding.to_string());
        }
    })
}

async fn analyze_file(
    State(state): State<AppState>,
    Json(body): Json<FileBody>,
) -> Result<Json<Value>, AppError> {
    let view = state.require_view(&body.file)?;
    let request = AnalyzeRequest::new(&view.settings, &view.paths, &view.file);
    state.cache().analyze_file(request, Some(post_findings(&state)));
    Ok(Json(json!({ "queued": true, "file": view.file.display().to_string() })))
}

#[derive(Deserialize)]
struct ProjectBody {
    /// Open view whose settings apply; the startup settings otherwise.
    file: Option<PathBuf>,
}

async fn analyze_project(
    State(state): State<AppState>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<Value>, AppError> {
    let (settings, paths) = match body.file {
        Some(file) => {
            let view = state.require_view(&file)?;
            (view.settings, view.paths)
        }
        None => (
            state.inner.settings.clone(),
            PathContext {
                folders: state.inner.folders.clone(),
                this_file: None,
            },
        ),
    };
    if paths.folders.is_empty() {
        return Err(AppError::BadRequest("No workspace folders to analyze".into()));
    }
    let cache = state.cache().clone();
    let on_done = post_findings(&state);
    let files = blocking(move || cache.analyze_project(&settings, &paths, Some(on_done))).await?;
    Ok(Json(json!({ "queued": files })))
}

// ---------------------------------------------------------------------------
// Editor shell polling
// ---------------------------------------------------------------------------

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let job = state
        .inner
        .jobs
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Job '{}' not found", id)))?;
    if matches!(job, JobState::Done { .. }) {
        state.inner.jobs.take_done(&id);
    }
    Ok(Json(json!({ "job": id, "state": job })))
}

async fn list_prompts(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let prompts = state.inner.prompts.list();
    Ok(Json(json!({ "count": prompts.len(), "prompts": prompts })))
}

#[derive(Deserialize)]
struct AnswerBody {
    /// Index of the chosen row; absent dismisses the prompt.
    choice: Option<usize>,
}

async fn answer_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Value>, AppError> {
    let (on_select, choice) = state
        .inner
        .prompts
        .answer(&id, body.choice)
        .ok_or_else(|| AppError::Gone(format!("Prompt '{}' is no longer pending", id)))?;
    state.cache().main_thread().run(move || on_select(choice));
    Ok(Json(json!({ "answered": true, "choice": choice })))
}

async fn drain_messages(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({ "messages": state.inner.messages.drain() })))
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.cache().clear();
    Json(json!({ "cleared": true }))
}

async fn remove_from_cache(
    State(state): State<AppState>,
    Query(params): Query<FileQuery>,
) -> Json<Value> {
    state.cache().remove(&params.file);
    Json(json!({ "removed": params.file.display().to_string() }))
}
