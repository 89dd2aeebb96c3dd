use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    AppState,
    auth::{BearerHeader, TokenQuery, verify_token},
    engine::{CatchUpOutcome, CatchUpReport, CatchUpSummary, TemplateOutcome},
    error::{ApiError, SchedulerError},
    models::{ClassInstance, ClassTemplate, TemplateDraft, TemplateId},
    validation::{validate_date_range, validate_horizon_weeks},
};

#[derive(Debug, Deserialize)]
pub struct CatchUpQuery {
    pub weeks: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AutoScheduleRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QuickAddRequest {
    #[schema(value_type = String, format = "date", example = "2024-02-01")]
    pub date: NaiveDate,
    #[schema(value_type = Option<String>, format = "time", example = "20:00:00")]
    pub start_time: Option<NaiveTime>,
    #[schema(example = 1.0)]
    pub duration_hours: Option<f64>,
}

/// A new template, plus the catch-up run when it was created with
/// auto-scheduling on.
#[derive(Debug, Serialize)]
pub struct CreatedTemplate {
    #[serde(flatten)]
    pub template: ClassTemplate,
    pub catch_up: Option<CatchUpOutcome>,
}

#[derive(Debug, Serialize)]
pub struct CatchUpResponse {
    pub summary: CatchUpSummary,
    pub outcomes: Vec<TemplateOutcome>,
}

impl From<CatchUpReport> for CatchUpResponse {
    fn from(report: CatchUpReport) -> Self {
        Self {
            summary: report.summary(),
            outcomes: report.outcomes,
        }
    }
}

#[utoipa::path(get, path = "/", tag = "schedule")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Class Auto-Scheduler API",
        "endpoints": {
            "/templates": "List or create class templates",
            "/templates/{id}/auto-schedule": "Turn auto-scheduling on or off",
            "/templates/{id}/quick-add": "Add a one-off class from a template",
            "/schedule/catch-up": "Generate missing classes for all templates",
            "/instances": "Scheduled classes as JSON",
            "/instances.ical": "Scheduled classes as iCal file"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "schedule")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/healthz/ready",
    responses(
        (status = 200, description = "Stores are reachable"),
        (status = 503, description = "Template store is unavailable")
    ),
    tag = "schedule"
)]
pub async fn healthz_ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.templates.list_active() {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(err) => {
            warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "unavailable"})),
            )
        }
    }
}

/// Runs `work` on the blocking pool. Engine and resolver calls wait on
/// per-template locks and a batch can run for the whole catch-up timeout.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::Internal(format!("Task join error: {err}")))?
}

fn load_template(state: &AppState, id: TemplateId) -> Result<ClassTemplate, ApiError> {
    state
        .templates
        .get(id)
        .map_err(SchedulerError::StoreReadFailed)?
        .ok_or_else(|| SchedulerError::TemplateNotFound(id).into())
}

#[utoipa::path(
    get,
    path = "/templates",
    params(
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "All class templates", body = [ClassTemplate]),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "templates"
)]
pub async fn list_templates(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let templates = state
        .templates
        .list()
        .map_err(SchedulerError::StoreReadFailed)?;
    Ok(Json(templates))
}

#[utoipa::path(
    post,
    path = "/templates",
    request_body = TemplateDraft,
    responses(
        (status = 201, description = "Template created, with the catch-up it triggered"),
        (status = 401, description = "Invalid authentication token"),
        (status = 422, description = "Inconsistent time window or duration")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "templates"
)]
pub async fn create_template(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Json(draft): Json<TemplateDraft>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;

    let template = draft.into_template(0)?;
    let created = blocking(move || {
        let template = state
            .templates
            .create(template)
            .map_err(SchedulerError::StoreWriteFailed)?;
        if !template.schedules_automatically() {
            return Ok(CreatedTemplate {
                template,
                catch_up: None,
            });
        }

        // A template born with auto-scheduling on gets its horizon filled immediately.
        let outcome = state.engine.run_catch_up_for_template(
            template.id,
            state.today(),
            state.settings.horizon_weeks,
        );
        Ok(CreatedTemplate {
            template: load_template(&state, template.id)?,
            catch_up: Some(outcome),
        })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/templates/{id}",
    params(
        ("id" = u64, Path, description = "Template id"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "The template", body = ClassTemplate),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Template not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "templates"
)]
pub async fn get_template(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Path(id): Path<TemplateId>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    Ok(Json(load_template(&state, id)?))
}

#[utoipa::path(
    put,
    path = "/templates/{id}/auto-schedule",
    params(
        ("id" = u64, Path, description = "Template id"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    request_body = AutoScheduleRequest,
    responses(
        (status = 200, description = "Updated template and the catch-up triggered by enabling"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Template not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "templates"
)]
pub async fn set_auto_schedule(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Path(id): Path<TemplateId>,
    Json(request): Json<AutoScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let change = blocking(move || {
        Ok(state.engine.set_auto_schedule(
            id,
            request.enabled,
            state.today(),
            state.settings.horizon_weeks,
        )?)
    })
    .await?;
    Ok(Json(change))
}

#[utoipa::path(
    post,
    path = "/templates/{id}/quick-add",
    params(
        ("id" = u64, Path, description = "Template id"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    request_body = QuickAddRequest,
    responses(
        (status = 201, description = "One-off class created", body = ClassInstance),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "The template is already scheduled on that date"),
        (status = 422, description = "Override does not fit within the day")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "templates"
)]
pub async fn quick_add(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Path(id): Path<TemplateId>,
    Json(request): Json<QuickAddRequest>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let instance = blocking(move || {
        let template = load_template(&state, id)?;
        Ok(state.quick_add.resolve(
            &template,
            request.date,
            request.start_time,
            request.duration_hours,
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

#[utoipa::path(
    post,
    path = "/schedule/catch-up",
    params(
        ("weeks" = Option<u32>, Query, description = "Horizon in weeks (1-26), defaults to the configured horizon"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "Per-template outcomes and a summary"),
        (status = 400, description = "Invalid horizon"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedule"
)]
pub async fn run_catch_up(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Query(query): Query<CatchUpQuery>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let weeks = validate_horizon_weeks(query.weeks.unwrap_or(state.settings.horizon_weeks))?;

    let deadline = Instant::now() + Duration::from_millis(state.settings.catch_up_timeout_ms);
    let report = blocking(move || {
        Ok(state
            .engine
            .run_catch_up_until(state.today(), weeks, deadline)?)
    })
    .await?;
    Ok(Json(CatchUpResponse::from(report)))
}

fn resolve_range(
    state: &AppState,
    query: &RangeQuery,
) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let from = query.from.unwrap_or_else(|| state.today());
    let to = match query.to {
        Some(to) => to,
        None => from
            .checked_add_days(Days::new(7 * u64::from(state.settings.horizon_weeks)))
            .ok_or_else(|| ApiError::BadRequest("from is out of range".into()))?,
    };
    validate_date_range(from, to)?;
    Ok((from, to))
}

#[utoipa::path(
    get,
    path = "/instances",
    params(
        ("from" = Option<String>, Query, description = "First date (YYYY-MM-DD), defaults to today"),
        ("to" = Option<String>, Query, description = "Last date (YYYY-MM-DD), defaults to the end of the horizon"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "Classes in the range", body = [ClassInstance]),
        (status = 400, description = "Invalid range"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedule"
)]
pub async fn list_instances(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Query(range): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let (from, to) = resolve_range(&state, &range)?;
    let instances = state
        .instances
        .list_between(from, to)
        .map_err(SchedulerError::StoreReadFailed)?;
    Ok(Json(instances))
}

#[utoipa::path(
    get,
    path = "/instances.ical",
    params(
        ("from" = Option<String>, Query, description = "First date (YYYY-MM-DD), defaults to today"),
        ("to" = Option<String>, Query, description = "Last date (YYYY-MM-DD), defaults to the end of the horizon"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "No classes found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedule"
)]
pub async fn get_ical(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(token): Query<TokenQuery>,
    Query(range): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&state.settings, auth, &token)?;
    let (from, to) = resolve_range(&state, &range)?;
    let instances = state
        .instances
        .list_between(from, to)
        .map_err(SchedulerError::StoreReadFailed)?;

    let body = state.exporter.generate(&instances);
    if body.is_empty() {
        return Err(ApiError::NotFound("No classes found".into()));
    }

    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=class_schedule.ics",
            ),
        ],
        body,
    ))
}
