use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            audit::{AuditLogArchive, AuditLogEntry, AuditLogFilters, AuditLogPage, Page},
            error::AuditError,
            event::{CapturedEvent, Operation, RawCapturedEvent},
            id::TenantId,
            repository::ArchiveStore,
            subscription::{CreateSubscription, Subscription},
        },
    },
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, Path, Query, State},
        http::{StatusCode, header},
        response::IntoResponse,
        routing::{delete, get, post},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::json,
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
    uuid::Uuid,
};

const BODY_LIMIT: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/entities", get(list_entities))
        .route("/tenants/{tenant}/audit/enable", post(enable_audit))
        .route("/tenants/{tenant}/audit/disable", post(disable_audit))
        .route("/tenants/{tenant}/audit/status", get(audit_status))
        .route(
            "/tenants/{tenant}/audit/entities/{entity_type}/{entity_id}",
            get(entity_log),
        )
        .route("/tenants/{tenant}/audit/log", get(global_log))
        .route("/tenants/{tenant}/audit/archives", get(list_archives))
        .route("/audit/archives/{id}/download", get(archive_download_url))
        .route("/tenants/{tenant}/events", post(capture_event))
        .route("/tenants/{tenant}/subscriptions", post(create_subscription).get(list_subscriptions))
        .route("/tenants/{tenant}/subscriptions/sync", post(sync_subscriptions))
        .route(
            "/tenants/{tenant}/subscriptions/by-name/{name}",
            delete(delete_subscription_by_name),
        )
        .route("/subscriptions/{id}", delete(delete_subscription))
        .route("/archives/{*path}", get(serve_archive))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

fn tenant(raw: String) -> Result<TenantId, ApiError> {
    Ok(TenantId::new(raw)?)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    entity_type: Option<String>,
    actor_id: Option<String>,
    operation: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl LogQuery {
    fn filters(&self) -> Result<AuditLogFilters, AuditError> {
        let operation = self
            .operation
            .as_deref()
            .map(Operation::try_from)
            .transpose()?;
        Ok(AuditLogFilters {
            entity_type: self.entity_type.clone(),
            actor_id: self.actor_id.clone(),
            operation,
            start_date: self.start_date,
            end_date: self.end_date,
            search: self.search.clone().filter(|s| !s.trim().is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
struct EntityTable {
    table: &'static str,
    role: &'static str,
    label: String,
}

#[derive(Debug, Serialize)]
struct EntitySummary {
    key: &'static str,
    label: &'static str,
    tables: Vec<EntityTable>,
}

async fn list_entities(State(state): State<AppState>) -> Json<Vec<EntitySummary>> {
    let entities = &state.entities;
    let summaries = entities
        .definitions()
        .iter()
        .map(|def| EntitySummary {
            key: def.key,
            label: def.label,
            tables: def
                .tables
                .iter()
                .map(|t| EntityTable {
                    table: t.table(),
                    role: t.role(),
                    label: entities.table_label(t.table()),
                })
                .collect(),
        })
        .collect();
    Json(summaries)
}

async fn enable_audit(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant_id = tenant(raw)?;
    state.audit_log.enable(&tenant_id).await?;
    Ok(Json(json!({ "enabled": true })))
}

async fn disable_audit(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant_id = tenant(raw)?;
    state.audit_log.disable(&tenant_id).await?;
    Ok(Json(json!({ "enabled": false })))
}

async fn audit_status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant_id = tenant(raw)?;
    let enabled = state.audit_log.is_enabled(&tenant_id).await?;
    Ok(Json(json!({ "enabled": enabled })))
}

async fn entity_log(
    State(state): State<AppState>,
    Path((raw, entity_type, entity_id)): Path<(String, String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let tenant_id = tenant(raw)?;
    let page = Page::new(query.limit, query.offset)?;
    let entries = state
        .audit_log
        .get_entity_log(&tenant_id, &entity_type, &entity_id, page)
        .await?;
    Ok(Json(entries))
}

async fn global_log(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<AuditLogPage>, ApiError> {
    let tenant_id = tenant(raw)?;
    let page = Page::new(query.limit, query.offset)?;
    let filters = query.filters()?;
    let result = state
        .audit_log
        .get_global_log(&tenant_id, &filters, page)
        .await?;
    Ok(Json(result))
}

async fn list_archives(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<AuditLogArchive>>, ApiError> {
    let tenant_id = tenant(raw)?;
    Ok(Json(state.audit_log.list_archives(&tenant_id).await?))
}

async fn archive_download_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state.audit_log.get_archive_download_url(id).await?;
    Ok(Json(json!({ "url": url })))
}

async fn capture_event(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(body): Json<RawCapturedEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let tenant_id = tenant(raw)?;
    let event = CapturedEvent::try_from(body)?;
    let queued = state.capture.capture(&tenant_id, event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))))
}

async fn create_subscription(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(params): Json<CreateSubscription>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let tenant_id = tenant(raw)?;
    let subscription = state.subscriptions.create(&tenant_id, params).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let tenant_id = tenant(raw)?;
    Ok(Json(state.subscriptions.list(&tenant_id).await?))
}

async fn sync_subscriptions(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant_id = tenant(raw)?;
    let created = state.subscriptions.sync(&tenant_id).await?;
    Ok(Json(json!({ "created": created })))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.subscriptions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_subscription_by_name(
    State(state): State<AppState>,
    Path((raw, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant_id = tenant(raw)?;
    state.subscriptions.delete_by_name(&tenant_id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    expires: i64,
    signature: String,
}

async fn serve_archive(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .archive_files
        .verify_signature(&path, query.expires, &query.signature)
    {
        tracing::warn!(archive_path = %path, "rejected archive download");
        return Err(AuditError::Signature(path).into());
    }
    let bytes = state
        .archive_files
        .get(&path)
        .await?
        .ok_or_else(|| AuditError::NotFound(format!("archive object {path}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip"),
            (header::CONTENT_DISPOSITION, "attachment"),
        ],
        bytes,
    ))
}
