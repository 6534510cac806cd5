use crate::protocol::http::{
    ApiError, ApiResponse, AppState, ApplyBody, ContentQuery, ContentResponse, CreateVersionBody,
    PreviewBody, RollbackBody, StatusQuery, StatusResponse,
};
use crate::rollout::{ApplyOutcome, ApplyRequest, CreateVersionRequest, RollbackOutcome};
use crate::types::{content_hash, validate_identifier, ConfigVersion, ValidationResult, VersionKey, VersionSummary};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use tracing::{debug, info};

const DEFAULT_ACTOR: &str = "api";
const DEFAULT_AUDIT_LIMIT: usize = 20;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// 列出主机的配置版本
/// GET /api/v1/hosts/{host}/versions
pub async fn list_versions_handler(
    Path(host): Path<String>,
    State(app_state): State<AppState>,
) -> ApiResult<Vec<VersionSummary>> {
    debug!("Listing versions for host: {}", host);
    validate_identifier("host id", &host)?;

    let versions = app_state.core_handle.service().list_versions(&host).await;
    Ok(Json(ApiResponse::success(versions)))
}

/// 创建配置版本
/// POST /api/v1/hosts/{host}/versions
pub async fn create_version_handler(
    Path(host): Path<String>,
    State(app_state): State<AppState>,
    Json(body): Json<CreateVersionBody>,
) -> ApiResult<VersionSummary> {
    info!("Creating version for host: {}", host);

    let version: ConfigVersion = app_state
        .core_handle
        .service()
        .create_version(CreateVersionRequest {
            host_id: host,
            content: body.content,
            author_id: body.author_id.unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
            summary: body.summary,
            config_name: body.config_name,
            config_type: body.config_type,
            watch_window_secs: body.watch_window_secs,
        })
        .await?;

    Ok(Json(ApiResponse::success_with_message(
        version.summarize(),
        format!("Version {} created", version.version),
    )))
}

/// 获取版本内容，默认屏蔽敏感信息
/// GET /api/v1/hosts/{host}/versions/{version}
pub async fn get_content_handler(
    Path((host, version)): Path<(String, u64)>,
    Query(query): Query<ContentQuery>,
    State(app_state): State<AppState>,
) -> ApiResult<ContentResponse> {
    debug!("Fetching content of {}", VersionKey::new(&host, version));

    let service = app_state.core_handle.service();
    let content = service.get_content(&host, version, query.mask).await?;

    Ok(Json(ApiResponse::success(ContentResponse {
        content_hash: content_hash(&content),
        host_id: host,
        version,
        content,
        masked: query.mask,
    })))
}

/// 预检配置内容，不创建版本
/// POST /api/v1/hosts/{host}/preview
pub async fn preview_handler(
    Path(host): Path<String>,
    State(app_state): State<AppState>,
    Json(body): Json<PreviewBody>,
) -> ApiResult<ValidationResult> {
    debug!("Previewing config for host: {} (remote test: {})", host, body.remote_test);

    let result = app_state
        .core_handle
        .service()
        .validate(&host, &body.content, !body.remote_test)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// 应用版本
/// POST /api/v1/hosts/{host}/apply
pub async fn apply_handler(
    Path(host): Path<String>,
    State(app_state): State<AppState>,
    Json(body): Json<ApplyBody>,
) -> ApiResult<ApplyOutcome> {
    let key = VersionKey::new(&host, body.version);
    info!("Apply requested for {} (dry run: {})", key, body.dry_run);

    let outcome = app_state
        .core_handle
        .service()
        .apply(ApplyRequest {
            key,
            actor: body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
            dry_run: body.dry_run,
            scheduled_at: body.scheduled_at,
            watch_window_secs: body.watch_window_secs,
        })
        .await?;

    let message = match &outcome {
        ApplyOutcome::Scheduled { scheduled_at, .. } => format!("Apply scheduled for {}", scheduled_at),
        ApplyOutcome::DryRun { .. } => "Dry run passed".to_string(),
        ApplyOutcome::Applied { version, .. } => format!("Version {} applied", version),
    };
    Ok(Json(ApiResponse::success_with_message(outcome, message)))
}

/// 回滚主机配置
/// POST /api/v1/hosts/{host}/rollback
pub async fn rollback_handler(
    Path(host): Path<String>,
    State(app_state): State<AppState>,
    body: Option<Json<RollbackBody>>,
) -> ApiResult<RollbackOutcome> {
    let Json(body) = body.unwrap_or_default();
    info!("Rollback requested for host: {} (target: {:?})", host, body.target_version);

    let outcome = app_state
        .core_handle
        .service()
        .rollback(
            &host,
            body.target_version,
            body.actor.as_deref().unwrap_or(DEFAULT_ACTOR),
        )
        .await?;

    let message = format!("Rolled back to version {}", outcome.version);
    Ok(Json(ApiResponse::success_with_message(outcome, message)))
}

/// 主机状态与最近的操作记录
/// GET /api/v1/hosts/{host}/status
pub async fn status_handler(
    Path(host): Path<String>,
    Query(query): Query<StatusQuery>,
    State(app_state): State<AppState>,
) -> ApiResult<StatusResponse> {
    validate_identifier("host id", &host)?;

    let service = app_state.core_handle.service();
    let status = service.status(&host).await;
    let recent_operations = app_state
        .core_handle
        .audit()
        .recent(Some(host.as_str()), query.audit_limit.unwrap_or(DEFAULT_AUDIT_LIMIT));

    Ok(Json(ApiResponse::success(StatusResponse {
        status,
        pending_health_checks: service.pending_health_checks(),
        recent_operations,
    })))
}
