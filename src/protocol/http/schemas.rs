use crate::audit::AuditEntry;
use crate::error::{ErrorKind, RolloutError};
use crate::rollout::HostStatus;
use crate::types::ConfigType;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 创建配置版本请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVersionBody {
    /// 配置内容
    pub content: String,
    /// 作者（可选，默认为 "api"）
    pub author_id: Option<String>,
    /// 变更说明
    pub summary: Option<String>,
    /// 远端文件名（可选，默认为 "default"）
    pub config_name: Option<String>,
    pub config_type: Option<ConfigType>,
    /// 观察窗口秒数（可选，默认取服务配置）
    pub watch_window_secs: Option<u64>,
}

/// 预检请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewBody {
    pub content: String,
    /// 为 true 时同时在目标主机上执行 `nginx -t`
    #[serde(default)]
    pub remote_test: bool,
}

/// 应用版本请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyBody {
    pub version: u64,
    pub actor: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    /// 计划应用时间；为空或已过去时立即应用
    pub scheduled_at: Option<DateTime<Utc>>,
    pub watch_window_secs: Option<u64>,
}

/// 回滚请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackBody {
    /// 目标版本；为空时回滚到最近一个已知良好的版本
    pub target_version: Option<u64>,
    pub actor: Option<String>,
}

/// 获取配置内容的查询参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentQuery {
    /// 是否屏蔽敏感内容（默认屏蔽）
    #[serde(default = "default_mask")]
    pub mask: bool,
}

fn default_mask() -> bool {
    true
}

/// 状态查询参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusQuery {
    /// 返回的审计记录条数上限
    pub audit_limit: Option<usize>,
}

/// 配置内容响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResponse {
    pub host_id: String,
    pub version: u64,
    pub content: String,
    pub content_hash: String,
    pub masked: bool,
}

/// 主机状态响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: HostStatus,
    /// 等待执行的健康检查数量（所有主机）
    pub pending_health_checks: usize,
    /// 最近的审计记录，最新的在前
    pub recent_operations: Vec<AuditEntry>,
}

/// 通用API响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 操作是否成功
    pub success: bool,
    /// 响应数据
    pub data: Option<T>,
    /// 响应消息
    pub message: Option<String>,
    /// 错误信息（当 success 为 false 时）
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    /// 创建成功响应（带消息）
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            error: None,
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub kind: ErrorKind,
    /// 校验类错误的逐条信息
    pub errors: Vec<String>,
    pub retryable: bool,
}

/// 把 [`RolloutError`] 转换为 HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub RolloutError);

impl From<RolloutError> for ApiError {
    fn from(err: RolloutError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::PolicyViolation | ErrorKind::Syntax | ErrorKind::RemoteTestFailure => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::Transport => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::HealthCheck | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            success: false,
            error: crate::sanitize::sanitize_error(&self.0.to_string()),
            kind: self.0.kind(),
            errors: self.0.messages(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
