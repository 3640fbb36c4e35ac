use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 网关统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum GatewayError {
    // === 认证错误 ===
    #[error("{description}")]
    Auth {
        code: String,
        description: String,
        status: u16,
    },

    // === 配置错误（启动期或数据源装配期，致命，不重试） ===
    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    // === 外部提供方错误（模型/检索/promptflow，透传消息，不重试） ===
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    // === 调用方错误 ===
    #[error("bad request: {reason}")]
    Caller { reason: String },

    // === 技术错误 ===
    #[error("serialization error: {format}")]
    Serialization { format: String, message: String },

    #[error("network error: {operation}")]
    Network { operation: String, message: String },

    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的调用方/认证错误
    Medium,   // 外部依赖错误
    Critical, // 配置或序列化错误
}

impl GatewayError {
    pub fn auth(code: impl Into<String>, description: impl Into<String>, status: u16) -> Self {
        GatewayError::Auth {
            code: code.into(),
            description: description.into(),
            status,
        }
    }

    /// 缺失或无法解析的 Authorization 凭据
    pub fn invalid_header(description: impl Into<String>) -> Self {
        Self::auth("invalid_header", description, 401)
    }

    /// 令牌有效但角色不满足
    pub fn insufficient_roles() -> Self {
        Self::auth("insufficient_roles", "Insufficient roles", 403)
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::Auth { .. } | GatewayError::Caller { .. } => ErrorSeverity::Low,
            GatewayError::Provider { .. }
            | GatewayError::Network { .. }
            | GatewayError::Timeout { .. } => ErrorSeverity::Medium,
            GatewayError::Configuration { .. } | GatewayError::Serialization { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Auth { status, .. } => *status,
            GatewayError::Caller { .. } => 400,
            GatewayError::Network { .. } => 502,
            GatewayError::Timeout { .. } => 504,
            GatewayError::Configuration { .. }
            | GatewayError::Provider { .. }
            | GatewayError::Serialization { .. } => 500,
        }
    }

    /// 错误信封的 error 字段。认证错误保留结构化的 code/description，
    /// 其余错误只透传消息文本。
    pub fn envelope(&self) -> serde_json::Value {
        match self {
            GatewayError::Auth {
                code, description, ..
            } => serde_json::json!({
                "error": { "code": code, "description": description }
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

// === 转换实现 ===

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000, // 默认超时时间
            }
        } else if err.is_connect() {
            GatewayError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            GatewayError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.envelope())).into_response()
    }
}
