use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{AuthAction, AuthError, QuotaError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorData {
    pub action: AuthAction,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>, action: AuthAction) -> Self {
        let mut err = Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message);
        err.body.data = Some(ErrorData { action });
        err
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// 刷新接口上的认证失败都要求重新登录；存储故障不影响客户端会话
    pub fn refresh_failed(error: AuthError) -> Self {
        let keeps_session = matches!(error, AuthError::Internal(_));
        let mut err = Self::from(error);
        if !keeps_session {
            err.body.data = Some(ErrorData {
                action: AuthAction::Logout,
            });
        }
        err
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let action = error.required_action();
        let (code, message) = match &error {
            AuthError::Expired => ("token_expired", "token expired"),
            AuthError::Invalid => ("unauthorized", "invalid token"),
            AuthError::Malformed => ("unauthorized", "malformed token"),
            AuthError::NotFound => ("unauthorized", "refresh token not found"),
            AuthError::Internal(detail) => {
                tracing::error!(error = %detail, "token authority failure");
                return ApiError::internal_server_error("internal server error");
            }
        };

        let mut err = ApiError::new(StatusCode::UNAUTHORIZED, code, message);
        err.body.data = Some(ErrorData { action });
        err
    }
}

impl From<QuotaError> for ApiError {
    fn from(error: QuotaError) -> Self {
        tracing::error!(error = %error, "quota lookup failed");
        ApiError::internal_server_error("internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
