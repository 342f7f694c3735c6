use domain::{DomainError, QuotaError, RepositoryError};
use thiserror::Error;

use crate::streaming::StreamError;

/// 聊天编排错误
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("chat session not found")]
    SessionNotFound,
    #[error("model error: {0}")]
    Model(String),
    #[error(transparent)]
    Upstream(#[from] StreamError),
    #[error("request cancelled")]
    Cancelled,
    #[error("persistence error: {0}")]
    Persistence(RepositoryError),
}

impl ChatError {
    /// 对外的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "invalid_request",
            ChatError::Quota(QuotaError::PromptTooLarge { .. }) => "prompt_too_large",
            ChatError::Quota(QuotaError::DailyExceeded { .. }) => "quota_exceeded",
            ChatError::Quota(_) => "internal_error",
            ChatError::SessionNotFound => "session_not_found",
            ChatError::Model(_) => "model_error",
            ChatError::Upstream(_) => "upstream_error",
            ChatError::Cancelled => "cancelled",
            ChatError::Persistence(_) => "internal_error",
        }
    }

    /// 可以展示给客户端的消息，不包含内部细节
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Validation(DomainError::ValidationError { message, .. }) => message.clone(),
            ChatError::Validation(DomainError::BusinessRuleViolation { rule }) => rule.clone(),
            ChatError::Quota(QuotaError::PromptTooLarge { count, max }) => {
                format!("prompt is too long ({count} tokens, max {max})")
            }
            ChatError::Quota(QuotaError::DailyExceeded { .. }) => {
                "daily token quota exceeded".to_string()
            }
            ChatError::SessionNotFound => "chat session not found".to_string(),
            ChatError::Model(_) => "the model failed to produce a response".to_string(),
            ChatError::Upstream(_) => "model service is unavailable".to_string(),
            ChatError::Cancelled => "request cancelled".to_string(),
            ChatError::Quota(_) | ChatError::Persistence(_) => "internal server error".to_string(),
        }
    }
}

impl From<RepositoryError> for ChatError {
    fn from(value: RepositoryError) -> Self {
        ChatError::Persistence(value)
    }
}
