//! 领域实体定义
//!
//! 包含系统的核心实体：令牌、配额、聊天消息。

pub mod auth;
pub mod chat;
pub mod quota;

// 重新导出核心实体
pub use auth::{AuthAction, AuthError, Claims, RefreshTokenRecord, TokenKind, TokenPair};
pub use chat::{ChatRequest, ModelMessage, ModelType, TokenUsage, UserMessage};
pub use quota::{QuotaCalendar, QuotaError, QuotaStatus};
