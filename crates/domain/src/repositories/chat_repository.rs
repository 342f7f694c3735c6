//! 聊天会话与消息存储接口

use async_trait::async_trait;

use crate::entities::chat::{ModelMessage, UserMessage};
use crate::errors::RepositoryResult;
use crate::value_objects::{SessionId, Timestamp, UserId};

#[async_trait]
pub trait ChatSessionRepository: Send + Sync {
    /// 更新会话的 `last_message_at`。
    ///
    /// 会话不存在或不属于该用户时返回 [`RepositoryError::NotFound`](crate::errors::RepositoryError::NotFound)。
    async fn touch_last_message(
        &self,
        user_id: UserId,
        session_id: SessionId,
        at: Timestamp,
    ) -> RepositoryResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save_user_message(&self, message: &UserMessage) -> RepositoryResult<()>;

    async fn save_model_message(&self, message: &ModelMessage) -> RepositoryResult<()>;
}
