//! 聊天交换实体
//!
//! 一次聊天请求产生一条用户消息和（成功时）一条模型消息，两者共享会话，
//! 并通过 `model_answer_message_id` 关联。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, SessionId, Timestamp, UserId};

/// 请求的模型变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelType {
    /// 普通流式模型
    #[default]
    Standard,
    /// 思维链（chain-of-thought）模型，会额外产生 plan / cot_step 事件
    Cot,
}

impl ModelType {
    /// 只有 `COT`（不区分大小写）选择思维链模型，其余值一律视为普通模型。
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("cot") {
            ModelType::Cot
        } else {
            ModelType::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Standard => "STANDARD",
            ModelType::Cot => "COT",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ModelType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(ModelType::from_wire).unwrap_or_default())
    }
}

/// 经过校验的聊天请求
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub content: String,
    pub model_type: ModelType,
}

impl ChatRequest {
    /// 校验入站帧字段：会话ID必须是 UUID，内容去除空白后不能为空。
    pub fn new(
        user_id: UserId,
        session_id: Option<&str>,
        content: Option<&str>,
        model_type: ModelType,
    ) -> DomainResult<Self> {
        let (session_id, content) = match (session_id, content) {
            (Some(session), Some(content)) if !session.trim().is_empty() && !content.trim().is_empty() => {
                (session, content)
            }
            _ => {
                return Err(DomainError::validation_error(
                    "request",
                    "sessionId and content are required",
                ))
            }
        };

        Ok(Self {
            user_id,
            session_id: SessionId::parse(session_id)?,
            content: content.to_string(),
            model_type,
        })
    }
}

/// 上游报告的令牌用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub final_output_tokens: i64,
    pub total_used_tokens: i64,
}

/// 用户消息
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub content: String,
    pub prompt_tokens: i64,
    /// 模型回复失败时为空
    pub model_answer_message_id: Option<MessageId>,
    pub created_at: Timestamp,
}

/// 模型消息
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub model_type: ModelType,
    pub content: String,
    pub usage: TokenUsage,
    pub response_time_ms: i64,
    pub created_at: Timestamp,
}
