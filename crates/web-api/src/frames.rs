//! WebSocket 帧定义
//!
//! 客户端发来的帧按 `type` 分派；服务端发出的帧同样以 `type` 标记，每种类型一个载荷。

use domain::{MessageId, ModelType, StreamEvent};
use serde::{Deserialize, Serialize};

/// 客户端帧。字段都可缺省，缺失与否在分派时再校验。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
}

impl InboundFrame {
    pub fn model_type(&self) -> ModelType {
        self.model_type
            .as_deref()
            .map(ModelType::from_wire)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameError {
    pub code: String,
    pub message: String,
}

/// 服务端帧
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Ack { session_id: String },
    #[serde(rename_all = "camelCase")]
    GuardPassed { session_id: String },
    #[serde(rename_all = "camelCase")]
    Status { session_id: String, status: String },
    #[serde(rename_all = "camelCase")]
    Plan {
        session_id: String,
        steps: Vec<String>,
        rationale: String,
    },
    #[serde(rename_all = "camelCase")]
    CotStep {
        session_id: String,
        current_step: u32,
        total_steps: u32,
        step_description: String,
    },
    #[serde(rename_all = "camelCase")]
    Chunk { session_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    Done {
        session_id: String,
        model_message_id: MessageId,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error: FrameError,
    },
    Pong,
}

impl ServerFrame {
    pub fn error(
        session_id: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerFrame::Error {
            session_id,
            error: FrameError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    /// 把上游事件映射为客户端帧。
    ///
    /// `done` 返回 `None`：完成帧要等持久化拿到消息 ID 后由会话自己发出。
    pub fn from_event(session_id: &str, event: StreamEvent) -> Option<Self> {
        let session_id = session_id.to_string();
        let frame = match event {
            StreamEvent::Status { message } => ServerFrame::Status {
                session_id,
                status: message,
            },
            StreamEvent::GuardPassed => ServerFrame::GuardPassed { session_id },
            StreamEvent::Plan { steps, rationale } => ServerFrame::Plan {
                session_id,
                steps,
                rationale,
            },
            StreamEvent::CotStep {
                step,
                total,
                description,
            } => ServerFrame::CotStep {
                session_id,
                current_step: step,
                total_steps: total,
                step_description: description,
            },
            StreamEvent::Content { text } => ServerFrame::Chunk {
                session_id,
                content: text,
            },
            StreamEvent::Error { error } => ServerFrame::error(Some(session_id), "model_error", error),
            StreamEvent::Done { .. } => return None,
        };
        Some(frame)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Ack { .. } => "ack",
            ServerFrame::GuardPassed { .. } => "guard_passed",
            ServerFrame::Status { .. } => "status",
            ServerFrame::Plan { .. } => "plan",
            ServerFrame::CotStep { .. } => "cot_step",
            ServerFrame::Chunk { .. } => "chunk",
            ServerFrame::Done { .. } => "done",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Pong => "pong",
        }
    }
}
