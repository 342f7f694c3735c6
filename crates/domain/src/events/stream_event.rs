//! 上游模型流事件
//!
//! 事件流中每一行 `data: {json}` 解码为一个 [`StreamEvent`]，按 `type` 字段区分。

use serde::{Deserialize, Serialize};

use crate::entities::chat::TokenUsage;

/// 上游流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 处理阶段提示
    Status {
        #[serde(default)]
        message: String,
    },
    /// 守卫代理放行
    GuardPassed,
    /// 思维链计划
    Plan {
        #[serde(default)]
        steps: Vec<String>,
        #[serde(default)]
        rationale: String,
    },
    /// 思维链步骤进度
    CotStep {
        #[serde(default)]
        step: u32,
        #[serde(default)]
        total: u32,
        #[serde(default)]
        description: String,
    },
    /// 内容增量
    Content {
        #[serde(default)]
        text: String,
    },
    /// 完成，携带用量统计
    Done {
        #[serde(flatten)]
        usage: TokenUsage,
        #[serde(
            default,
            rename = "fullContent",
            skip_serializing_if = "Option::is_none"
        )]
        full_content: Option<String>,
    },
    /// 上游报告的错误
    Error {
        #[serde(default, alias = "message")]
        error: String,
    },
}

impl StreamEvent {
    /// `done` 与 `error` 结束一次流
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::GuardPassed => "guard_passed",
            StreamEvent::Plan { .. } => "plan",
            StreamEvent::CotStep { .. } => "cot_step",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_upstream_payloads() {
        let plan: StreamEvent =
            serde_json::from_str(r#"{"type":"plan","steps":["a","b"]}"#).unwrap();
        assert_eq!(
            plan,
            StreamEvent::Plan {
                steps: vec!["a".into(), "b".into()],
                rationale: String::new()
            }
        );

        let step: StreamEvent = serde_json::from_str(
            r#"{"type":"cot_step","step":2,"total":3,"description":"check"}"#,
        )
        .unwrap();
        assert!(matches!(step, StreamEvent::CotStep { step: 2, total: 3, .. }));

        let guard: StreamEvent = serde_json::from_str(r#"{"type":"guard_passed"}"#).unwrap();
        assert_eq!(guard, StreamEvent::GuardPassed);
    }

    #[test]
    fn done_reads_camel_case_usage_and_optional_full_content() {
        let done: StreamEvent = serde_json::from_str(
            r#"{"type":"done","totalInputTokens":10,"totalOutputTokens":20,"finalOutputTokens":15,"totalUsedTokens":30}"#,
        )
        .unwrap();

        match done {
            StreamEvent::Done { usage, full_content } => {
                assert_eq!(usage.total_used_tokens, 30);
                assert_eq!(usage.final_output_tokens, 15);
                assert!(full_content.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let with_text: StreamEvent =
            serde_json::from_str(r#"{"type":"done","fullContent":"hello"}"#).unwrap();
        assert!(with_text.is_terminal());
        assert!(matches!(
            with_text,
            StreamEvent::Done { full_content: Some(ref text), .. } if text == "hello"
        ));
    }

    #[test]
    fn error_accepts_message_alias_and_unknown_type_fails() {
        let err: StreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(err, StreamEvent::Error { error: "boom".into() });
        assert!(err.is_terminal());

        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"mystery"}"#).is_err());
    }
}
