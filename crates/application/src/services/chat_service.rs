use std::sync::Arc;

use domain::{
    ChatRequest, ChatSessionRepository, MessageId, MessageRepository, ModelMessage, QuotaError,
    RepositoryError, StreamEvent, TokenUsage, UserMessage,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    error::ChatError,
    services::quota_ledger::QuotaLedger,
    streaming::{ModelRequest, ModelStreamer, StreamEnd},
};

/// 接收转发给客户端的流事件。实现方不能阻塞（连接会话在队列满时直接丢弃）。
pub trait ChatEventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

/// 一次成功交换的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub model_message_id: MessageId,
    pub content: String,
    pub usage: TokenUsage,
    /// 扣减本次用量后估算的当日剩余额度
    pub remaining: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    /// 上游事件通道容量
    pub event_buffer: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { event_buffer: 64 }
    }
}

pub struct ChatServiceDependencies {
    pub quota: Arc<QuotaLedger>,
    pub model: Arc<dyn ModelStreamer>,
    pub sessions: Arc<dyn ChatSessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChatService {
    settings: ChatSettings,
    deps: ChatServiceDependencies,
}

/// 流过程中累积的内容与用量
#[derive(Debug, Default)]
struct StreamTranscript {
    deltas: String,
    full_content: Option<String>,
    usage: TokenUsage,
    model_error: Option<String>,
}

impl StreamTranscript {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Content { text } => self.deltas.push_str(text),
            StreamEvent::Done {
                usage,
                full_content,
            } => {
                self.usage = *usage;
                self.full_content = full_content.clone().filter(|text| !text.is_empty());
            }
            StreamEvent::Error { error } => self.model_error = Some(error.clone()),
            _ => {}
        }
    }

    /// 终止事件带全文时以全文为准，否则按顺序拼接增量
    fn into_text(self) -> String {
        self.full_content.unwrap_or(self.deltas)
    }
}

impl ChatService {
    pub fn new(settings: ChatSettings, deps: ChatServiceDependencies) -> Self {
        Self { settings, deps }
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.deps.quota
    }

    /// 处理一次聊天请求：配额检查、流式转发、持久化、扣减用量。
    pub async fn process(
        &self,
        request: ChatRequest,
        sink: &dyn ChatEventSink,
        cancel: CancellationToken,
    ) -> Result<ChatOutcome, ChatError> {
        let user_id = request.user_id;
        let session_id = request.session_id;

        let prompt_tokens = self.deps.quota.check_prompt_size(&request.content)?;
        let status = self.deps.quota.check_quota(user_id).await?;
        if status.is_exceeded {
            return Err(QuotaError::DailyExceeded {
                used: status.tokens_used,
                limit: self.deps.quota.policy().daily_limit,
            }
            .into());
        }

        let started_at = self.deps.clock.now();
        self.deps
            .sessions
            .touch_last_message(user_id, session_id, started_at)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => ChatError::SessionNotFound,
                other => ChatError::Persistence(other),
            })?;

        let model_request = ModelRequest {
            model_type: request.model_type,
            prompt: request.content.clone(),
        };
        let (tx, mut rx) = mpsc::channel(self.settings.event_buffer.max(1));

        let bridge = self.deps.model.stream(&model_request, tx, cancel.clone());
        let relay = async {
            let mut transcript = StreamTranscript::default();
            while let Some(event) = rx.recv().await {
                transcript.observe(&event);
                // 上游错误由本服务转换成唯一的终止错误
                if !matches!(event, StreamEvent::Error { .. }) {
                    sink.emit(event);
                }
            }
            transcript
        };
        let (end, transcript) = tokio::join!(bridge, relay);

        let failure = match end {
            Err(e) => Some(ChatError::Upstream(e)),
            Ok(StreamEnd::Cancelled) => Some(ChatError::Cancelled),
            Ok(_) => transcript.model_error.clone().map(ChatError::Model),
        };
        if let Some(err) = failure {
            warn!(user_id = %user_id, session_id = %session_id, error = %err, "chat stream failed");
            self.save_unanswered(&request, prompt_tokens).await;
            return Err(err);
        }

        let finished_at = self.deps.clock.now();
        let usage = transcript.usage;
        let content = transcript.into_text();
        let model_message_id = MessageId::generate();

        let persisted = self
            .persist_exchange(
                &request,
                prompt_tokens,
                model_message_id,
                &content,
                usage,
                (finished_at - started_at).num_milliseconds(),
            )
            .await;

        if let Err(e) = self
            .deps
            .quota
            .consume_tokens(user_id, usage.total_used_tokens)
            .await
        {
            warn!(user_id = %user_id, error = %e, "failed to consume tokens");
        }

        if let Err(e) = persisted {
            error!(user_id = %user_id, session_id = %session_id, error = %e, "failed to persist chat exchange");
            return Err(ChatError::Persistence(e));
        }

        info!(
            user_id = %user_id,
            session_id = %session_id,
            model_message_id = %model_message_id,
            total_used_tokens = usage.total_used_tokens,
            "chat exchange completed"
        );

        Ok(ChatOutcome {
            model_message_id,
            content,
            usage,
            remaining: (status.remaining - usage.total_used_tokens).max(0),
        })
    }

    async fn persist_exchange(
        &self,
        request: &ChatRequest,
        prompt_tokens: usize,
        model_message_id: MessageId,
        content: &str,
        usage: TokenUsage,
        response_time_ms: i64,
    ) -> Result<(), RepositoryError> {
        let now = self.deps.clock.now();
        let user_message = UserMessage {
            id: MessageId::generate(),
            user_id: request.user_id,
            session_id: request.session_id,
            content: request.content.clone(),
            prompt_tokens: prompt_tokens as i64,
            model_answer_message_id: Some(model_message_id),
            created_at: now,
        };
        let model_message = ModelMessage {
            id: model_message_id,
            user_id: request.user_id,
            session_id: request.session_id,
            model_type: request.model_type,
            content: content.to_string(),
            usage,
            response_time_ms,
            created_at: now,
        };

        self.deps.messages.save_user_message(&user_message).await?;
        self.deps.messages.save_model_message(&model_message).await
    }

    /// 流失败时仍然保存用户消息，不关联模型消息
    async fn save_unanswered(&self, request: &ChatRequest, prompt_tokens: usize) {
        let message = UserMessage {
            id: MessageId::generate(),
            user_id: request.user_id,
            session_id: request.session_id,
            content: request.content.clone(),
            prompt_tokens: prompt_tokens as i64,
            model_answer_message_id: None,
            created_at: self.deps.clock.now(),
        };

        match self.deps.messages.save_user_message(&message).await {
            Ok(()) => debug!(session_id = %request.session_id, "saved unanswered user message"),
            Err(e) => {
                error!(session_id = %request.session_id, error = %e, "failed to save user message")
            }
        }
    }
}
