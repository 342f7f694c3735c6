//! 上游模型的 SSE 客户端

use std::time::Duration;

use application::{relay_event_stream, ModelRequest, ModelStreamer, StreamEnd, StreamError};
use async_trait::async_trait;
use domain::{ModelType, StreamEvent};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ModelEndpoints {
    pub api_key: String,
    pub stream_url: String,
    pub cot_stream_url: String,
    pub request_timeout: Duration,
}

impl ModelEndpoints {
    pub fn from_config(config: &config::ModelConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            stream_url: config.stream_url.clone(),
            cot_stream_url: config.cot_stream_url.clone(),
            request_timeout: config.request_timeout(),
        }
    }

    /// 思维链变体走单独的地址
    pub fn url_for(&self, model_type: ModelType) -> &str {
        match model_type {
            ModelType::Cot => &self.cot_stream_url,
            ModelType::Standard => &self.stream_url,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    messages: [ChatMessage<'a>; 1],
}

pub struct HttpModelStreamer {
    client: reqwest::Client,
    endpoints: ModelEndpoints,
}

impl HttpModelStreamer {
    pub fn new(endpoints: ModelEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl ModelStreamer for HttpModelStreamer {
    async fn stream(
        &self,
        request: &ModelRequest,
        sink: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, StreamError> {
        let url = self.endpoints.url_for(request.model_type);
        let payload = ChatPayload {
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let send = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.endpoints.api_key))
            .header(ACCEPT, "text/event-stream")
            .json(&payload)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            response = send => response.map_err(|e| StreamError::Transport(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            warn!(status = status.as_u16(), body = %body, "model endpoint rejected request");
            return Err(StreamError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        info!(model_type = %request.model_type, "model stream opened");
        relay_event_stream(response.bytes_stream(), &sink, &cancel).await
    }
}
