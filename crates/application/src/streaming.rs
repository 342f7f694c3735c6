//! 上游事件流桥接
//!
//! 把分块到达的 `text/event-stream` 响应体还原成按顺序排列的 [`StreamEvent`]，
//! 逐个送入调用方提供的有界通道。

use std::fmt;

use async_trait::async_trait;
use domain::{ModelType, StreamEvent};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DONE_SENTINEL: &str = "[DONE]";

/// 发往上游模型的请求
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model_type: ModelType,
    pub prompt: String,
}

/// 事件流结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// 收到 `[DONE]`
    Sentinel,
    /// 收到 `done` 或 `error` 事件
    Terminal,
    /// 上游关闭了连接
    EndOfStream,
    /// 调用方取消，或接收端已关闭
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// 上游返回非 2xx
    #[error("upstream returned status {status}")]
    Upstream { status: u16, body: String },
    /// 连接或读流失败
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// 上游模型流式客户端
#[async_trait]
pub trait ModelStreamer: Send + Sync {
    /// 发起请求并把解码后的事件按到达顺序写入 `sink`，返回结束原因。
    ///
    /// 返回时 `sink` 被丢弃，接收端据此得知流已结束。
    async fn stream(
        &self,
        request: &ModelRequest,
        sink: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, StreamError>;
}

/// 一行 `data:` 载荷的解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Event(StreamEvent),
    Sentinel,
}

/// 行缓冲的事件流解码器。
///
/// 按字节缓冲直到换行，跨块拆开的行（包括被拆开的 UTF-8 序列）会先拼回完整一行再解码。
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个数据块，返回其中所有完整行的解码结果
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = decode_line(&line[..line.len() - 1]) {
                decoded.push(item);
            }
        }
        decoded
    }

    /// 流结束时处理没有换行结尾的最后一行
    pub fn finish(&mut self) -> Option<DecodedLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<DecodedLine> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            warn!(error = %e, "skipping non utf-8 event stream line");
            return None;
        }
    };

    // 空行分隔事件，冒号开头是注释
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim_start();
    if data == DONE_SENTINEL {
        return Some(DecodedLine::Sentinel);
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(DecodedLine::Event(event)),
        Err(e) => {
            warn!(error = %e, data, "failed to parse event stream payload");
            None
        }
    }
}

/// 读取字节流并转发事件，直到哨兵、终止事件、流结束或取消。
pub async fn relay_event_stream<S, B, E>(
    stream: S,
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<StreamEnd, StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    tokio::pin!(stream);
    let mut decoder = EventStreamDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in decoder.push(chunk.as_ref()) {
                    if let Some(end) = forward(line, sink, cancel).await {
                        return Ok(end);
                    }
                }
            }
            Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
            None => {
                if let Some(line) = decoder.finish() {
                    if let Some(end) = forward(line, sink, cancel).await {
                        return Ok(end);
                    }
                }
                debug!("upstream closed event stream");
                return Ok(StreamEnd::EndOfStream);
            }
        }
    }
}

async fn forward(
    line: DecodedLine,
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Option<StreamEnd> {
    let event = match line {
        DecodedLine::Sentinel => return Some(StreamEnd::Sentinel),
        DecodedLine::Event(event) => event,
    };
    let terminal = event.is_terminal();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Some(StreamEnd::Cancelled),
        sent = sink.send(event) => {
            if sent.is_err() {
                return Some(StreamEnd::Cancelled);
            }
        }
    }

    terminal.then_some(StreamEnd::Terminal)
}
