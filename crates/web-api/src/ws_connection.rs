use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{ChatError, ChatEventSink, ChatService};
use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use domain::{ChatRequest, StreamEvent, UserId};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    sync::{mpsc, Semaphore},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::frames::{InboundFrame, ServerFrame};

/// 连接会话的运行参数
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// 允许的 Origin；为空时拒绝所有升级请求
    pub allowed_origins: Vec<String>,
    pub send_buffer: usize,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub max_consecutive_malformed: u32,
    pub single_flight: bool,
}

impl WebSocketSettings {
    pub fn from_config(config: &config::WebSocketConfig) -> Self {
        Self {
            allowed_origins: config.allowed_origins.clone(),
            send_buffer: config.send_buffer,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
            max_consecutive_malformed: config.max_consecutive_malformed,
            single_flight: config.single_flight,
        }
    }

    /// 只接受列表中的 Origin，缺少 Origin 头同样拒绝
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|origin| {
            self.allowed_origins
                .iter()
                .any(|allowed| allowed.trim_end_matches('/') == origin.trim_end_matches('/'))
        })
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self::from_config(&config::WebSocketConfig::default())
    }
}

/// 为通过认证的升级请求创建会话，所有会话共享同一个进程级取消令牌。
#[derive(Clone)]
pub struct SessionFactory {
    chat: Arc<ChatService>,
    settings: Arc<WebSocketSettings>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl SessionFactory {
    pub fn new(
        chat: Arc<ChatService>,
        settings: WebSocketSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            chat,
            settings: Arc::new(settings),
            shutdown,
            sessions: TaskTracker::new(),
        }
    }

    pub fn settings(&self) -> &WebSocketSettings {
        &self.settings
    }

    pub fn open(&self, user_id: UserId) -> ConnectionSession {
        ConnectionSession {
            user_id,
            chat: self.chat.clone(),
            settings: self.settings.clone(),
            cancel: self.shutdown.child_token(),
            requests: TaskTracker::new(),
            in_flight: Arc::new(Semaphore::new(1)),
            state: SessionState::Connecting,
        }
    }

    /// 在进程级任务集中运行会话，关停时可以等待它们全部结束
    pub async fn serve(&self, session: ConnectionSession, socket: WebSocket) {
        self.sessions.track_future(session.run(socket)).await
    }

    /// 停止接收新会话并等待现有会话关闭
    pub async fn drain(&self) {
        self.sessions.close();
        self.sessions.wait().await;
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 单个 WebSocket 连接
///
/// 读写各一个任务，读任务把聊天请求交给连接内的请求任务集执行；
/// 取消令牌是“还能不能发送”的唯一判断依据。
pub struct ConnectionSession {
    user_id: UserId,
    chat: Arc<ChatService>,
    settings: Arc<WebSocketSettings>,
    cancel: CancellationToken,
    requests: TaskTracker,
    in_flight: Arc<Semaphore>,
    state: SessionState,
}

impl ConnectionSession {
    fn transition(&mut self, next: SessionState) {
        tracing::info!(user_id = %self.user_id, from = %self.state, to = %next, "websocket session state changed");
        self.state = next;
    }

    pub async fn run(mut self, socket: WebSocket) {
        self.transition(SessionState::Open);

        let (sender, incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(self.settings.send_buffer.max(1));
        let outbound = OutboundHandle::new(cmd_tx, self.cancel.clone());

        let send_task = tokio::spawn(write_loop(
            sender,
            cmd_rx,
            self.settings.clone(),
            self.cancel.clone(),
        ));

        let dispatcher = Dispatcher {
            user_id: self.user_id,
            chat: self.chat.clone(),
            outbound: outbound.clone(),
            cancel: self.cancel.clone(),
            requests: self.requests.clone(),
            in_flight: self.in_flight.clone(),
            single_flight: self.settings.single_flight,
        };
        let recv_task = tokio::spawn(read_loop(
            incoming,
            dispatcher,
            self.settings.max_consecutive_malformed,
        ));

        // 任一方向结束都会取消令牌
        self.cancel.cancelled().await;
        self.transition(SessionState::Closing);

        self.requests.close();
        self.requests.wait().await;
        if let Err(err) = send_task.await {
            tracing::warn!(error = %err, "websocket send task panicked");
        }
        if let Err(err) = recv_task.await {
            tracing::warn!(error = %err, "websocket receive task panicked");
        }

        tracing::info!(
            user_id = %self.user_id,
            dropped_frames = outbound.dropped(),
            "websocket connection released"
        );
        self.transition(SessionState::Closed);
    }
}

/// 写任务接收的命令
#[derive(Debug)]
enum WsCommand {
    Frame(ServerFrame),
    Pong(Bytes),
}

/// 发送队列的入口。队列满时丢弃新帧，从不阻塞调用方。
#[derive(Clone)]
pub(crate) struct OutboundHandle {
    tx: mpsc::Sender<WsCommand>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl OutboundHandle {
    fn new(tx: mpsc::Sender<WsCommand>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 入队成功返回 true
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.enqueue(WsCommand::Frame(frame))
    }

    fn pong(&self, data: Bytes) -> bool {
        self.enqueue(WsCommand::Pong(data))
    }

    fn enqueue(&self, command: WsCommand) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(command = ?command, "outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 单次聊天请求的事件出口，把流事件翻译成带会话 ID 的帧
struct RequestSink {
    outbound: OutboundHandle,
    session_id: String,
}

impl ChatEventSink for RequestSink {
    fn emit(&self, event: StreamEvent) {
        if let Some(frame) = ServerFrame::from_event(&self.session_id, event) {
            self.outbound.send(frame);
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut commands: mpsc::Receiver<WsCommand>,
    settings: Arc<WebSocketSettings>,
    cancel: CancellationToken,
) {
    let _guard = cancel.clone().drop_guard();
    let mut keepalive = time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(WsCommand::Frame(frame)) => match serde_json::to_string(&frame) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(err) => {
                        tracing::warn!(error = %err, kind = frame.kind(), "failed to serialize websocket frame");
                        continue;
                    }
                },
                Some(WsCommand::Pong(data)) => WsMessage::Pong(data),
                None => break,
            },
            _ = keepalive.tick() => WsMessage::Ping(Bytes::new()),
        };

        match time::timeout(settings.write_timeout, sender.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "websocket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(timeout_secs = settings.write_timeout.as_secs(), "websocket write timed out");
                break;
            }
        }
    }

    if time::timeout(settings.write_timeout, sender.close()).await.is_err() {
        tracing::debug!("websocket close handshake timed out");
    }
    tracing::debug!("websocket send task finished");
}

async fn read_loop(
    mut incoming: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    max_consecutive_malformed: u32,
) {
    let _guard = dispatcher.cancel.clone().drop_guard();
    let mut malformed = 0u32;

    loop {
        let message = tokio::select! {
            biased;
            _ = dispatcher.cancel.cancelled() => break,
            message = incoming.next() => message,
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                tracing::debug!(error = %err, "websocket read failed");
                break;
            }
            None => break,
        };

        let decoded = match message {
            WsMessage::Text(text) => dispatcher.handle_text(text.as_str()),
            WsMessage::Binary(_) => {
                dispatcher.reject_malformed("binary frames are not supported");
                Decoded::Malformed
            }
            WsMessage::Ping(data) => {
                dispatcher.outbound.pong(data);
                continue;
            }
            WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => {
                tracing::info!(user_id = %dispatcher.user_id, "websocket close received");
                break;
            }
        };

        match decoded {
            Decoded::Frame => malformed = 0,
            Decoded::Malformed => {
                malformed += 1;
                if malformed >= max_consecutive_malformed {
                    tracing::warn!(user_id = %dispatcher.user_id, malformed, "too many malformed frames, closing");
                    break;
                }
            }
        }
    }
    tracing::debug!("websocket receive task finished");
}

enum Decoded {
    Frame,
    Malformed,
}

/// 读任务的分派上下文
#[derive(Clone)]
struct Dispatcher {
    user_id: UserId,
    chat: Arc<ChatService>,
    outbound: OutboundHandle,
    cancel: CancellationToken,
    requests: TaskTracker,
    in_flight: Arc<Semaphore>,
    single_flight: bool,
}

impl Dispatcher {
    fn handle_text(&self, text: &str) -> Decoded {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "undecodable websocket frame");
                self.reject_malformed("message is not valid JSON");
                return Decoded::Malformed;
            }
        };

        match frame.kind.as_str() {
            "chat" => self.dispatch_chat(frame),
            "ping" => {
                self.outbound.send(ServerFrame::Pong);
            }
            other => {
                tracing::debug!(kind = other, "unknown websocket frame type");
                self.outbound.send(ServerFrame::error(
                    frame.session_id,
                    "unknown_type",
                    format!("unknown message type '{other}'"),
                ));
            }
        }
        Decoded::Frame
    }

    fn reject_malformed(&self, message: &str) {
        self.outbound
            .send(ServerFrame::error(None, "invalid_message", message));
    }

    fn dispatch_chat(&self, frame: InboundFrame) {
        let model_type = frame.model_type();
        let request = match ChatRequest::new(
            self.user_id,
            frame.session_id.as_deref(),
            frame.content.as_deref(),
            model_type,
        ) {
            Ok(request) => request,
            Err(err) => {
                let err = ChatError::from(err);
                self.outbound.send(ServerFrame::error(
                    frame.session_id,
                    err.code(),
                    err.public_message(),
                ));
                return;
            }
        };

        let permit = if self.single_flight {
            match self.in_flight.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.outbound.send(ServerFrame::error(
                        frame.session_id,
                        "request_in_progress",
                        "a request is already in progress",
                    ));
                    return;
                }
            }
        } else {
            None
        };

        let session_id = request.session_id.to_string();
        self.outbound.send(ServerFrame::Ack {
            session_id: session_id.clone(),
        });

        let chat = self.chat.clone();
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();
        let user_id = self.user_id;
        self.requests.spawn(async move {
            let sink = RequestSink {
                outbound: outbound.clone(),
                session_id: session_id.clone(),
            };
            let result = chat.process(request, &sink, cancel).await;
            // 终止帧发出前释放，客户端收到后即可发起下一个请求
            drop(permit);

            match result {
                Ok(outcome) => {
                    outbound.send(ServerFrame::Done {
                        session_id,
                        model_message_id: outcome.model_message_id,
                        content: outcome.content,
                    });
                }
                Err(ChatError::Cancelled) => {
                    tracing::debug!(user_id = %user_id, session_id = %session_id, "chat request cancelled");
                }
                Err(err) => {
                    tracing::warn!(user_id = %user_id, session_id = %session_id, code = err.code(), error = %err, "chat request failed");
                    outbound.send(ServerFrame::error(
                        Some(session_id),
                        err.code(),
                        err.public_message(),
                    ));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ServerFrame {
        ServerFrame::Chunk {
            session_id: "s".into(),
            content: text.into(),
        }
    }

    #[test]
    fn full_queue_drops_newest_frames_without_blocking() {
        let (tx, mut rx) = mpsc::channel(2);
        let outbound = OutboundHandle::new(tx, CancellationToken::new());

        assert!(outbound.send(chunk("a")));
        assert!(outbound.send(chunk("b")));
        assert!(!outbound.send(chunk("c")));
        assert!(!outbound.send(chunk("d")));
        assert_eq!(outbound.dropped(), 2);

        let mut kept = Vec::new();
        while let Ok(WsCommand::Frame(ServerFrame::Chunk { content, .. })) = rx.try_recv() {
            kept.push(content);
        }
        assert_eq!(kept, ["a", "b"]);
    }

    #[test]
    fn cancelled_session_refuses_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let outbound = OutboundHandle::new(tx, cancel.clone());

        cancel.cancel();
        assert!(!outbound.send(ServerFrame::Pong));
        assert!(rx.try_recv().is_err());
        assert_eq!(outbound.dropped(), 0);
    }

    #[test]
    fn request_sink_holds_back_done_and_tags_session() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = RequestSink {
            outbound: OutboundHandle::new(tx, CancellationToken::new()),
            session_id: "abc".into(),
        };

        sink.emit(StreamEvent::GuardPassed);
        sink.emit(StreamEvent::Done {
            usage: Default::default(),
            full_content: None,
        });

        match rx.try_recv() {
            Ok(WsCommand::Frame(ServerFrame::GuardPassed { session_id })) => {
                assert_eq!(session_id, "abc")
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn origin_allow_list() {
        let mut settings = WebSocketSettings::default();
        assert!(settings.allowed_origins.is_empty());
        assert!(!settings.origin_allowed(Some("https://evil.example")));
        assert!(!settings.origin_allowed(None));

        settings.allowed_origins = vec!["https://chat.example.com/".into()];
        assert!(settings.origin_allowed(Some("https://chat.example.com")));
        assert!(!settings.origin_allowed(Some("https://evil.example.com")));
        assert!(!settings.origin_allowed(None));
    }
}
