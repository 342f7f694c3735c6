#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::memory::{
    InMemoryChatStore, InMemoryQuotaStore, InMemoryRefreshTokenRepository, WhitespaceTokenizer,
};
use application::{
    ChatService, ChatServiceDependencies, ChatSettings, FixedClock, ModelRequest, ModelStreamer,
    QuotaLedger, QuotaLedgerDependencies, QuotaPolicy, SigningKeys, StreamEnd, StreamError,
    TokenAuthority, TokenAuthorityDependencies, TokenLifetimes,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{QuotaCalendar, SessionId, StreamEvent, TokenPair, TokenUsage, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpStream, sync::mpsc, sync::Notify};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, handshake::client::Request, http::HeaderValue, Message,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use web_api::{router, AppState, SessionFactory, WebSocketSettings};

const PRIVATE_PEM: &str = include_str!("../../../application/tests/fixtures/jwt_private.pem");
const PUBLIC_PEM: &str = include_str!("../../../application/tests/fixtures/jwt_public.pem");

/// 测试服务默认放行的 Origin
pub const TEST_ORIGIN: &str = "https://chat.test";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 放行 `TEST_ORIGIN` 的默认会话参数
pub fn test_settings() -> WebSocketSettings {
    WebSocketSettings {
        allowed_origins: vec![TEST_ORIGIN.into()],
        ..WebSocketSettings::default()
    }
}

/// 按脚本回放事件的上游模型；设置 `hold` 时在发完事件后等待放行或取消
pub struct ScriptedModel {
    events: Vec<StreamEvent>,
    hold: Option<Arc<Notify>>,
}

impl ScriptedModel {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self { events, hold: None }
    }

    pub fn held(events: Vec<StreamEvent>, gate: Arc<Notify>) -> Self {
        Self {
            events,
            hold: Some(gate),
        }
    }

    /// 连续发出 `count` 个内容片段，然后等待放行
    pub fn flood(count: usize, gate: Arc<Notify>) -> Self {
        let events = (0..count)
            .map(|i| StreamEvent::Content {
                text: format!("chunk-{i} "),
            })
            .collect();
        Self::held(events, gate)
    }

    pub fn hello() -> Self {
        Self::new(vec![
            StreamEvent::GuardPassed,
            StreamEvent::Status {
                message: "thinking".into(),
            },
            StreamEvent::Content { text: "Hel".into() },
            StreamEvent::Content { text: "lo".into() },
            StreamEvent::Done {
                usage: TokenUsage {
                    total_input_tokens: 4,
                    total_output_tokens: 2,
                    final_output_tokens: 2,
                    total_used_tokens: 6,
                },
                full_content: None,
            },
        ])
    }
}

#[async_trait]
impl ModelStreamer for ScriptedModel {
    async fn stream(
        &self,
        _request: &ModelRequest,
        sink: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<StreamEnd, StreamError> {
        for event in &self.events {
            if cancel.is_cancelled() || sink.send(event.clone()).await.is_err() {
                return Ok(StreamEnd::Cancelled);
            }
        }
        if let Some(gate) = &self.hold {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                _ = gate.notified() => {}
            }
        }
        Ok(StreamEnd::Terminal)
    }
}

pub struct TestOptions {
    pub model: ScriptedModel,
    pub settings: WebSocketSettings,
    pub daily_limit: i64,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            model: ScriptedModel::hello(),
            settings: test_settings(),
            daily_limit: 1000,
        }
    }
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub authority: Arc<TokenAuthority>,
    pub store: Arc<InMemoryChatStore>,
    pub refresh_tokens: Arc<InMemoryRefreshTokenRepository>,
    pub quota: Arc<QuotaLedger>,
    pub clock: Arc<FixedClock>,
    pub shutdown: CancellationToken,
}

pub async fn spawn_app(options: TestOptions) -> TestApp {
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let refresh_tokens = Arc::new(InMemoryRefreshTokenRepository::new());
    let keys = SigningKeys::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap();
    let authority = Arc::new(TokenAuthority::new(
        keys,
        TokenLifetimes::default(),
        TokenAuthorityDependencies {
            refresh_tokens: refresh_tokens.clone(),
            clock: clock.clone(),
        },
    ));

    let quota = Arc::new(QuotaLedger::new(
        QuotaPolicy {
            daily_limit: options.daily_limit,
            max_prompt_tokens: 64,
            calendar: QuotaCalendar::utc(),
        },
        QuotaLedgerDependencies {
            store: Arc::new(InMemoryQuotaStore::new(clock.clone())),
            tokenizer: Arc::new(WhitespaceTokenizer),
            clock: clock.clone(),
        },
    ));

    let store = Arc::new(InMemoryChatStore::new());
    let chat_service = Arc::new(ChatService::new(
        ChatSettings::default(),
        ChatServiceDependencies {
            quota: quota.clone(),
            model: Arc::new(options.model),
            sessions: store.clone(),
            messages: store.clone(),
            clock: clock.clone(),
        },
    ));

    let shutdown = CancellationToken::new();
    let sessions = SessionFactory::new(chat_service.clone(), options.settings, shutdown.clone());
    let app = router(AppState::new(authority.clone(), chat_service, sessions));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        authority,
        store,
        refresh_tokens,
        quota,
        clock,
        shutdown,
    }
}

impl TestApp {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/ws?token={}", self.addr, token)
    }

    /// 创建一个拥有聊天会话的用户并签发令牌对
    pub async fn user_with_session(&self) -> (UserId, SessionId, TokenPair) {
        let user = UserId::from(Uuid::new_v4());
        let session = SessionId::from(Uuid::new_v4());
        self.store.create_session(user, session).await;
        let pair = self.authority.issue_pair(user).await.unwrap();
        (user, session, pair)
    }

    /// 带 `TEST_ORIGIN` 的升级请求
    pub fn upgrade_request(&self, url: &str) -> Request {
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert("origin", HeaderValue::from_static(TEST_ORIGIN));
        request
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.upgrade_request(&self.ws_url(token)))
            .await
            .unwrap();
        ws
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// 读取下一个 JSON 帧，跳过协议层心跳；连接关闭时返回 None
pub async fn next_frame(ws: &mut WsClient) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame");
        match message {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap())
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(other)) => panic!("unexpected message: {other:?}"),
        }
    }
}

/// 读取帧直到遇到 done 或 error，返回全部帧
pub async fn frames_until_terminal(ws: &mut WsClient) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(ws).await {
        let terminal = matches!(frame["type"].as_str(), Some("done") | Some("error"));
        frames.push(frame);
        if terminal {
            break;
        }
    }
    frames
}

pub fn kinds(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .map(|frame| frame["type"].as_str().unwrap_or_default())
        .collect()
}
