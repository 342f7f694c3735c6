//! Web API 层。
//!
//! 提供 Axum 路由：令牌刷新与登出、配额查询，以及承载聊天流的 WebSocket 会话。

mod auth;
mod error;
mod frames;
mod routes;
mod state;
mod ws_connection;

pub use auth::{REFRESH_COOKIE, REFRESH_COOKIE_PATH};
pub use error::{ApiError, ErrorBody};
pub use frames::{FrameError, InboundFrame, ServerFrame};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{ConnectionSession, SessionFactory, SessionState, WebSocketSettings};
