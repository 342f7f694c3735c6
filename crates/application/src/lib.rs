//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：令牌签发与轮换、每日配额、
//! 上游事件流桥接以及聊天编排，并对外部适配器（存储、分词器、模型客户端）做抽象。

pub mod clock;
pub mod error;
pub mod memory;
pub mod services;
pub mod streaming;

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use error::ChatError;
pub use services::{
    ChatEventSink, ChatOutcome, ChatService, ChatServiceDependencies, ChatSettings,
    PromptTokenizer, QuotaLedger, QuotaLedgerDependencies, QuotaPolicy, SigningKeys,
    TokenAuthority, TokenAuthorityDependencies, TokenLifetimes,
};
pub use streaming::{
    relay_event_stream, DecodedLine, EventStreamDecoder, ModelRequest, ModelStreamer, StreamEnd,
    StreamError,
};
