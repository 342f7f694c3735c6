//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，内层定义接口，外层（infrastructure 或内存适配器）实现接口。

pub mod chat_repository;
pub mod quota_store;
pub mod refresh_token_repository;

pub use chat_repository::{ChatSessionRepository, MessageRepository};
pub use quota_store::QuotaStore;
pub use refresh_token_repository::RefreshTokenRepository;
