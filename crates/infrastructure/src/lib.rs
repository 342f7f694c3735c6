//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、Redis 配额计数、上游模型 SSE 客户端与分词器，实现应用/领域层定义的接口。

pub mod builder;
pub mod migrations;
pub mod model_client;
pub mod quota_store;
pub mod repository;
pub mod tokenizer;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use model_client::{HttpModelStreamer, ModelEndpoints};
pub use quota_store::RedisQuotaStore;
pub use repository::{create_pg_pool, PgChatRepository, PgRefreshTokenRepository, PgStorage};
pub use tokenizer::TiktokenTokenizer;
