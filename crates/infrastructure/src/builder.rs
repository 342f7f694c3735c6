use std::sync::Arc;

use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    model_client::{HttpModelStreamer, ModelEndpoints},
    quota_store::RedisQuotaStore,
    repository::{create_pg_pool, PgStorage},
    tokenizer::TiktokenTokenizer,
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] domain::QuotaError),
}

/// 所有外部适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: PgStorage,
    pub quota_store: Arc<RedisQuotaStore>,
    pub tokenizer: Arc<TiktokenTokenizer>,
    pub model: Arc<HttpModelStreamer>,
}

impl Infrastructure {
    /// 建立连接池并执行迁移，连接 Redis，加载分词表
    pub async fn connect(config: &config::AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("database migrations applied");

        let quota_store = Arc::new(RedisQuotaStore::connect(&config.redis.url).await?);
        let tokenizer = Arc::new(TiktokenTokenizer::cl100k()?);
        let model = Arc::new(HttpModelStreamer::new(ModelEndpoints::from_config(
            &config.model,
        ))?);

        Ok(Self {
            storage: PgStorage::new(pool),
            quota_store,
            tokenizer,
            model,
        })
    }
}
