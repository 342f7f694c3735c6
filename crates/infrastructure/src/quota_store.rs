//! Redis 配额计数器

use async_trait::async_trait;
use domain::{QuotaStore, RepositoryError, RepositoryResult};
use redis::aio::ConnectionManager;

#[derive(Clone)]
pub struct RedisQuotaStore {
    conn: ConnectionManager,
}

impl RedisQuotaStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn))
    }
}

fn map_redis_err(err: redis::RedisError) -> RepositoryError {
    RepositoryError::storage(format!("Redis operation failed: {err}"))
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn get(&self, key: &str) -> RepositoryResult<Option<i64>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)
    }

    async fn increment_with_ttl(&self, key: &str, amount: i64, ttl_secs: i64) -> RepositoryResult<i64> {
        let mut conn = self.conn.clone();
        // MULTI/EXEC：累加和续期要么都生效，要么都不生效
        let (total,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, amount)
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        tracing::debug!(key, amount, total, ttl_secs, "quota counter incremented");
        Ok(total)
    }
}
