//! 配额计数存储接口

use async_trait::async_trait;

use crate::errors::RepositoryResult;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// 读取计数器；不存在时返回 `None`
    async fn get(&self, key: &str) -> RepositoryResult<Option<i64>>;

    /// 在同一个原子单元内累加计数并重设过期时间，返回累加后的值
    async fn increment_with_ttl(&self, key: &str, amount: i64, ttl_secs: i64) -> RepositoryResult<i64>;
}
