//! 刷新令牌存储接口

use async_trait::async_trait;

use crate::entities::auth::RefreshTokenRecord;
use crate::errors::RepositoryResult;
use crate::value_objects::Timestamp;

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// 保存新签发的刷新令牌
    async fn store(&self, record: &RefreshTokenRecord) -> RepositoryResult<()>;

    /// 原子地取出并删除令牌记录。
    ///
    /// 同一个令牌并发调用时只有一个调用方能拿到 `Some`，轮换依赖这一点保证单次使用。
    async fn take(&self, token: &str) -> RepositoryResult<Option<RefreshTokenRecord>>;

    /// 删除令牌记录，返回记录是否存在
    async fn delete(&self, token: &str) -> RepositoryResult<bool>;

    /// 清理 `expires_at <= now` 的记录，返回清理数量
    async fn purge_expired(&self, now: Timestamp) -> RepositoryResult<u64>;
}
