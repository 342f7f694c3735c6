//! 每日令牌配额
//!
//! 读写都通过同一个 [`QuotaCalendar`] 计算日期键和过期时间。检查与扣减之间不加锁，
//! 同一用户的并发请求可能少量超额。

use std::sync::Arc;

use domain::{QuotaCalendar, QuotaError, QuotaStatus, QuotaStore, UserId};
use tracing::debug;

use crate::clock::Clock;

/// 提示词分词器
pub trait PromptTokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize, QuotaError>;
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub daily_limit: i64,
    pub max_prompt_tokens: usize,
    pub calendar: QuotaCalendar,
}

pub struct QuotaLedgerDependencies {
    pub store: Arc<dyn QuotaStore>,
    pub tokenizer: Arc<dyn PromptTokenizer>,
    pub clock: Arc<dyn Clock>,
}

pub struct QuotaLedger {
    policy: QuotaPolicy,
    deps: QuotaLedgerDependencies,
}

impl QuotaLedger {
    pub fn new(policy: QuotaPolicy, deps: QuotaLedgerDependencies) -> Self {
        Self { policy, deps }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// 返回提示词令牌数，超过上限时拒绝
    pub fn check_prompt_size(&self, text: &str) -> Result<usize, QuotaError> {
        let count = self.deps.tokenizer.count_tokens(text)?;
        if count > self.policy.max_prompt_tokens {
            return Err(QuotaError::PromptTooLarge {
                count,
                max: self.policy.max_prompt_tokens,
            });
        }
        Ok(count)
    }

    /// 读取当日用量；计数器不存在视为 0
    pub async fn check_quota(&self, user_id: UserId) -> Result<QuotaStatus, QuotaError> {
        let key = self.policy.calendar.quota_key(user_id, self.deps.clock.now());
        let used = self
            .deps
            .store
            .get(&key)
            .await
            .map_err(|e| QuotaError::Store(e.to_string()))?
            .unwrap_or(0);

        Ok(QuotaStatus::evaluate(user_id, used, self.policy.daily_limit))
    }

    /// 累加当日用量，并把计数器过期时间设到下一个日边界
    pub async fn consume_tokens(&self, user_id: UserId, amount: i64) -> Result<(), QuotaError> {
        if amount <= 0 {
            return Ok(());
        }

        let now = self.deps.clock.now();
        let key = self.policy.calendar.quota_key(user_id, now);
        let ttl = self.policy.calendar.seconds_until_boundary(now);

        let total = self
            .deps
            .store
            .increment_with_ttl(&key, amount, ttl)
            .await
            .map_err(|e| QuotaError::Store(e.to_string()))?;

        debug!(user_id = %user_id, amount, total, ttl, "consumed tokens");
        Ok(())
    }
}
