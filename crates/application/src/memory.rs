//! 内存适配器
//!
//! 单进程部署与测试使用，不需要 Postgres 或 Redis。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatSessionRepository, MessageRepository, ModelMessage, QuotaError, QuotaStore,
    RefreshTokenRecord, RefreshTokenRepository, RepositoryError, RepositoryResult, SessionId,
    Timestamp, UserId, UserMessage,
};
use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::services::quota_ledger::PromptTokenizer;

#[derive(Default)]
pub struct InMemoryRefreshTokenRepository {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenRepository {
    async fn store(&self, record: &RefreshTokenRecord) -> RepositoryResult<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.token) {
            return Err(RepositoryError::Conflict);
        }
        records.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn take(&self, token: &str) -> RepositoryResult<Option<RefreshTokenRecord>> {
        Ok(self.records.lock().await.remove(token))
    }

    async fn delete(&self, token: &str) -> RepositoryResult<bool> {
        Ok(self.records.lock().await.remove(token).is_some())
    }

    async fn purge_expired(&self, now: Timestamp) -> RepositoryResult<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}

/// 带过期时间的内存计数器
pub struct InMemoryQuotaStore {
    clock: Arc<dyn Clock>,
    counters: Mutex<HashMap<String, (i64, Timestamp)>>,
}

impl InMemoryQuotaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// 计数器的过期时间
    pub async fn expires_at(&self, key: &str) -> Option<Timestamp> {
        self.counters.lock().await.get(key).map(|(_, at)| *at)
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get(&self, key: &str) -> RepositoryResult<Option<i64>> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;
        match counters.get(key) {
            Some((_, expires_at)) if *expires_at <= now => {
                counters.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(*value)),
            None => Ok(None),
        }
    }

    async fn increment_with_ttl(&self, key: &str, amount: i64, ttl_secs: i64) -> RepositoryResult<i64> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::seconds(ttl_secs);
        let mut counters = self.counters.lock().await;

        let entry = counters.entry(key.to_string()).or_insert((0, expires_at));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += amount;
        entry.1 = expires_at;
        Ok(entry.0)
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    user_id: UserId,
    last_message_at: Option<Timestamp>,
}

/// 内存中的聊天会话与消息
#[derive(Default)]
pub struct InMemoryChatStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    user_messages: RwLock<Vec<UserMessage>>,
    model_messages: RwLock<Vec<ModelMessage>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 会话的增删改不在网关内，这里只提供预置
    pub async fn create_session(&self, user_id: UserId, session_id: SessionId) {
        self.sessions.write().await.insert(
            session_id,
            SessionRecord {
                user_id,
                last_message_at: None,
            },
        );
    }

    pub async fn last_message_at(&self, session_id: SessionId) -> Option<Timestamp> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .and_then(|record| record.last_message_at)
    }

    pub async fn user_messages(&self) -> Vec<UserMessage> {
        self.user_messages.read().await.clone()
    }

    pub async fn model_messages(&self) -> Vec<ModelMessage> {
        self.model_messages.read().await.clone()
    }
}

#[async_trait]
impl ChatSessionRepository for InMemoryChatStore {
    async fn touch_last_message(
        &self,
        user_id: UserId,
        session_id: SessionId,
        at: Timestamp,
    ) -> RepositoryResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(record) if record.user_id == user_id => {
                record.last_message_at = Some(at);
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn save_user_message(&self, message: &UserMessage) -> RepositoryResult<()> {
        self.user_messages.write().await.push(message.clone());
        Ok(())
    }

    async fn save_model_message(&self, message: &ModelMessage) -> RepositoryResult<()> {
        self.model_messages.write().await.push(message.clone());
        Ok(())
    }
}

/// 按空白切分计数的分词器，只用于测试和本地演示
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl PromptTokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, QuotaError> {
        Ok(text.split_whitespace().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[tokio::test]
    async fn take_removes_record_exactly_once() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let record = RefreshTokenRecord {
            user_id: UserId::from(Uuid::new_v4()),
            token: "t1".into(),
            expires_at: now + Duration::days(1),
            created_at: now,
        };
        repo.store(&record).await.unwrap();

        assert_eq!(repo.take("t1").await.unwrap(), Some(record));
        assert_eq!(repo.take("t1").await.unwrap(), None);
        assert!(!repo.delete("t1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_lapsed_records() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let user = UserId::from(Uuid::new_v4());
        for (token, offset) in [("old", -1), ("new", 1)] {
            repo.store(&RefreshTokenRecord {
                user_id: user,
                token: token.into(),
                expires_at: now + Duration::hours(offset),
                created_at: now,
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.purge_expired(now).await.unwrap(), 1);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn quota_counter_expires_with_ttl() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryQuotaStore::new(clock.clone());

        assert_eq!(store.increment_with_ttl("k", 5, 60).await.unwrap(), 5);
        assert_eq!(store.increment_with_ttl("k", 7, 60).await.unwrap(), 12);
        assert_eq!(store.get("k").await.unwrap(), Some(12));

        clock.advance(Duration::seconds(61));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.increment_with_ttl("k", 1, 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_requires_owned_session() {
        let store = InMemoryChatStore::new();
        let owner = UserId::from(Uuid::new_v4());
        let session = SessionId::from(Uuid::new_v4());
        store.create_session(owner, session).await;

        let now = Utc::now();
        store.touch_last_message(owner, session, now).await.unwrap();
        assert_eq!(store.last_message_at(session).await, Some(now));

        let stranger = UserId::from(Uuid::new_v4());
        assert_eq!(
            store.touch_last_message(stranger, session, now).await,
            Err(RepositoryError::NotFound)
        );
    }
}
