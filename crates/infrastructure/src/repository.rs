use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatSessionRepository, MessageRepository, ModelMessage, RefreshTokenRecord,
    RefreshTokenRepository, RepositoryError, RepositoryResult, SessionId, Timestamp, UserId,
    UserMessage,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

#[derive(Debug, FromRow)]
struct RefreshTokenRow {
    user_id: Uuid,
    token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(value: RefreshTokenRow) -> Self {
        Self {
            user_id: UserId::from(value.user_id),
            token: value.token,
            expires_at: value.expires_at,
            created_at: value.created_at,
        }
    }
}

pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn store(&self, record: &RefreshTokenRecord) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::from(record.user_id))
        .bind(&record.token)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn take(&self, token: &str) -> RepositoryResult<Option<RefreshTokenRecord>> {
        // 单条 DELETE ... RETURNING，并发调用只有一个能拿到行
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token = $1
            RETURNING user_id, token, expires_at, created_at
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn delete(&self, token: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: Timestamp) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatSessionRepository for PgChatRepository {
    async fn touch_last_message(
        &self,
        user_id: UserId,
        session_id: SessionId,
        at: Timestamp,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET last_message_at = $3
            WHERE user_id = $1 AND session_id = $2
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(session_id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PgChatRepository {
    async fn save_user_message(&self, message: &UserMessage) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_messages
                (message_id, user_id, session_id, content, user_prompt_tokens, model_answer_message_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.user_id))
        .bind(Uuid::from(message.session_id))
        .bind(&message.content)
        .bind(message.prompt_tokens)
        .bind(message.model_answer_message_id.map(Uuid::from))
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn save_model_message(&self, message: &ModelMessage) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_messages
                (message_id, user_id, session_id, model_type, content,
                 total_input_tokens, total_output_tokens, final_output_tokens, total_used_tokens,
                 response_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.user_id))
        .bind(Uuid::from(message.session_id))
        .bind(message.model_type.as_str())
        .bind(&message.content)
        .bind(message.usage.total_input_tokens)
        .bind(message.usage.total_output_tokens)
        .bind(message.usage.final_output_tokens)
        .bind(message.usage.total_used_tokens)
        .bind(message.response_time_ms)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub refresh_tokens: Arc<PgRefreshTokenRepository>,
    pub chat: Arc<PgChatRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            refresh_tokens: Arc::new(PgRefreshTokenRepository::new(pool.clone())),
            chat: Arc::new(PgChatRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
