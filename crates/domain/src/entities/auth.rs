//! JWT认证相关实体
//!
//! 定义访问/刷新令牌声明、令牌对、持久化的刷新令牌记录以及认证错误。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::value_objects::UserId;

/// 令牌种类；访问令牌不能当作刷新令牌使用，反之亦然。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT令牌声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// 用户ID
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    /// 主题（与 userId 相同，便于通用 JWT 工具识别）
    pub sub: String,
    /// 令牌种类
    pub typ: TokenKind,
    /// 令牌唯一标识符，保证同一秒内签发的令牌互不相同
    pub jti: String,
    /// 签发时间
    pub iat: i64,
    /// 过期时间
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: UserId, typ: TokenKind, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            sub: user_id.to_string(),
            typ,
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    pub fn subject(&self) -> UserId {
        UserId::from(self.user_id)
    }
}

/// 令牌对
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub user_id: UserId,
    /// 访问令牌
    pub access_token: String,
    /// 刷新令牌
    pub refresh_token: String,
    /// 访问令牌过期时间
    pub access_token_expires_at: DateTime<Utc>,
    /// 刷新令牌过期时间
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// 持久化的刷新令牌记录
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 认证失败后客户端需要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    /// 静默刷新访问令牌
    Refresh,
    /// 强制重新登录
    Logout,
}

/// 认证错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// 令牌已过期
    #[error("token expired")]
    Expired,
    /// 签名、算法或令牌种类不正确
    #[error("invalid token")]
    Invalid,
    /// 无法解析的令牌
    #[error("malformed token")]
    Malformed,
    /// 刷新令牌不存在（未签发、已轮换或已撤销）
    #[error("refresh token not found")]
    NotFound,
    /// 内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// 过期的令牌提示客户端刷新，其余一律要求重新认证。
    pub fn required_action(&self) -> AuthAction {
        match self {
            AuthError::Expired => AuthAction::Refresh,
            _ => AuthAction::Logout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn only_expiry_asks_for_refresh() {
        assert_eq!(AuthError::Expired.required_action(), AuthAction::Refresh);
        for err in [
            AuthError::Invalid,
            AuthError::Malformed,
            AuthError::NotFound,
            AuthError::Internal("db".into()),
        ] {
            assert_eq!(err.required_action(), AuthAction::Logout, "{err}");
        }
    }

    #[test]
    fn claims_carry_subject_and_unique_jti() {
        let user = UserId::from(Uuid::new_v4());
        let now = Utc::now();
        let a = Claims::new(user, TokenKind::Access, now, now + Duration::minutes(15));
        let b = Claims::new(user, TokenKind::Access, now, now + Duration::minutes(15));

        assert_eq!(a.subject(), user);
        assert_eq!(a.sub, user.to_string());
        assert_ne!(a.jti, b.jti);

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["userId"], user.to_string());
        assert_eq!(json["typ"], "access");
    }
}
