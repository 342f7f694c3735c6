//! 令牌签发与校验
//!
//! 使用 RS256 签发访问/刷新令牌对。刷新令牌在存储中只保留一份记录，
//! 轮换时通过 [`RefreshTokenRepository::take`] 原子地取出并删除，保证单次使用。

use std::sync::Arc;

use chrono::Duration;
use domain::{
    AuthError, Claims, RefreshTokenRecord, RefreshTokenRepository, TokenKind, TokenPair, UserId,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, warn};

use crate::clock::Clock;

/// RS256 密钥对
#[derive(Clone)]
pub struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    pub fn from_pem(private_key_pem: &[u8], public_key_pem: &[u8]) -> Result<Self, AuthError> {
        let encoding = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| AuthError::Internal(format!("invalid private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| AuthError::Internal(format!("invalid public key: {e}")))?;
        Ok(Self { encoding, decoding })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::minutes(15),
            refresh: Duration::days(30),
        }
    }
}

impl TokenLifetimes {
    pub fn new(access_minutes: i64, refresh_days: i64) -> Self {
        Self {
            access: Duration::minutes(access_minutes),
            refresh: Duration::days(refresh_days),
        }
    }
}

pub struct TokenAuthorityDependencies {
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct TokenAuthority {
    keys: SigningKeys,
    lifetimes: TokenLifetimes,
    deps: TokenAuthorityDependencies,
}

impl TokenAuthority {
    pub fn new(keys: SigningKeys, lifetimes: TokenLifetimes, deps: TokenAuthorityDependencies) -> Self {
        Self {
            keys,
            lifetimes,
            deps,
        }
    }

    /// 签发令牌对，刷新令牌记录写入存储后才返回
    pub async fn issue_pair(&self, user_id: UserId) -> Result<TokenPair, AuthError> {
        let now = self.deps.clock.now();
        let access_expires_at = now + self.lifetimes.access;
        let refresh_expires_at = now + self.lifetimes.refresh;

        let access_token = self.sign(&Claims::new(user_id, TokenKind::Access, now, access_expires_at))?;
        let refresh_token =
            self.sign(&Claims::new(user_id, TokenKind::Refresh, now, refresh_expires_at))?;

        let record = RefreshTokenRecord {
            user_id,
            token: refresh_token.clone(),
            expires_at: refresh_expires_at,
            created_at: now,
        };
        self.deps
            .refresh_tokens
            .store(&record)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        debug!(user_id = %user_id, "issued token pair");
        Ok(TokenPair {
            user_id,
            access_token,
            refresh_token,
            access_token_expires_at: access_expires_at,
            refresh_token_expires_at: refresh_expires_at,
        })
    }

    /// 校验访问令牌并返回用户ID
    pub fn validate_access(&self, token: &str) -> Result<UserId, AuthError> {
        self.verify(token, TokenKind::Access).map(|claims| claims.subject())
    }

    /// 用旧的刷新令牌换取新令牌对
    pub async fn rotate_refresh(&self, old_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.verify(old_token, TokenKind::Refresh)?;

        let record = self
            .deps
            .refresh_tokens
            .take(old_token)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::NotFound)?;

        if record.is_expired_at(self.deps.clock.now()) {
            return Err(AuthError::Expired);
        }
        if record.user_id != claims.subject() {
            warn!(user_id = %claims.subject(), "refresh token record belongs to another user");
            return Err(AuthError::Invalid);
        }

        self.issue_pair(record.user_id).await
    }

    /// 撤销刷新令牌，返回记录是否存在
    pub async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        self.deps
            .refresh_tokens
            .delete(token)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// 清理已过期的刷新令牌记录
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.deps
            .refresh_tokens
            .purge_expired(self.deps.clock.now())
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        // 过期由注入的时钟判断，库只负责签名和结构
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.keys.decoding, &validation)
            .map_err(|e| classify(e.kind()))?
            .claims;

        if claims.typ != expected {
            return Err(AuthError::Invalid);
        }
        if claims.exp <= self.deps.clock.now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::Malformed,
        _ => AuthError::Invalid,
    }
}
