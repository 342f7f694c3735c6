//! 访问令牌提取与刷新令牌 Cookie
//!
//! 访问令牌来自 `Authorization: Bearer` 头或升级请求的 `token` 查询参数，
//! 刷新令牌只通过限定在 `/auth` 路径下的 HttpOnly Cookie 传递。

use application::TokenAuthority;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::cookie::{Cookie, SameSite};
use domain::{AuthAction, UserId};

use crate::error::ApiError;

pub const REFRESH_COOKIE: &str = "refresh_token";
pub const REFRESH_COOKIE_PATH: &str = "/auth";

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 优先使用查询参数中的令牌，其次是 Bearer 头
pub fn authenticate(
    authority: &TokenAuthority,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserId, ApiError> {
    let token = query_token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| ApiError::unauthorized("missing access token", AuthAction::Logout))?;

    authority.validate_access(token).map_err(|err| {
        tracing::debug!(error = %err, "access token rejected");
        ApiError::from(err)
    })
}

pub fn refresh_cookie(token: String, max_age: chrono::Duration) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .build()
}

/// 用于清除客户端 Cookie 的同名同路径 Cookie
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, ""))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::ZERO)
        .build()
}
