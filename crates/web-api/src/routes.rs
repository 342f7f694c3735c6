use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use domain::{AuthError, QuotaStatus, UserId};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, error::ApiError, state::AppState};

/// 成功响应的统一信封
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    code: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            code: "success",
            message: "success",
            data: Some(data),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    access_token_expires_at: DateTime<Utc>,
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_routes())
        .nest("/api", api_routes());

    if let Some(cors) = cors_layer(&state.sessions.settings().allowed_origins) {
        router = router.layer(cors);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/quota", get(quota_status))
}

/// 刷新 Cookie 需要跨站携带凭据，只对显式允许的来源开放
fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]),
    )
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<RefreshResponse>>), ApiError> {
    let old_token = jar
        .get(auth::REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::refresh_failed(AuthError::NotFound))?;

    let pair = state
        .token_authority
        .rotate_refresh(&old_token)
        .await
        .map_err(|err| {
            tracing::info!(error = %err, "refresh token rejected");
            ApiError::refresh_failed(err)
        })?;

    let max_age = state.token_authority.lifetimes().refresh;
    let jar = jar.add(auth::refresh_cookie(pair.refresh_token, max_age));

    Ok((
        jar,
        ApiResponse::success(RefreshResponse {
            access_token: pair.access_token,
            access_token_expires_at: pair.access_token_expires_at,
            user_id: pair.user_id,
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    let token = jar
        .get(auth::REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::refresh_failed(AuthError::NotFound))?;

    let revoked = state.token_authority.revoke(&token).await?;
    tracing::info!(revoked, "logout processed");

    let jar = jar.remove(auth::removal_cookie());
    Ok((
        jar,
        Json(ApiResponse {
            code: "success",
            message: "success",
            data: None,
        }),
    ))
}

async fn quota_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<QuotaStatus>>, ApiError> {
    let user_id = auth::authenticate(&state.token_authority, &headers, None)?;
    let status = state.chat_service.quota().check_quota(user_id).await?;
    Ok(ApiResponse::success(status))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.sessions.settings().origin_allowed(origin) {
        tracing::warn!(origin = ?origin, "websocket upgrade from disallowed origin");
        return Err(ApiError::forbidden("origin not allowed"));
    }

    let user_id = auth::authenticate(&state.token_authority, &headers, query.token.as_deref())?;
    let session = state.sessions.open(user_id);
    let sessions = state.sessions.clone();

    Ok(ws.on_upgrade(move |socket| async move { sessions.serve(session, socket).await }))
}
