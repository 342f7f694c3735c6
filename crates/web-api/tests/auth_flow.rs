mod support;

use chrono::Duration;
use reqwest::{header, StatusCode};
use serde_json::Value;
use support::{spawn_app, TestOptions};

fn refresh_cookie_header(token: &str) -> String {
    format!("refresh_token={token}")
}

fn set_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn cookie_value(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("refresh_token="))
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = spawn_app(TestOptions::default()).await;
    let response = reqwest::get(app.http("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_rotates_pair_and_sets_scoped_cookie() {
    let app = spawn_app(TestOptions::default()).await;
    let (user, _, pair) = app.user_with_session().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.http("/auth/refresh"))
        .header(header::COOKIE, refresh_cookie_header(&pair.refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    assert!(cookie.contains("Path=/auth"), "{cookie}");
    assert!(cookie.contains("HttpOnly"), "{cookie}");
    assert!(cookie.contains("Secure"), "{cookie}");
    assert!(cookie.contains("SameSite=Strict"), "{cookie}");
    assert!(cookie.contains("Max-Age=2592000"), "{cookie}");
    let rotated = cookie_value(&cookie);
    assert!(!rotated.is_empty());
    assert_ne!(rotated, pair.refresh_token);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "success");
    assert_eq!(body["data"]["userId"], user.to_string());
    let access = body["data"]["accessToken"].as_str().unwrap();
    assert_eq!(app.authority.validate_access(access).unwrap(), user);

    // 旧令牌只能使用一次
    let response = client
        .post(app.http("/auth/refresh"))
        .header(header::COOKIE, refresh_cookie_header(&pair.refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["action"], "logout");

    assert_eq!(app.refresh_tokens.len().await, 1);
}

#[tokio::test]
async fn refresh_without_cookie_asks_for_logout() {
    let app = spawn_app(TestOptions::default()).await;

    let response = reqwest::Client::new()
        .post(app.http("/auth/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["data"]["action"], "logout");
}

#[tokio::test]
async fn lapsed_refresh_token_asks_for_logout() {
    let app = spawn_app(TestOptions::default()).await;
    let (_, _, pair) = app.user_with_session().await;
    app.clock.advance(Duration::days(31));

    let response = reqwest::Client::new()
        .post(app.http("/auth/refresh"))
        .header(header::COOKIE, refresh_cookie_header(&pair.refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "token_expired");
    assert_eq!(body["data"]["action"], "logout");
}

#[tokio::test]
async fn logout_revokes_refresh_token_and_clears_cookie() {
    let app = spawn_app(TestOptions::default()).await;
    let (_, _, pair) = app.user_with_session().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.http("/auth/logout"))
        .header(header::COOKIE, refresh_cookie_header(&pair.refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("refresh_token=;"), "{cookie}");
    assert!(cookie.contains("Path=/auth"), "{cookie}");
    assert_eq!(app.refresh_tokens.len().await, 0);

    let response = client
        .post(app.http("/auth/refresh"))
        .header(header::COOKIE, refresh_cookie_header(&pair.refresh_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn quota_endpoint_reports_current_usage() {
    let app = spawn_app(TestOptions::default()).await;
    let (user, _, pair) = app.user_with_session().await;
    app.quota.consume_tokens(user, 250).await.unwrap();

    let response = reqwest::Client::new()
        .get(app.http("/api/quota"))
        .bearer_auth(&pair.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["userId"], user.to_string());
    assert_eq!(body["data"]["tokensUsed"], 250);
    assert_eq!(body["data"]["remaining"], 750);
    assert_eq!(body["data"]["isExceeded"], false);
}

#[tokio::test]
async fn expired_access_token_asks_for_refresh() {
    let app = spawn_app(TestOptions::default()).await;
    let (_, _, pair) = app.user_with_session().await;
    let client = reqwest::Client::new();

    let response = client.get(app.http("/api/quota")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["action"], "logout");

    app.clock.advance(Duration::minutes(16));
    let response = client
        .get(app.http("/api/quota"))
        .bearer_auth(&pair.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "token_expired");
    assert_eq!(body["data"]["action"], "refresh");

    // 刷新令牌不能当作访问令牌使用
    let response = client
        .get(app.http("/api/quota"))
        .bearer_auth(&pair.refresh_token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["action"], "logout");
}
