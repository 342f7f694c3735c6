//! 主应用程序入口
//!
//! 加载配置、连接外部依赖、组装服务并启动 Axum 服务。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    ChatService, ChatServiceDependencies, ChatSettings, Clock, QuotaLedger,
    QuotaLedgerDependencies, QuotaPolicy, SigningKeys, SystemClock, TokenAuthority,
    TokenAuthorityDependencies, TokenLifetimes,
};
use config::AppConfig;
use domain::QuotaCalendar;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, SessionFactory, WebSocketSettings};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let infra = Infrastructure::connect(&config)
        .await
        .context("failed to connect infrastructure")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let keys = SigningKeys::from_pem(
        config.jwt.private_key_pem.as_bytes(),
        config.jwt.public_key_pem.as_bytes(),
    )
    .context("invalid jwt key pair")?;

    let token_authority = Arc::new(TokenAuthority::new(
        keys,
        TokenLifetimes::new(
            config.jwt.access_token_ttl_minutes,
            config.jwt.refresh_token_ttl_days,
        ),
        TokenAuthorityDependencies {
            refresh_tokens: infra.storage.refresh_tokens.clone(),
            clock: clock.clone(),
        },
    ));

    let quota = Arc::new(QuotaLedger::new(
        QuotaPolicy {
            daily_limit: config.quota.daily_limit,
            max_prompt_tokens: config.quota.max_prompt_tokens,
            calendar: QuotaCalendar::with_offset_minutes(config.quota.utc_offset_minutes),
        },
        QuotaLedgerDependencies {
            store: infra.quota_store.clone(),
            tokenizer: infra.tokenizer.clone(),
            clock: clock.clone(),
        },
    ));

    let chat_service = Arc::new(ChatService::new(
        ChatSettings {
            event_buffer: config.websocket.event_buffer,
        },
        ChatServiceDependencies {
            quota,
            model: infra.model.clone(),
            sessions: infra.storage.chat.clone(),
            messages: infra.storage.chat.clone(),
            clock,
        },
    ));

    // 所有连接令牌的父令牌，关停时统一取消
    let shutdown = CancellationToken::new();
    let sessions = SessionFactory::new(
        chat_service.clone(),
        WebSocketSettings::from_config(&config.websocket),
        shutdown.clone(),
    );

    let purge = tokio::spawn(purge_refresh_tokens(token_authority.clone(), shutdown.clone()));

    let state = AppState::new(token_authority, chat_service, sessions.clone());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    tracing::info!(address = %config.bind_address(), "chat gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    tracing::info!(active_sessions = sessions.active_sessions(), "waiting for sessions to close");
    if tokio::time::timeout(grace, sessions.drain()).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "sessions did not close within grace period");
    }
    if let Err(err) = purge.await {
        tracing::warn!(error = %err, "refresh token purge task panicked");
    }

    tracing::info!("chat gateway stopped");
    Ok(())
}

/// 等待 SIGINT / SIGTERM，然后取消进程级令牌
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

/// 定期清理过期的刷新令牌记录
async fn purge_refresh_tokens(authority: Arc<TokenAuthority>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match authority.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "purged expired refresh tokens"),
                Err(err) => tracing::warn!(error = %err, "failed to purge refresh tokens"),
            },
        }
    }
}
