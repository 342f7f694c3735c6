use std::sync::Arc;

use application::{ChatService, TokenAuthority};

use crate::ws_connection::SessionFactory;

#[derive(Clone)]
pub struct AppState {
    pub token_authority: Arc<TokenAuthority>,
    pub chat_service: Arc<ChatService>,
    pub sessions: SessionFactory,
}

impl AppState {
    pub fn new(
        token_authority: Arc<TokenAuthority>,
        chat_service: Arc<ChatService>,
        sessions: SessionFactory,
    ) -> Self {
        Self {
            token_authority,
            chat_service,
            sessions,
        }
    }
}
