mod chat_service;
pub mod quota_ledger;
mod token_authority;

pub use chat_service::{
    ChatEventSink, ChatOutcome, ChatService, ChatServiceDependencies, ChatSettings,
};
pub use quota_ledger::{PromptTokenizer, QuotaLedger, QuotaLedgerDependencies, QuotaPolicy};
pub use token_authority::{
    SigningKeys, TokenAuthority, TokenAuthorityDependencies, TokenLifetimes,
};
