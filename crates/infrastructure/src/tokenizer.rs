//! 与 gpt-4 系列一致的 cl100k_base 分词

use std::sync::Arc;

use application::PromptTokenizer;
use domain::QuotaError;
use tiktoken_rs::CoreBPE;

#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    pub fn cl100k() -> Result<Self, QuotaError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| QuotaError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl PromptTokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, QuotaError> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_like_gpt4() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        assert_eq!(tokenizer.count_tokens("hello world").unwrap(), 2);
        assert_eq!(tokenizer.count_tokens("").unwrap(), 0);
    }
}
