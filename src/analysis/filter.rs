use crate::analysis::token::Token;

pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Pluggable stop-word decision hook.
pub trait StopWordRemover: Send + Sync {
    fn is_stop_word(&self, word: &str) -> bool;
}
