use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Drops tokens outside the configured character-length window.
/// A bound of 0 disables that side of the window.
pub struct LengthFilter {
    pub min_length: usize,
    pub max_length: usize,
}

impl LengthFilter {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        LengthFilter {
            min_length,
            max_length,
        }
    }

    fn accepts(&self, token: &Token) -> bool {
        let length = token.text.chars().count();
        if self.min_length > 0 && length < self.min_length {
            return false;
        }
        if self.max_length > 0 && length > self.max_length {
            return false;
        }
        true
    }
}

impl TokenFilter for LengthFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .filter(|token| self.accepts(token))
            .collect()
    }

    fn name(&self) -> &str {
        "length"
    }
}
