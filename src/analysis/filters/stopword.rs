use std::collections::HashSet;
use std::sync::Arc;

use crate::analysis::filter::{StopWordRemover, TokenFilter};
use crate::analysis::token::Token;

/// Set-backed stop-word hook. Matching is case-insensitive.
pub struct BasicStopWordRemover {
    pub stop_words: HashSet<String>,
}

impl BasicStopWordRemover {
    pub fn new(stop_words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        BasicStopWordRemover {
            stop_words: stop_words
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
        }
    }

    pub fn english() -> Self {
        let words = vec![
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in",
            "is", "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with",
        ];
        BasicStopWordRemover::new(words)
    }
}

impl StopWordRemover for BasicStopWordRemover {
    fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(&word.to_lowercase())
    }
}

/// Filter stage that consults the configured hook.
pub struct StopWordFilter {
    pub remover: Arc<dyn StopWordRemover>,
}

impl StopWordFilter {
    pub fn new(remover: Arc<dyn StopWordRemover>) -> Self {
        StopWordFilter { remover }
    }
}

impl TokenFilter for StopWordFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .filter(|token| !self.remover.is_stop_word(&token.text))
            .collect()
    }

    fn name(&self) -> &str {
        "stop_words"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<Token> {
        words
            .iter()
            .enumerate()
            .map(|(i, w)| Token::new(w.to_string(), i as u32, 0))
            .collect()
    }

    #[test]
    fn test_english_stop_words() {
        let filter = StopWordFilter::new(Arc::new(BasicStopWordRemover::english()));
        let out = filter.filter(tokens(&["the", "cat", "and", "dog"]));
        let texts: Vec<&str> = out.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["cat", "dog"]);
    }

    #[test]
    fn test_case_insensitive() {
        let remover = BasicStopWordRemover::english();
        assert!(remover.is_stop_word("The"));
        assert!(remover.is_stop_word("AND"));
        assert!(!remover.is_stop_word("Garden"));
    }

    #[test]
    fn test_positions_survive_removal() {
        let filter = StopWordFilter::new(Arc::new(BasicStopWordRemover::english()));
        let out = filter.filter(tokens(&["the", "cat", "in", "garden"]));
        assert_eq!(out[0].position, 1);
        assert_eq!(out[1].position, 3);
    }
}
