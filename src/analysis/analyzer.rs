use std::sync::Arc;

use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lemmatizer::LemmatizerFilter;
use crate::analysis::filters::length::LengthFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer};
use crate::core::config::IndexConfig;

/// Text analysis pipeline: split, then run every filter stage in order.
/// Documents and queries go through the same instance so stored terms and
/// query terms always compare in normalized form.
pub struct Analyzer {
    pub tokenizer: Arc<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub name: String,
}

impl Analyzer {
    pub fn new(name: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Analyzer {
            tokenizer,
            filters: Vec::new(),
            name: name.into(),
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Build the stage chain an index configuration describes: case fold,
    /// length window, stop words, lemmatizer. Optional hooks that are not
    /// configured contribute no stage.
    pub fn from_config(config: &IndexConfig) -> Self {
        let tokenizer: Arc<dyn Tokenizer> = match &config.tokenizer {
            Some(custom) => Arc::clone(custom),
            None => Arc::new(StandardTokenizer::new()),
        };

        let mut analyzer = Analyzer::new(config.name.clone(), tokenizer)
            .add_filter(Box::new(LowercaseFilter));

        if config.min_token_length > 0 || config.max_token_length > 0 {
            analyzer = analyzer.add_filter(Box::new(LengthFilter::new(
                config.min_token_length,
                config.max_token_length,
            )));
        }

        if let Some(remover) = &config.stop_word_remover {
            analyzer = analyzer.add_filter(Box::new(StopWordFilter::new(Arc::clone(remover))));
        }

        if let Some(lemmatizer) = &config.lemmatizer {
            analyzer = analyzer.add_filter(Box::new(LemmatizerFilter::new(Arc::clone(lemmatizer))));
        }

        analyzer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::filters::lemmatizer::BasicLemmatizer;
    use crate::analysis::filters::stopword::BasicStopWordRemover;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_default_pipeline_lowercases() {
        let config = IndexConfig::new("t");
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze("Apple BANANA Cherry");
        assert_eq!(texts(&tokens), vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn test_length_window() {
        let mut config = IndexConfig::new("t");
        config.min_token_length = 3;
        config.max_token_length = 6;
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze("a big elephant ran by");
        assert_eq!(texts(&tokens), vec!["big", "ran"]);
    }

    #[test]
    fn test_stop_words_and_lemmatizer_chain() {
        let mut config = IndexConfig::new("t");
        config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
        config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze("The cats were running in the garden");
        assert_eq!(texts(&tokens), vec!["cat", "run", "garden"]);
    }

    #[test]
    fn test_word_positions_assigned_before_filtering() {
        let mut config = IndexConfig::new("t");
        config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
        let analyzer = Analyzer::from_config(&config);
        let tokens = analyzer.analyze("the quick fox");
        assert_eq!(texts(&tokens), vec!["quick", "fox"]);
        assert_eq!(tokens[0].position, 1);
        assert_eq!(tokens[1].position, 2);
    }

    #[test]
    fn test_normalization_idempotent() {
        let mut config = IndexConfig::new("t");
        config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
        let analyzer = Analyzer::from_config(&config);

        let input = "Children were RUNNING badly";
        let once: Vec<String> = analyzer
            .analyze(input)
            .into_iter()
            .map(|t| t.text)
            .collect();
        let twice: Vec<String> = analyzer
            .analyze(&once.join(" "))
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_after_filtering() {
        let mut config = IndexConfig::new("t");
        config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
        let analyzer = Analyzer::from_config(&config);
        assert!(analyzer.analyze("the and of").is_empty());
    }
}
