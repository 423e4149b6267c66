use std::collections::HashMap;
use std::sync::Arc;

use rust_stemmers::{Algorithm, Stemmer};

use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Pluggable word-normalization hook.
pub trait Lemmatizer: Send + Sync {
    fn lemmatize(&self, word: &str) -> String;

    fn name(&self) -> &str;
}

/// Dictionary-plus-suffix-rules lemmatizer. Irregular forms are looked up
/// first; otherwise regular suffixes (-ies, -es, -s, -ing, -ed) are
/// stripped with doubled-consonant handling. Input is case-folded.
pub struct BasicLemmatizer {
    irregulars: HashMap<&'static str, &'static str>,
}

impl BasicLemmatizer {
    pub fn new() -> Self {
        let irregulars: HashMap<&'static str, &'static str> = [
            ("am", "be"),
            ("are", "be"),
            ("is", "be"),
            ("was", "be"),
            ("were", "be"),
            ("been", "be"),
            ("being", "be"),
            ("has", "have"),
            ("had", "have"),
            ("having", "have"),
            ("does", "do"),
            ("did", "do"),
            ("done", "do"),
            ("goes", "go"),
            ("went", "go"),
            ("gone", "go"),
            ("children", "child"),
            ("men", "man"),
            ("women", "woman"),
            ("mice", "mouse"),
            ("geese", "goose"),
            ("feet", "foot"),
            ("teeth", "tooth"),
            ("people", "person"),
            ("better", "good"),
            ("best", "good"),
            ("worse", "bad"),
            ("worst", "bad"),
        ]
        .into_iter()
        .collect();
        BasicLemmatizer { irregulars }
    }

    fn strip_suffixes(word: &str) -> String {
        if let Some(stem) = word.strip_suffix("ies") {
            if stem.len() >= 2 {
                return format!("{stem}y");
            }
        }
        if word.len() >= 4 {
            for sibilant in ["ses", "xes", "zes", "ches", "shes"] {
                if word.ends_with(sibilant) {
                    return word[..word.len() - 2].to_string();
                }
            }
        }
        if let Some(stem) = word.strip_suffix("ing") {
            if stem.len() >= 2 {
                return Self::undouble(stem);
            }
        }
        if let Some(stem) = word.strip_suffix("ed") {
            if stem.len() >= 3 {
                return Self::undouble(stem);
            }
        }
        if word.len() >= 3
            && word.ends_with('s')
            && !word.ends_with("ss")
            && !word.ends_with("us")
            && !word.ends_with("is")
        {
            return word[..word.len() - 1].to_string();
        }
        word.to_string()
    }

    /// running -> runn -> run, but walk stays walk.
    fn undouble(stem: &str) -> String {
        let chars: Vec<char> = stem.chars().collect();
        let n = chars.len();
        if n >= 2 && chars[n - 1] == chars[n - 2] && !is_vowel(chars[n - 1]) {
            chars[..n - 1].iter().collect()
        } else {
            stem.to_string()
        }
    }
}

impl Default for BasicLemmatizer {
    fn default() -> Self {
        BasicLemmatizer::new()
    }
}

impl Lemmatizer for BasicLemmatizer {
    fn lemmatize(&self, word: &str) -> String {
        let lowered = word.to_lowercase();
        if let Some(lemma) = self.irregulars.get(lowered.as_str()) {
            return (*lemma).to_string();
        }
        BasicLemmatizer::strip_suffixes(&lowered)
    }

    fn name(&self) -> &str {
        "basic"
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Snowball-stemmer adapter, usable anywhere a lemmatizer hook is.
pub struct SnowballLemmatizer {
    pub algorithm: Algorithm,
}

impl SnowballLemmatizer {
    pub fn new(algorithm: Algorithm) -> Self {
        SnowballLemmatizer { algorithm }
    }

    pub fn english() -> Self {
        SnowballLemmatizer::new(Algorithm::English)
    }
}

impl Lemmatizer for SnowballLemmatizer {
    fn lemmatize(&self, word: &str) -> String {
        let stemmer = Stemmer::create(self.algorithm);
        stemmer.stem(&word.to_lowercase()).to_string()
    }

    fn name(&self) -> &str {
        "snowball"
    }
}

/// Filter stage that applies the configured lemmatizer hook.
pub struct LemmatizerFilter {
    pub lemmatizer: Arc<dyn Lemmatizer>,
}

impl LemmatizerFilter {
    pub fn new(lemmatizer: Arc<dyn Lemmatizer>) -> Self {
        LemmatizerFilter { lemmatizer }
    }
}

impl TokenFilter for LemmatizerFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .map(|mut token| {
                token.text = self.lemmatizer.lemmatize(&token.text);
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        "lemmatizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irregular_forms() {
        let lemmatizer = BasicLemmatizer::new();
        assert_eq!(lemmatizer.lemmatize("was"), "be");
        assert_eq!(lemmatizer.lemmatize("were"), "be");
        assert_eq!(lemmatizer.lemmatize("had"), "have");
        assert_eq!(lemmatizer.lemmatize("went"), "go");
        assert_eq!(lemmatizer.lemmatize("children"), "child");
        assert_eq!(lemmatizer.lemmatize("mice"), "mouse");
    }

    #[test]
    fn test_regular_suffixes() {
        let lemmatizer = BasicLemmatizer::new();
        assert_eq!(lemmatizer.lemmatize("cats"), "cat");
        assert_eq!(lemmatizer.lemmatize("running"), "run");
        assert_eq!(lemmatizer.lemmatize("walked"), "walk");
        assert_eq!(lemmatizer.lemmatize("going"), "go");
        assert_eq!(lemmatizer.lemmatize("boxes"), "box");
        assert_eq!(lemmatizer.lemmatize("stories"), "story");
        assert_eq!(lemmatizer.lemmatize("stopped"), "stop");
    }

    #[test]
    fn test_case_insensitive_input() {
        let lemmatizer = BasicLemmatizer::new();
        assert_eq!(lemmatizer.lemmatize("Children"), "child");
        assert_eq!(lemmatizer.lemmatize("RUNNING"), "run");
    }

    #[test]
    fn test_short_words_untouched() {
        let lemmatizer = BasicLemmatizer::new();
        assert_eq!(lemmatizer.lemmatize("go"), "go");
        assert_eq!(lemmatizer.lemmatize("bus"), "bus");
        assert_eq!(lemmatizer.lemmatize("glass"), "glass");
        assert_eq!(lemmatizer.lemmatize("this"), "this");
    }

    #[test]
    fn test_snowball_adapter() {
        let lemmatizer = SnowballLemmatizer::english();
        assert_eq!(lemmatizer.lemmatize("running"), "run");
        assert_eq!(lemmatizer.lemmatize("Walked"), "walk");
    }
}
