use crate::analysis::token::Token;
use unicode_segmentation::UnicodeSegmentation;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Standard Unicode tokenizer. Splits on word boundaries and records the
/// character offset of each token in the original text; case folding is
/// left to the filter chain so offsets stay accurate.
#[derive(Debug, Clone, Default)]
pub struct StandardTokenizer;

impl StandardTokenizer {
    pub fn new() -> Self {
        StandardTokenizer
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        // unicode_word_indices yields byte offsets; fold them into char
        // offsets incrementally since they arrive in ascending order.
        let mut last_byte = 0usize;
        let mut last_char = 0usize;

        for (byte_offset, word) in text.unicode_word_indices() {
            let char_offset = last_char + text[last_byte..byte_offset].chars().count();
            last_byte = byte_offset;
            last_char = char_offset;

            tokens.push(Token::new(word.to_string(), position, char_offset));
            position += 1;
        }

        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }
}

/// Whitespace-only tokenizer. Keeps punctuation attached to words, for
/// corpora where identifiers like "foo.bar" or "#tag" must stay intact.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        WhitespaceTokenizer
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut char_offset = 0usize;
        let mut current_start = None;
        let mut current = String::new();

        for c in text.chars() {
            if c.is_whitespace() {
                if let Some(start) = current_start.take() {
                    tokens.push(Token::new(std::mem::take(&mut current), position, start));
                    position += 1;
                }
            } else {
                if current_start.is_none() {
                    current_start = Some(char_offset);
                }
                current.push(c);
            }
            char_offset += 1;
        }
        if let Some(start) = current_start {
            tokens.push(Token::new(current, position, start));
        }

        tokens
    }

    fn name(&self) -> &str {
        "whitespace"
    }
}
