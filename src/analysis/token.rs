use serde::{Deserialize, Serialize};

/// Token representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    /// 0-based word index in the document, assigned before any filtering
    /// so phrase positions stay stable when filters drop tokens.
    pub position: u32,
    /// Character offset of the token start in the original text.
    pub offset: usize,
}

impl Token {
    pub fn new(text: String, position: u32, offset: usize) -> Self {
        Token {
            text,
            position,
            offset,
        }
    }
}
