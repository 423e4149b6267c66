pub mod lemmatizer;
pub mod length;
pub mod lowercase;
pub mod stopword;
