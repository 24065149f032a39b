//! Token counting using tiktoken

use dashmap::DashMap;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::debug;

/// Tokenizer trait for different tokenization strategies
pub trait Tokenizer: Send + Sync {
    /// Count the tokens `text` occupies for `model`
    fn count_tokens(&self, text: &str, model: &str) -> usize;
}

/// Tiktoken-based tokenizer with one encoding per model name
pub struct TiktokenTokenizer {
    fallback: Arc<CoreBPE>,
    encodings: DashMap<String, Arc<CoreBPE>>,
}

impl TiktokenTokenizer {
    /// Create a tokenizer; unknown models use cl100k_base
    pub fn new() -> anyhow::Result<Self> {
        let fallback = cl100k_base()?;
        Ok(Self {
            fallback: Arc::new(fallback),
            encodings: DashMap::new(),
        })
    }

    fn encoding_for(&self, model: &str) -> Arc<CoreBPE> {
        if let Some(bpe) = self.encodings.get(model) {
            return bpe.clone();
        }

        let bpe = match get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(_) => {
                debug!("No tiktoken encoding for model {}, using cl100k_base", model);
                self.fallback.clone()
            }
        };
        self.encodings.insert(model.to_string(), bpe.clone());
        bpe
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.encoding_for(model).encode_with_special_tokens(text).len()
    }
}

/// Word-based tokenizer (fallback, ~1.3 tokens per word)
pub struct WordTokenizer {
    tokens_per_word: f64,
}

impl WordTokenizer {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str, _model: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}
