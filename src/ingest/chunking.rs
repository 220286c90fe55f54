//! Token-budget text splitting for uploaded documents.
//!
//! Parsers hand the ingest pipeline document-sized units (paragraphs, pages,
//! slides, row batches) that can still exceed what the embedding model accepts
//! comfortably. This module turns each unit into chunks that fit a token
//! budget:
//!
//! - The budget comes from `TEXT_SPLITTER_CHUNK_SIZE` when set; otherwise it is
//!   a quarter of the embedding model's context window (an eighth with
//!   `TEXT_SPLITTER_USE_SAFE_DEFAULTS=1`), clamped to [256, 1024] tokens.
//! - Boundaries are semantic (`semchunk-rs`), landing on sentence and paragraph
//!   breaks where the text allows.
//! - `TEXT_SPLITTER_CHUNK_OVERLAP` carries the tail of each chunk into the next
//!   so passages that straddle a boundary stay retrievable.
//! - Tokens are counted with `tiktoken-rs` when the model has a known encoding,
//!   else by whitespace words (typical for Ollama-served models).

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

/// Errors produced while splitting document text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The configured token budget cannot produce any chunk.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model the tokenizer was requested for.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

const AUTO_CHUNK_MIN: usize = 256;
const AUTO_CHUNK_MAX: usize = 1024;

/// Resolve the chunk budget for an upload.
///
/// An explicit override wins and is floored at one token. Otherwise the budget
/// is a share of the model's context window (a quarter, or an eighth when safe
/// defaults are on) clamped into [256, 1024] so unusual models cannot produce
/// degenerate chunks.
pub(crate) fn resolve_chunk_budget(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
    use_safe_defaults: bool,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = context_window(provider, model);
    let share = if use_safe_defaults { 8 } else { 4 };
    (window / share).clamp(AUTO_CHUNK_MIN, AUTO_CHUNK_MAX)
}

fn context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => {
            if model.starts_with("text-embedding-3")
                || model.starts_with("text-embedding-ada-002")
            {
                8192
            } else {
                get_context_size(model)
            }
        }
        EmbeddingProvider::Ollama => {
            let name = model.to_lowercase();
            if name == "nomic-embed-text" || name.starts_with("mxbai-embed-large") {
                8192
            } else if name.contains("all-minilm") {
                512
            } else if name.contains("e5-large") {
                4096
            } else {
                tracing::trace!(model, "Unknown Ollama model; assuming a 4096-token window");
                4096
            }
        }
        // The hashing embedder reads whole strings; give it a middling window.
        EmbeddingProvider::Hashing => 4096,
    }
}

/// Counts tokens the way the embedding model will see them.
#[derive(Clone)]
pub(crate) struct TokenCounter(Arc<dyn Fn(&str) -> usize + Send + Sync>);

impl TokenCounter {
    /// Pick a counter for the provider and model pair.
    ///
    /// OpenAI models must resolve to a real encoding. Ollama frequently serves
    /// models under local aliases `tiktoken` has never heard of, so those fall
    /// back to word counting with a warning. The offline hashing embedder has
    /// no tokenizer at all.
    fn for_model(provider: EmbeddingProvider, model: &str) -> Result<Self, ChunkingError> {
        match provider {
            EmbeddingProvider::OpenAI => Self::bpe(model),
            EmbeddingProvider::Ollama => Self::bpe(model).or_else(|error| {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; counting whitespace words"
                );
                Ok(Self::words())
            }),
            EmbeddingProvider::Hashing => Ok(Self::words()),
        }
    }

    fn bpe(model: &str) -> Result<Self, ChunkingError> {
        let wanted = match model.trim() {
            "" => "cl100k_base",
            trimmed => trimmed,
        };
        let encoding = load_encoding(wanted).map_err(|source| ChunkingError::Tokenizer {
            model: wanted.to_string(),
            source,
        })?;
        let encoding = Arc::new(encoding);
        Ok(TokenCounter(Arc::new(move |segment: &str| {
            encoding.encode_ordinary(segment).len()
        })))
    }

    /// Whitespace-word counter used when no encoding is available. Non-empty
    /// text always counts as at least one token.
    fn words() -> Self {
        TokenCounter(Arc::new(|segment: &str| {
            let words = segment.split_whitespace().count();
            if words == 0 && !segment.is_empty() {
                1
            } else {
                words
            }
        }))
    }

    fn count(&self, text: &str) -> usize {
        (self.0)(text)
    }
}

/// Resolve a model name to a BPE encoding, accepting either a model id that
/// `tiktoken` recognizes or a raw encoding name such as `cl100k_base`.
fn load_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Ok(encoding);
    }
    match model {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        other => {
            tracing::warn!(model = other, "No tokenizer for model; counting with 'cl100k_base'");
            cl100k_base()
        }
    }
}

/// Token-budgeted splitter shared by every document in an upload.
///
/// Building one resolves the tokenizer once; `split` then runs over each
/// parsed document without repeating that work.
pub(crate) struct TextSplitter {
    budget: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl TextSplitter {
    pub(crate) fn new(
        budget: usize,
        overlap: usize,
        provider: EmbeddingProvider,
        model: &str,
    ) -> Result<Self, ChunkingError> {
        if budget == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            budget,
            // An overlap the size of the budget would forward whole chunks.
            overlap: overlap.min(budget.saturating_sub(1)),
            counter: TokenCounter::for_model(provider, model)?,
        })
    }

    /// Split `text` into chunks of at most `budget` tokens, applying the
    /// configured overlap between neighbours. Blank input yields no chunks.
    pub(crate) fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let counter = self.counter.clone();
        let chunker = Chunker::new(
            self.budget,
            Box::new(move |segment: &str| counter.count(segment)),
        );
        let chunks = chunker.chunk(text);
        if self.overlap == 0 {
            return chunks;
        }
        self.stitch_overlap(chunks)
    }

    /// Prepend the tail of each chunk to its successor, then clamp the merged
    /// text back under the budget so overlap never grows a chunk past it.
    fn stitch_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(chunks.len());
        for (index, current) in chunks.iter().enumerate() {
            if index == 0 {
                out.push(current.clone());
                continue;
            }
            let tail = self.carry_tail(&chunks[index - 1]);
            if tail.is_empty() {
                out.push(current.clone());
                continue;
            }
            let mut merged = String::with_capacity(tail.len() + current.len() + 1);
            merged.push_str(tail);
            merged.push(' ');
            merged.push_str(current.trim_start());
            out.push(self.clamp(merged));
        }
        out
    }

    /// Longest word-aligned suffix of `text` that fits the overlap allowance.
    fn carry_tail<'a>(&self, text: &'a str) -> &'a str {
        let mut tail = "";
        for &start in word_starts(text).iter().rev() {
            let candidate = text[start..].trim_end();
            if self.counter.count(candidate) > self.overlap {
                break;
            }
            tail = candidate;
        }
        tail
    }

    /// Drop leading words until the text fits the budget again.
    fn clamp(&self, text: String) -> String {
        if self.counter.count(&text) <= self.budget {
            return text;
        }
        for &start in word_starts(&text).iter().skip(1) {
            let candidate = text[start..].trim_end();
            if self.counter.count(candidate) <= self.budget {
                return candidate.to_string();
            }
        }
        String::new()
    }
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(offset);
            in_word = true;
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_splitter(budget: usize, overlap: usize) -> TextSplitter {
        TextSplitter {
            budget,
            overlap: overlap.min(budget.saturating_sub(1)),
            counter: TokenCounter::words(),
        }
    }

    #[test]
    fn split_respects_the_word_budget() {
        let splitter = word_splitter(2, 0);
        let chunks = splitter.split("alpha beta gamma delta epsilon");
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
    }

    #[test]
    fn split_returns_nothing_for_blank_input() {
        let splitter = word_splitter(4, 0);
        assert!(splitter.split("   \n\t").is_empty());
    }

    #[test]
    fn overlap_carries_the_previous_tail_forward() {
        let splitter = word_splitter(3, 1);
        let chunks = splitter.split("alpha beta gamma delta epsilon");
        assert_eq!(chunks, vec!["alpha beta gamma", "gamma delta epsilon"]);
        for chunk in &chunks {
            assert!(splitter.counter.count(chunk) <= 3);
        }
    }

    #[test]
    fn overlap_never_grows_a_chunk_past_the_budget() {
        let splitter = word_splitter(3, 2);
        let chunks = splitter.split("alpha beta gamma delta epsilon");
        assert_eq!(chunks, vec!["alpha beta gamma", "gamma delta epsilon"]);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let error = TextSplitter::new(0, 0, EmbeddingProvider::Hashing, "fnv").unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn bpe_counting_bounds_chunks_for_known_models() {
        let splitter = TextSplitter::new(5, 0, EmbeddingProvider::OpenAI, "text-embedding-3-small")
            .expect("known model resolves a tokenizer");
        let text = "Paperquery answers questions about the files its users upload.";
        let chunks = splitter.split(text);
        for chunk in &chunks {
            assert!(splitter.counter.count(chunk) <= 5);
        }
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.split_whitespace())
            .collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn budget_prefers_the_explicit_override() {
        let budget = resolve_chunk_budget(
            Some(48),
            EmbeddingProvider::OpenAI,
            "text-embedding-3-small",
            false,
        );
        assert_eq!(budget, 48);
    }

    #[test]
    fn budget_derives_from_the_model_window() {
        let openai = resolve_chunk_budget(
            None,
            EmbeddingProvider::OpenAI,
            "text-embedding-3-small",
            false,
        );
        assert_eq!(openai, 1024);

        let small = resolve_chunk_budget(None, EmbeddingProvider::Ollama, "all-minilm-l6-v2", false);
        assert_eq!(small, 256);

        let nomic = resolve_chunk_budget(None, EmbeddingProvider::Ollama, "nomic-embed-text", false);
        assert_eq!(nomic, 1024);
    }

    #[test]
    fn safe_defaults_halve_the_derived_budget() {
        let base = resolve_chunk_budget(None, EmbeddingProvider::Hashing, "fnv", false);
        let safe = resolve_chunk_budget(None, EmbeddingProvider::Hashing, "fnv", true);
        assert_eq!(base, 1024);
        assert_eq!(safe, 512);
    }
}
