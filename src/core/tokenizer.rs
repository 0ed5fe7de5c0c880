use lru::LruCache;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

use super::bpe::{byte_pair_encode, MergeRanks};
use super::pretokenize::{Pretoken, Pretokenizer, Pretokens};
use super::vocab::{
    load_gpt2_merges_file, load_gpt2_vocab_file, MergeRule, VocabError, Vocabulary,
};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Merge result {0:?} is not in the vocabulary; merge table and vocabulary disagree")]
    UnknownToken(Vec<u8>),
    #[error("Unknown token id: {0}")]
    UnknownId(u32),
    #[error("Regex error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasick(#[from] aho_corasick::BuildError),
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
}

/// GPT-2 pretokenization pattern.
///
/// Contractions, optionally space-prefixed letter runs, digit runs and
/// punctuation runs, then whitespace. `\s+(?!\S)` leaves the last space of
/// a run to prefix the following word.
pub const GPT2_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Default cache size for encoded chunks
pub const DEFAULT_CACHE_SIZE: usize = 4096;

/// Byte-level BPE tokenizer driven by a ranked merge table.
///
/// Encoding splits text into pretokens (special-token literals and matches
/// of the pretokenization pattern), merges the bytes of each pretoken in
/// merge-rank order and concatenates the resulting ids. Decoding
/// concatenates the bytes of each id and decodes them as lossy UTF-8.
///
/// The tokenizer is immutable after construction and can be shared between
/// threads; batch methods use Rayon.
///
/// # Example
///
/// ```
/// use mergetok::{byte_vocabulary, Tokenizer};
///
/// let tokenizer = Tokenizer::new(byte_vocabulary(), &[], &["<|endoftext|>"]).unwrap();
/// let ids = tokenizer.encode("hi<|endoftext|>").unwrap();
/// assert_eq!(ids, vec![104, 105, 256]);
/// assert_eq!(tokenizer.decode(&ids).unwrap(), "hi<|endoftext|>");
/// ```
pub struct Tokenizer {
    vocab: Vocabulary,
    ranks: MergeRanks,
    pretokenizer: Pretokenizer,
    special_tokens: FxHashMap<String, u32>,
    /// Ids of the pretokenizer's special tokens, by pattern index.
    special_ids: Vec<u32>,
    chunk_cache: Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>>,
    cache_size: usize,
}

impl Tokenizer {
    /// Create a tokenizer with the GPT-2 pattern and the default cache size.
    ///
    /// # Arguments
    /// * `vocab` - Id ↔ byte-sequence table
    /// * `merges` - Merge rules, highest priority first
    /// * `special_tokens` - Literals that always encode to a single id
    pub fn new(
        vocab: Vocabulary,
        merges: &[MergeRule],
        special_tokens: &[&str],
    ) -> Result<Self, TokenizerError> {
        Self::with_options(
            vocab,
            merges,
            special_tokens,
            GPT2_PATTERN,
            DEFAULT_CACHE_SIZE,
        )
    }

    /// Create a tokenizer with full configuration options.
    ///
    /// Special tokens missing from `vocab` are added under fresh ids above the
    /// current highest id, in the order given; existing ids never change.
    ///
    /// # Arguments
    /// * `vocab` - Id ↔ byte-sequence table
    /// * `merges` - Merge rules, highest priority first
    /// * `special_tokens` - Literals that always encode to a single id
    /// * `pattern` - Pretokenization regex applied between special tokens
    /// * `cache_size` - Entries in the LRU cache of merged chunks; 0 disables it
    pub fn with_options(
        mut vocab: Vocabulary,
        merges: &[MergeRule],
        special_tokens: &[&str],
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let mut special_strings: Vec<String> = Vec::with_capacity(special_tokens.len());
        let mut special_map = FxHashMap::default();
        let mut special_ids = Vec::with_capacity(special_tokens.len());

        for &token in special_tokens {
            if token.is_empty() {
                return Err(TokenizerError::Configuration(
                    "special tokens must not be empty".to_string(),
                ));
            }
            if special_map.contains_key(token) {
                continue;
            }

            let id = vocab.reserve(token.as_bytes()).ok_or_else(|| {
                TokenizerError::Configuration(format!("no token id left for {:?}", token))
            })?;
            special_map.insert(token.to_string(), id);
            special_strings.push(token.to_string());
            special_ids.push(id);
        }

        let ranks = MergeRanks::new(merges);
        let pretokenizer = Pretokenizer::new(pattern, &special_strings)?;

        let chunk_cache = NonZeroUsize::new(cache_size).map(|n| Mutex::new(LruCache::new(n)));

        log::debug!(
            "tokenizer ready: {} vocabulary entries, {} merge rules, {} special tokens",
            vocab.len(),
            ranks.len(),
            special_ids.len()
        );

        Ok(Self {
            vocab,
            ranks,
            pretokenizer,
            special_tokens: special_map,
            special_ids,
            chunk_cache,
            cache_size,
        })
    }

    /// Create a tokenizer from GPT-2 style `vocab.json` and `merges.txt` files.
    pub fn from_files(
        vocab_path: impl AsRef<Path>,
        merges_path: impl AsRef<Path>,
        special_tokens: &[&str],
    ) -> Result<Self, TokenizerError> {
        let (vocab_path, merges_path) = (vocab_path.as_ref(), merges_path.as_ref());
        log::info!(
            "loading vocabulary from {} and merges from {}",
            vocab_path.display(),
            merges_path.display()
        );

        let vocab = load_gpt2_vocab_file(vocab_path)?;
        let merges = load_gpt2_merges_file(merges_path)?;
        Self::new(vocab, &merges, special_tokens)
    }

    /// Split text into pretokens without merging them.
    pub fn pretokenize<'r, 't>(&'r self, text: &'t str) -> Pretokens<'r, 't> {
        self.pretokenizer.split(text)
    }

    /// Append the ids of one pretoken to `out`.
    fn encode_pretoken(
        &self,
        pretoken: Pretoken<'_>,
        out: &mut Vec<u32>,
    ) -> Result<(), TokenizerError> {
        match pretoken {
            Pretoken::Special(index) => {
                out.push(self.special_ids[index]);
                Ok(())
            }
            Pretoken::Piece(piece) => self.encode_piece(piece.as_bytes(), out),
        }
    }

    /// Merge one piece with LRU caching.
    fn encode_piece(&self, piece: &[u8], out: &mut Vec<u32>) -> Result<(), TokenizerError> {
        if let Some(cache) = &self.chunk_cache {
            if let Ok(mut cache) = cache.lock() {
                if let Some(cached) = cache.get(piece) {
                    out.extend_from_slice(cached);
                    return Ok(());
                }
            }
        }

        let ids = byte_pair_encode(piece, &self.ranks, &self.vocab)
            .map_err(TokenizerError::UnknownToken)?;
        out.extend_from_slice(&ids);

        if let Some(cache) = &self.chunk_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(piece.to_vec(), ids);
            }
        }

        Ok(())
    }

    /// Encode text to token IDs.
    ///
    /// Special-token literals in `text` become their single id; everything
    /// else is merged pretoken by pretoken.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut ids = Vec::new();
        for pretoken in self.pretokenize(text) {
            self.encode_pretoken(pretoken?, &mut ids)?;
        }
        Ok(ids)
    }

    /// Encode one large text, merging its pretokens in parallel.
    ///
    /// Same output as [`encode`](Self::encode); only worthwhile for very
    /// large inputs.
    pub fn encode_rayon(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let pretokens = self.pretokenize(text).collect::<Result<Vec<_>, _>>()?;

        let results = pretokens
            .par_iter()
            .map(|&pretoken| -> Result<Vec<u32>, TokenizerError> {
                let mut ids = Vec::new();
                self.encode_pretoken(pretoken, &mut ids)?;
                Ok(ids)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(concat(results))
    }

    /// Encode several texts in parallel and concatenate the ids in input order.
    ///
    /// No separator is inserted between texts; include a special token in the
    /// texts if boundaries matter.
    pub fn encode_batch<S: AsRef<str> + Sync>(
        &self,
        texts: &[S],
    ) -> Result<Vec<u32>, TokenizerError> {
        let results = texts
            .par_iter()
            .map(|text| self.encode(text.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(concat(results))
    }

    /// Sequentially encode texts from an iterator and concatenate the ids.
    pub fn encode_iter<I>(&self, texts: I) -> Result<Vec<u32>, TokenizerError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut ids = Vec::new();
        for text in texts {
            ids.extend(self.encode(text.as_ref())?);
        }
        Ok(ids)
    }

    /// Decode token IDs back to bytes.
    pub fn decode_bytes(&self, tokens: &[u32]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);

        for &token in tokens {
            let bytes = self
                .vocab
                .id_to_token(token)
                .ok_or(TokenizerError::UnknownId(token))?;
            result.extend_from_slice(bytes);
        }

        Ok(result)
    }

    /// Decode token IDs to a string, replacing invalid UTF-8 with U+FFFD.
    pub fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<u32>]) -> Result<Vec<String>, TokenizerError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Number of vocabulary entries, including special tokens.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Number of distinct merge rules.
    pub fn merge_count(&self) -> usize {
        self.ranks.len()
    }

    /// Get the special tokens map.
    pub fn special_tokens(&self) -> &FxHashMap<String, u32> {
        &self.special_tokens
    }

    pub fn special_token_id(&self, token: &str) -> Option<u32> {
        self.special_tokens.get(token).copied()
    }

    pub fn token_to_id(&self, bytes: &[u8]) -> Option<u32> {
        self.vocab.token_to_id(bytes)
    }

    pub fn id_to_token(&self, id: u32) -> Option<&[u8]> {
        self.vocab.id_to_token(id)
    }

    /// The pretokenization pattern.
    pub fn pattern(&self) -> &str {
        self.pretokenizer.pattern()
    }

    /// Clear the encoding cache.
    pub fn clear_cache(&self) {
        if let Some(Ok(mut cache)) = self.chunk_cache.as_ref().map(Mutex::lock) {
            cache.clear();
        }
    }

    /// Get the current cache size.
    pub fn cache_len(&self) -> usize {
        self.chunk_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }
}

fn concat(parts: Vec<Vec<u32>>) -> Vec<u32> {
    let mut ids = Vec::with_capacity(parts.iter().map(Vec::len).sum());
    for part in parts {
        ids.extend(part);
    }
    ids
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        // Caches are not shared
        let chunk_cache =
            NonZeroUsize::new(self.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Self {
            vocab: self.vocab.clone(),
            ranks: self.ranks.clone(),
            pretokenizer: self.pretokenizer.clone(),
            special_tokens: self.special_tokens.clone(),
            special_ids: self.special_ids.clone(),
            chunk_cache,
            cache_size: self.cache_size,
        }
    }
}
