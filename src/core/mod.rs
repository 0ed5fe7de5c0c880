//! Core tokenization engine for mergetok.
//!
//! # Architecture
//!
//! - [`Pretokenizer`]: splits text on special-token literals (Aho-Corasick,
//!   leftmost-longest) and a general regex (fancy-regex) into pretokens
//! - [`bpe`]: rank-ordered byte-pair merging of a single pretoken
//! - [`Tokenizer`]: encode/decode facade with an LRU chunk cache and Rayon
//!   batch methods
//! - [`vocab`]: the id ↔ bytes [`Vocabulary`] and the GPT-2 file loader
//! - [`byte_level`]: the GPT-2 byte ↔ printable-unicode alphabet used by the
//!   loader
//!
//! Merges never cross pretoken boundaries, and every operation is
//! deterministic: the cache and the parallel paths never change output.

pub mod bpe;
pub mod byte_level;
mod pretokenize;
mod tokenizer;
pub mod vocab;

pub use bpe::{byte_pair_encode, byte_pair_merge, byte_pair_split, MergeRanks, Rank};
pub use byte_level::{byte_level_decode, byte_level_encode};
pub use pretokenize::{Pretoken, Pretokenizer, Pretokens};
pub use tokenizer::{Tokenizer, TokenizerError, DEFAULT_CACHE_SIZE, GPT2_PATTERN};
pub use vocab::{
    byte_vocabulary, load_gpt2_merges, load_gpt2_merges_file, load_gpt2_vocab,
    load_gpt2_vocab_file, MergeRule, VocabError, Vocabulary,
};
