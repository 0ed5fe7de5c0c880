//! mergetok - byte-level BPE tokenizer driven by a ranked merge table.
//!
//! Text is split into pretokens (special-token literals plus matches of a
//! pretokenization regex), the bytes of each pretoken are merged in merge-rule
//! order, and the resulting byte sequences are mapped to vocabulary ids.
//! Decoding concatenates token bytes and decodes them as lossy UTF-8.
//!
//! ```
//! use mergetok::{byte_vocabulary, Tokenizer};
//!
//! let mut vocab: Vec<(u32, Vec<u8>)> = byte_vocabulary()
//!     .iter()
//!     .map(|(id, bytes)| (id, bytes.to_vec()))
//!     .collect();
//! vocab.push((256, b"hi".to_vec()));
//!
//! let merges = vec![(b"h".to_vec(), b"i".to_vec())];
//! let tokenizer = Tokenizer::new(vocab.into_iter().collect(), &merges, &[]).unwrap();
//! assert_eq!(tokenizer.encode("hi!").unwrap(), vec![256, 33]);
//! ```
//!
//! With the `python` feature the crate builds as a Python extension module.

pub mod core;
#[cfg(feature = "python")]
mod python;

pub use self::core::{
    byte_vocabulary, MergeRule, Pretoken, Tokenizer, TokenizerError, VocabError, Vocabulary,
    DEFAULT_CACHE_SIZE, GPT2_PATTERN,
};
