//! Vocabulary table and GPT-2 format loading.
//!
//! A [`Vocabulary`] is the id ↔ byte-sequence table the tokenizer emits ids
//! from. It is built once and only grows while special tokens are reserved
//! during tokenizer construction.
//!
//! # GPT-2 Format
//!
//! The loader reads the two files published with GPT-2 style tokenizers:
//!
//! - `vocab.json`: a JSON object mapping token strings to ids
//! - `merges.txt`: one merge rule per line, two tokens separated by a space
//!
//! ```text
//! #version: 0.2
//! Ġ t
//! Ġ a
//! h e
//! ```
//!
//! Tokens in both files are written in the byte-level alphabet (see
//! [`super::byte_level`]) and are converted back to raw bytes here.

use rustc_hash::FxHashMap;
use std::path::Path;
use thiserror::Error;

use super::byte_level::byte_level_decode;

/// A merge rule: the left and right byte sequences that merge into one.
pub type MergeRule = (Vec<u8>, Vec<u8>);

/// Errors that can occur when loading vocabulary files.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid format: {0}")]
    ParseError(String),
    #[error("Character {0:?} is not in the byte-level alphabet")]
    UnknownCharacter(char),
}

/// Bijective id ↔ byte-sequence table.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    encoder: FxHashMap<Vec<u8>, u32>,
    decoder: FxHashMap<u32, Vec<u8>>,
}

impl Vocabulary {
    /// Build a vocabulary from `(id, bytes)` entries.
    ///
    /// If the same byte sequence appears under several ids, every id stays
    /// decodable but encoding resolves to the lowest one.
    pub fn new(entries: impl IntoIterator<Item = (u32, Vec<u8>)>) -> Self {
        let decoder: FxHashMap<u32, Vec<u8>> = entries.into_iter().collect();
        let mut encoder = FxHashMap::with_capacity_and_hasher(decoder.len(), Default::default());

        for (&id, bytes) in &decoder {
            match encoder.get_mut(bytes) {
                Some(existing) => {
                    log::warn!(
                        "byte sequence {:?} is mapped by ids {} and {}; encoding uses the lowest",
                        bytes,
                        *existing,
                        id
                    );
                    if id < *existing {
                        *existing = id;
                    }
                }
                None => {
                    encoder.insert(bytes.clone(), id);
                }
            }
        }

        Self { encoder, decoder }
    }

    /// Number of entries (ids) in the vocabulary.
    pub fn len(&self) -> usize {
        self.decoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoder.is_empty()
    }

    /// Id of a byte sequence.
    #[inline]
    pub fn token_to_id(&self, bytes: &[u8]) -> Option<u32> {
        self.encoder.get(bytes).copied()
    }

    /// Byte sequence of an id.
    #[inline]
    pub fn id_to_token(&self, id: u32) -> Option<&[u8]> {
        self.decoder.get(&id).map(Vec::as_slice)
    }

    /// Id that the next inserted entry receives: one past the highest id.
    pub fn next_id(&self) -> Option<u32> {
        match self.decoder.keys().max() {
            Some(&max) => max.checked_add(1),
            None => Some(0),
        }
    }

    /// Return the id of `bytes`, inserting it under a fresh id if absent.
    ///
    /// Returns `None` only when the id space is exhausted.
    pub(crate) fn reserve(&mut self, bytes: &[u8]) -> Option<u32> {
        if let Some(id) = self.token_to_id(bytes) {
            return Some(id);
        }
        let id = self.next_id()?;
        self.encoder.insert(bytes.to_vec(), id);
        self.decoder.insert(id, bytes.to_vec());
        Some(id)
    }

    /// Iterate over `(id, bytes)` entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.decoder.iter().map(|(&id, bytes)| (id, bytes.as_slice()))
    }
}

impl FromIterator<(u32, Vec<u8>)> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = (u32, Vec<u8>)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

fn decode_token(token: &str) -> Result<Vec<u8>, VocabError> {
    byte_level_decode(token).map_err(VocabError::UnknownCharacter)
}

/// Parse a GPT-2 `vocab.json` document.
pub fn load_gpt2_vocab(json: &str) -> Result<Vocabulary, VocabError> {
    let raw: FxHashMap<String, u32> = serde_json::from_str(json)?;

    let entries = raw
        .iter()
        .map(|(token, &id)| Ok((id, decode_token(token)?)))
        .collect::<Result<Vec<_>, VocabError>>()?;

    Ok(Vocabulary::new(entries))
}

/// Parse a GPT-2 `merges.txt` document.
///
/// Each right-trimmed line that splits on a single space into exactly two
/// fields is a rule; blank and malformed lines are skipped, as is the
/// `#version` header.
pub fn load_gpt2_merges(text: &str) -> Result<Vec<MergeRule>, VocabError> {
    let mut merges = Vec::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("#version") {
            continue;
        }

        let mut fields = line.split(' ');
        let (Some(left), Some(right), None) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        if left.is_empty() || right.is_empty() {
            continue;
        }

        merges.push((decode_token(left)?, decode_token(right)?));
    }

    Ok(merges)
}

/// Load a GPT-2 `vocab.json` file.
pub fn load_gpt2_vocab_file(path: impl AsRef<Path>) -> Result<Vocabulary, VocabError> {
    let data = std::fs::read_to_string(path)?;
    load_gpt2_vocab(&data)
}

/// Load a GPT-2 `merges.txt` file.
pub fn load_gpt2_merges_file(path: impl AsRef<Path>) -> Result<Vec<MergeRule>, VocabError> {
    let data = std::fs::read_to_string(path)?;
    load_gpt2_merges(&data)
}

/// Vocabulary covering every single byte, with byte `b` at id `b`.
pub fn byte_vocabulary() -> Vocabulary {
    (0u8..=255).map(|b| (b as u32, vec![b])).collect()
}
