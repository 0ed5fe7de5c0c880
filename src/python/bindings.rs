//! Python bindings for the mergetok tokenizer.
//!
//! # Example
//!
//! ```python
//! from mergetok import Tokenizer
//!
//! tokenizer = Tokenizer.from_files("vocab.json", "merges.txt", ["<|endoftext|>"])
//! ids = tokenizer.encode("Hello, world!<|endoftext|>")
//! text = tokenizer.decode(ids)
//!
//! with open("corpus.txt") as f:
//!     ids = tokenizer.encode_iterable(f)
//! ```

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::{MergeRule, Tokenizer, TokenizerError, VocabError, Vocabulary};

fn to_py_err(err: TokenizerError) -> PyErr {
    match err {
        TokenizerError::Vocab(VocabError::Io(e)) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn special_refs(special_tokens: &Option<Vec<String>>) -> Vec<&str> {
    special_tokens
        .iter()
        .flatten()
        .map(String::as_str)
        .collect()
}

/// Python wrapper for the Rust Tokenizer.
#[pyclass(name = "Tokenizer")]
pub struct PyTokenizer {
    inner: Tokenizer,
}

#[pymethods]
impl PyTokenizer {
    /// Create a tokenizer from an in-memory vocabulary and merge list.
    ///
    /// Args:
    ///     vocab: dict mapping token id to token bytes
    ///     merges: list of (left bytes, right bytes), highest priority first
    ///     special_tokens: Optional list of special token strings
    #[new]
    #[pyo3(signature = (vocab, merges, special_tokens=None))]
    fn new(
        vocab: HashMap<u32, Vec<u8>>,
        merges: Vec<MergeRule>,
        special_tokens: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let special = special_refs(&special_tokens);
        let inner =
            Tokenizer::new(Vocabulary::new(vocab), &merges, &special).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Create a tokenizer from GPT-2 style vocab.json and merges.txt files.
    ///
    /// Raises:
    ///     IOError: If a file cannot be read
    ///     ValueError: If a file cannot be parsed
    #[staticmethod]
    #[pyo3(signature = (vocab_path, merges_path, special_tokens=None))]
    fn from_files(
        vocab_path: PathBuf,
        merges_path: PathBuf,
        special_tokens: Option<Vec<String>>,
    ) -> PyResult<Self> {
        let special = special_refs(&special_tokens);
        let inner = Tokenizer::from_files(vocab_path, merges_path, &special).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Encode text to a list of token ids.
    fn encode(&self, text: &str) -> PyResult<Vec<u32>> {
        self.inner.encode(text).map_err(to_py_err)
    }

    /// Encode every string of an iterable and concatenate the ids.
    fn encode_iterable(&self, texts: &Bound<'_, PyAny>) -> PyResult<Vec<u32>> {
        let mut ids = Vec::new();
        for text in texts.try_iter()? {
            let text: String = text?.extract()?;
            ids.extend(self.inner.encode(&text).map_err(to_py_err)?);
        }
        Ok(ids)
    }

    /// Encode a list of strings in parallel and concatenate the ids.
    fn encode_batch(&self, texts: Vec<String>) -> PyResult<Vec<u32>> {
        self.inner.encode_batch(&texts).map_err(to_py_err)
    }

    /// Decode token ids to a string, replacing invalid UTF-8.
    ///
    /// Raises:
    ///     ValueError: If an id is not in the vocabulary
    fn decode(&self, ids: Vec<u32>) -> PyResult<String> {
        self.inner.decode(&ids).map_err(to_py_err)
    }

    /// Vocabulary size, including special tokens.
    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn __repr__(&self) -> String {
        format!(
            "Tokenizer(vocab_size={}, merges={}, special_tokens={})",
            self.inner.vocab_size(),
            self.inner.merge_count(),
            self.inner.special_tokens().len()
        )
    }
}
