mod bindings;

use crate::core::GPT2_PATTERN;
pub use bindings::PyTokenizer;

use pyo3::prelude::*;

/// mergetok - byte-level BPE tokenizer with Python bindings
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenizer>()?;
    m.add("GPT2_PATTERN", GPT2_PATTERN)?;
    Ok(())
}
