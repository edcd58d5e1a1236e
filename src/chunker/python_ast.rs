//! Python strategy: same symbol-boundary walk as `treesitter_generic` (§4.1), split out because
//! the routing table names `python_ast` explicitly for `.py`/`.pyi`.

use super::treesitter_generic::chunk_by_symbols;
use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;

pub struct PythonAstChunker;

impl ChunkerStrategy for PythonAstChunker {
    fn name(&self) -> &'static str {
        "python_ast"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        chunk_by_symbols(text, source_id, ext, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_function_boundaries() {
        let text = "import os\n\ndef one():\n    return 1\n\ndef two():\n    return 2\n";
        let chunks = PythonAstChunker.chunk(text, "f.py", "py", &ChunkingConfig::default()).unwrap();
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref() == Some("one")));
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref() == Some("two")));
    }

    #[test]
    fn preamble_before_first_def_is_its_own_chunk() {
        let text = "import os\nimport sys\n\ndef one():\n    return 1\n";
        let chunks = PythonAstChunker.chunk(text, "f.py", "py", &ChunkingConfig::default()).unwrap();
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.is_none() && c.text.contains("import os")));
    }
}
