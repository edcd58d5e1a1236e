//! Java strategy: same symbol-boundary walk as `treesitter_generic` (§4.1), split out because
//! the routing table names `java` explicitly rather than folding it into the generic bucket.

use super::treesitter_generic::chunk_by_symbols;
use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;

pub struct JavaChunker;

impl ChunkerStrategy for JavaChunker {
    fn name(&self) -> &'static str {
        "java"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        chunk_by_symbols(text, source_id, ext, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_method_boundaries() {
        let text = "class Foo {\n    void a() {\n        System.out.println(\"a\");\n    }\n\n    void b() {\n        System.out.println(\"b\");\n    }\n}\n";
        let chunks = JavaChunker.chunk(text, "Foo.java", "java", &ChunkingConfig::default()).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn garbage_input_is_an_error_not_a_panic() {
        let result = JavaChunker.chunk("{{{ not java at all ]]]", "F.java", "java", &ChunkingConfig::default());
        assert!(result.is_err() || result.unwrap().is_empty());
    }
}
