//! Chunker router (§4.1): selects a chunking strategy per file extension, with a guaranteed
//! fallback chain so a file is never skipped.

pub mod brace_fallback;
pub mod java;
pub mod markdown;
pub mod python_ast;
pub mod text;
pub mod treesitter_generic;

use crate::config::ChunkingConfig;
use crate::hashing::content_hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub path: String,
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(source_id: &str, ext: &str, ord: usize, text: String, symbol_path: Option<String>) -> Self {
        let id = match &symbol_path {
            Some(sym) => format!("{source_id}:{sym}:{ord}"),
            None => format!("{source_id}:{ord}"),
        };
        let hash = content_hash(&text);
        Chunk { id, text, content_hash: hash, metadata: ChunkMetadata { path: source_id.to_string(), ext: ext.to_string(), symbol_path } }
    }
}

/// One chunking strategy. `chunk` may fail (e.g. parser error); the router falls back per
/// §4.1's chain when it does.
pub trait ChunkerStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>>;
}

pub struct ChunkerRegistry {
    strategies: HashMap<&'static str, Box<dyn ChunkerStrategy>>,
    /// Extension → strategy name, a closed set declared by the implementation (§4.1).
    routing_table: HashMap<&'static str, &'static str>,
}

fn default_routing_table() -> HashMap<&'static str, &'static str> {
    let mut table = HashMap::new();
    table.insert("py", "python_ast");
    table.insert("pyi", "python_ast");
    table.insert("java", "java");
    table.insert("rs", "treesitter_generic");
    table.insert("ts", "treesitter_generic");
    table.insert("tsx", "treesitter_generic");
    table.insert("js", "treesitter_generic");
    table.insert("jsx", "treesitter_generic");
    table.insert("go", "treesitter_generic");
    table.insert("dart", "treesitter_generic");
    table.insert("cs", "treesitter_generic");
    table.insert("php", "treesitter_generic");
    table.insert("proto", "treesitter_generic");
    table.insert("md", "markdown");
    table.insert("markdown", "markdown");
    table.insert("txt", "text");
    table.insert("c", "brace_fallback");
    table.insert("h", "brace_fallback");
    table.insert("cpp", "brace_fallback");
    table.insert("hpp", "brace_fallback");
    table
}

impl ChunkerRegistry {
    pub fn with_builtins() -> Self {
        let mut strategies: HashMap<&'static str, Box<dyn ChunkerStrategy>> = HashMap::new();
        strategies.insert("python_ast", Box::new(python_ast::PythonAstChunker));
        strategies.insert("java", Box::new(java::JavaChunker));
        strategies.insert("treesitter_generic", Box::new(treesitter_generic::TreesitterGenericChunker));
        strategies.insert("markdown", Box::new(markdown::MarkdownChunker));
        strategies.insert("text", Box::new(text::TextChunker));
        strategies.insert("brace_fallback", Box::new(brace_fallback::BraceFallbackChunker));
        Self { strategies, routing_table: default_routing_table() }
    }

    fn strategy_for_ext(&self, ext: &str) -> &'static str {
        self.routing_table.get(ext).copied().unwrap_or("text")
    }

    /// `chunk(text, source_id, ext, config) -> ordered list of Chunk` (§4.1 contract). Strategy
    /// failure falls back to `brace_fallback` then `text`; a file is never skipped.
    pub fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> Vec<Chunk> {
        let primary = self.strategy_for_ext(ext);
        let chain = [primary, "brace_fallback", "text"];

        for (attempt, name) in chain.iter().enumerate() {
            if attempt > 0 && *name == primary {
                continue;
            }
            if let Some(strategy) = self.strategies.get(name) {
                match strategy.chunk(text, source_id, ext, config) {
                    Ok(chunks) if !chunks.is_empty() || text.is_empty() => return chunks,
                    Ok(_) => continue,
                    Err(err) => {
                        crate::debug_log!("chunker '{name}' failed for {source_id}: {err}; falling back");
                        continue;
                    }
                }
            }
        }

        // `text` is infallible by construction; this point is unreachable in practice but kept
        // as an explicit last resort so `chunk` never panics.
        text::TextChunker.chunk(text, source_id, ext, config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_routes_to_text() {
        let registry = ChunkerRegistry::with_builtins();
        assert_eq!(registry.strategy_for_ext("xyz"), "text");
    }

    #[test]
    fn known_extensions_route_to_declared_strategy() {
        let registry = ChunkerRegistry::with_builtins();
        assert_eq!(registry.strategy_for_ext("py"), "python_ast");
        assert_eq!(registry.strategy_for_ext("java"), "java");
        assert_eq!(registry.strategy_for_ext("md"), "markdown");
        assert_eq!(registry.strategy_for_ext("rs"), "treesitter_generic");
    }

    #[test]
    fn a_file_is_never_skipped_even_for_garbage_input() {
        let registry = ChunkerRegistry::with_builtins();
        let config = ChunkingConfig::default();
        let chunks = registry.chunk("not real python \x00\x01 garbage", "f.py", "py", &config);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn chunk_ids_are_unique_within_a_file() {
        let registry = ChunkerRegistry::with_builtins();
        let config = ChunkingConfig { chunk_tokens: 4, overlap_tokens: 1, ..ChunkingConfig::default() };
        let text = "one two three four five six seven eight nine ten";
        let chunks = registry.chunk(text, "f.txt", "txt", &config);
        let mut ids: Vec<_> = chunks.iter().map(|c| c.id.clone()).collect();
        let original_len = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), original_len);
    }
}
