//! Tree-sitter-backed strategy shared by every language with a grammar wired up but no
//! language-specific chunker of its own (rs/ts/tsx/js/jsx/go/dart/cs/php/proto, §4.1's
//! `treesitter_generic`), plus the symbol-boundary walk that backs `java` and `python_ast` too.
//!
//! Boundaries come from [`crate::inspector::extract_symbols_from_source`], the same tree-sitter
//! driver machinery the skeleton renderer uses. A file with no extractable symbols (unsupported
//! grammar, parse failure, minified/generated source) returns `Err` so the router's fallback
//! chain takes over.

use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;
use crate::tokenizer::{estimate_tokens, window_lines_by_tokens};
use anyhow::anyhow;
use std::path::PathBuf;

/// Walks top-level (non-nested) symbol spans and emits one chunk per symbol, plus a preamble
/// chunk for anything before the first symbol and a trailing chunk for anything after the last.
/// Oversized spans are windowed under `hard_cap_tokens` like every other strategy.
pub(super) fn chunk_by_symbols(text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let fake_path = PathBuf::from(format!("chunk.{ext}"));
    let mut symbols = crate::inspector::extract_symbols_from_source(&fake_path, text);
    symbols.sort_by_key(|s| s.line);
    if symbols.is_empty() {
        return Err(anyhow!("no symbols extracted for .{ext}"));
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    // Hierarchical mode (§4.1 chunking config): a symbol span big enough to need splitting gets
    // broken into `micro_chunk_tokens`-sized micro chunks (finer retrieval granularity); when
    // `emit_parent_chunks` is also set, the full span is additionally kept as one "parent" chunk
    // so a hit on a micro chunk can be expanded back to its full symbol body.
    let push_span = |chunks: &mut Vec<Chunk>, start: usize, end: usize, symbol_path: Option<String>| {
        if start >= end || start >= lines.len() {
            return;
        }
        let end = end.min(lines.len());
        let span_text = lines[start..end].join("\n");
        if span_text.trim().is_empty() {
            return;
        }
        let span_tokens = estimate_tokens(&span_text);
        if config.hierarchical && span_tokens > config.micro_chunk_tokens {
            if config.emit_parent_chunks && span_tokens <= config.hard_cap_tokens {
                let parent_path = symbol_path.as_ref().map(|s| format!("{s}#parent")).or_else(|| Some("#parent".to_string()));
                chunks.push(Chunk::new(source_id, ext, chunks.len(), span_text.clone(), parent_path));
            }
            let micro_window = config.micro_chunk_tokens.min(config.hard_cap_tokens);
            for (idx, (_s, _e, window)) in window_lines_by_tokens(&span_text, micro_window, config.overlap_tokens).into_iter().enumerate() {
                let micro_path = symbol_path.as_ref().map(|s| format!("{s}#micro{idx}")).or_else(|| Some(format!("#micro{idx}")));
                chunks.push(Chunk::new(source_id, ext, chunks.len(), window, micro_path));
            }
        } else if span_tokens <= config.hard_cap_tokens {
            chunks.push(Chunk::new(source_id, ext, chunks.len(), span_text, symbol_path));
        } else {
            let window_tokens = config.chunk_tokens.min(config.hard_cap_tokens);
            for (_s, _e, window) in window_lines_by_tokens(&span_text, window_tokens, config.overlap_tokens) {
                chunks.push(Chunk::new(source_id, ext, chunks.len(), window, symbol_path.clone()));
            }
        }
    };

    for sym in &symbols {
        let start = (sym.line as usize).max(cursor);
        let end = (sym.line_end as usize + 1).max(start + 1);
        if start >= cursor && config.include_source_preamble && cursor == 0 && start > 0 {
            push_span(&mut chunks, 0, start, None);
        }
        if start < cursor {
            // Nested inside an already-emitted span; skip rather than double-count.
            continue;
        }
        push_span(&mut chunks, start, end, Some(sym.name.clone()));
        cursor = end;
    }

    if cursor < lines.len() {
        push_span(&mut chunks, cursor, lines.len(), None);
    }

    if chunks.is_empty() {
        return Err(anyhow!("symbol walk produced no chunks for .{ext}"));
    }
    Ok(chunks)
}

pub struct TreesitterGenericChunker;

impl ChunkerStrategy for TreesitterGenericChunker {
    fn name(&self) -> &'static str {
        "treesitter_generic"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        chunk_by_symbols(text, source_id, ext, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_source_chunks_by_function_boundary() {
        let text = "use std::fmt;\n\nfn one() {\n    println!(\"a\");\n}\n\nfn two() {\n    println!(\"b\");\n}\n";
        let chunks = TreesitterGenericChunker.chunk(text, "f.rs", "rs", &ChunkingConfig::default()).unwrap();
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref() == Some("one")));
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref() == Some("two")));
    }

    #[test]
    fn unsupported_extension_falls_back_to_error() {
        let err = TreesitterGenericChunker.chunk("whatever", "f.zz", "zz", &ChunkingConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn hierarchical_mode_emits_parent_and_micro_chunks() {
        let mut text = String::from("fn big() {\n");
        for i in 0..200 {
            text.push_str(&format!("    let x{i} = {i};\n"));
        }
        text.push_str("}\n");
        let config = ChunkingConfig {
            hard_cap_tokens: 4000,
            chunk_tokens: 2000,
            overlap_tokens: 4,
            hierarchical: true,
            micro_chunk_tokens: 50,
            emit_parent_chunks: true,
            ..ChunkingConfig::default()
        };
        let chunks = TreesitterGenericChunker.chunk(&text, "f.rs", "rs", &config).unwrap();
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref() == Some("big#parent")));
        assert!(chunks.iter().any(|c| c.metadata.symbol_path.as_deref().is_some_and(|s| s.starts_with("big#micro"))));
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= config.hard_cap_tokens);
        }
    }

    #[test]
    fn chunks_never_exceed_hard_cap() {
        let mut text = String::from("fn big() {\n");
        for i in 0..3000 {
            text.push_str(&format!("    let x{i} = {i};\n"));
        }
        text.push_str("}\n");
        let config = ChunkingConfig { hard_cap_tokens: 64, chunk_tokens: 32, overlap_tokens: 4, ..ChunkingConfig::default() };
        let chunks = TreesitterGenericChunker.chunk(&text, "f.rs", "rs", &config).unwrap();
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= config.hard_cap_tokens);
        }
    }
}
