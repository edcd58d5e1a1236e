//! Brace-counting fallback: groups lines into blocks at `{`/`}` nesting depth 0→1 transitions,
//! then hands each block to the token-window cutter. Used for brace languages with no tree-sitter
//! grammar wired up, and as the second link in every strategy's fallback chain.

use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;
use crate::tokenizer::{estimate_tokens, window_lines_by_tokens};

pub struct BraceFallbackChunker;

impl ChunkerStrategy for BraceFallbackChunker {
    fn name(&self) -> &'static str {
        "brace_fallback"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let lines: Vec<&str> = text.lines().collect();
        let mut blocks: Vec<(usize, usize)> = Vec::new();
        let mut depth = 0i32;
        let mut block_start = 0usize;

        for (i, line) in lines.iter().enumerate() {
            let opens_before = depth;
            for ch in line.chars() {
                match ch {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            // A block ends on the line where depth returns to 0 having been above it.
            if opens_before > 0 && depth <= 0 {
                blocks.push((block_start, i + 1));
                block_start = i + 1;
            } else if opens_before == 0 && depth == 0 {
                // Top-level line with no braces opened/closed: keep extending the current block.
            }
        }
        if block_start < lines.len() {
            blocks.push((block_start, lines.len()));
        }
        if blocks.is_empty() {
            blocks.push((0, lines.len()));
        }

        let mut chunks = Vec::new();
        for (start, end) in blocks {
            let block_text = lines[start..end].join("\n");
            if block_text.trim().is_empty() {
                continue;
            }
            if estimate_tokens(&block_text) <= config.hard_cap_tokens {
                chunks.push(Chunk::new(source_id, ext, chunks.len(), block_text, None));
            } else {
                let window_tokens = config.chunk_tokens.min(config.hard_cap_tokens);
                for (_s, _e, window) in window_lines_by_tokens(&block_text, window_tokens, config.overlap_tokens) {
                    chunks.push(Chunk::new(source_id, ext, chunks.len(), window, None));
                }
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_top_level_brace_blocks() {
        let text = "int a() {\n  return 1;\n}\nint b() {\n  return 2;\n}\n";
        let chunks = BraceFallbackChunker.chunk(text, "f.c", "c", &ChunkingConfig::default()).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn oversized_block_is_windowed_under_hard_cap() {
        let mut body = String::from("int big() {\n");
        for i in 0..2000 {
            body.push_str(&format!("  x{i} = {i};\n"));
        }
        body.push_str("}\n");
        let config = ChunkingConfig { hard_cap_tokens: 64, chunk_tokens: 32, overlap_tokens: 4, ..ChunkingConfig::default() };
        let chunks = BraceFallbackChunker.chunk(&body, "f.c", "c", &config).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= config.hard_cap_tokens);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = BraceFallbackChunker.chunk("", "f.c", "c", &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }
}
