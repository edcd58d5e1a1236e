//! Plain-text strategy: line-aligned, token-bounded sliding windows. Also the terminal fallback
//! every other strategy routes to on failure, so it must never fail and never skip input.

use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;
use crate::tokenizer::window_lines_by_tokens;

pub struct TextChunker;

impl ChunkerStrategy for TextChunker {
    fn name(&self) -> &'static str {
        "text"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let window_tokens = config.chunk_tokens.min(config.hard_cap_tokens);
        let windows = window_lines_by_tokens(text, window_tokens, config.overlap_tokens);
        let chunks = windows
            .into_iter()
            .enumerate()
            .map(|(ord, (_start_line, _end_line, window_text))| Chunk::new(source_id, ext, ord, window_text, None))
            .collect();
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = TextChunker.chunk("   \n  \n", "f.txt", "txt", &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn nonempty_input_yields_at_least_one_chunk() {
        let config = ChunkingConfig { chunk_tokens: 4, overlap_tokens: 1, ..ChunkingConfig::default() };
        let chunks = TextChunker.chunk("alpha beta gamma delta epsilon zeta eta theta", "f.txt", "txt", &config).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn chunk_tokens_never_exceed_hard_cap() {
        let config = ChunkingConfig { chunk_tokens: 4, overlap_tokens: 1, hard_cap_tokens: 8, ..ChunkingConfig::default() };
        let text = (0..50).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = TextChunker.chunk(&text, "f.txt", "txt", &config).unwrap();
        for c in chunks {
            assert!(crate::tokenizer::estimate_tokens(&c.text) <= config.hard_cap_tokens);
        }
    }

    #[test]
    fn hard_cap_wins_even_when_chunk_tokens_is_configured_larger() {
        let config = ChunkingConfig { chunk_tokens: 64, overlap_tokens: 1, hard_cap_tokens: 8, ..ChunkingConfig::default() };
        let text = (0..50).map(|i| format!("word{i}")).collect::<Vec<_>>().join("\n");
        let chunks = TextChunker.chunk(&text, "f.txt", "txt", &config).unwrap();
        for c in chunks {
            assert!(crate::tokenizer::estimate_tokens(&c.text) <= config.hard_cap_tokens);
        }
    }
}
