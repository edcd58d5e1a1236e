//! Markdown strategy: splits on heading boundaries (`#`..`######`) rather than symbol spans,
//! then windows any section larger than `hard_cap_tokens` like every other strategy.

use super::{Chunk, ChunkerStrategy};
use crate::config::ChunkingConfig;
use crate::tokenizer::{estimate_tokens, window_lines_by_tokens};

fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match line.as_bytes().get(hashes) {
        Some(b' ') | None => Some(hashes),
        _ => None,
    }
}

fn heading_title(line: &str, level: usize) -> String {
    line[level..].trim().to_string()
}

pub struct MarkdownChunker;

impl ChunkerStrategy for MarkdownChunker {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn chunk(&self, text: &str, source_id: &str, ext: &str, config: &ChunkingConfig) -> anyhow::Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let lines: Vec<&str> = text.lines().collect();
        let mut sections: Vec<(Option<String>, usize, usize)> = Vec::new();
        let mut section_start = 0usize;
        let mut section_title: Option<String> = None;

        for (i, line) in lines.iter().enumerate() {
            if let Some(level) = heading_level(line) {
                if i > section_start || section_title.is_some() {
                    sections.push((section_title.clone(), section_start, i));
                }
                section_start = i;
                section_title = Some(heading_title(line, level));
            }
        }
        sections.push((section_title, section_start, lines.len()));

        let mut chunks = Vec::new();
        for (title, start, end) in sections {
            if start >= end {
                continue;
            }
            let section_text = lines[start..end].join("\n");
            if section_text.trim().is_empty() {
                continue;
            }
            if estimate_tokens(&section_text) <= config.hard_cap_tokens {
                chunks.push(Chunk::new(source_id, ext, chunks.len(), section_text, title));
            } else {
                let window_tokens = config.chunk_tokens.min(config.hard_cap_tokens);
                for (_s, _e, window) in window_lines_by_tokens(&section_text, window_tokens, config.overlap_tokens) {
                    chunks.push(Chunk::new(source_id, ext, chunks.len(), window, title.clone()));
                }
            }
        }
        Ok(chunks)
    }
}
