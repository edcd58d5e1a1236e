//! The one tokenizer shared by chunk cutting, BM25 indexing, and context-compiler budget
//! accounting (§9: "tests must pin the tokenizer identity in snapshots").
//!
//! This is a whitespace + punctuation heuristic tokenizer, not a trained BPE model — the spec
//! permits either, provided the *same* implementation is used everywhere. A heuristic tokenizer
//! keeps the crate free of a multi-megabyte vocabulary file and keeps token counts close enough
//! to a real BPE's for budget accounting to be useful.

/// Splits text into word-ish tokens: runs of alphanumerics/underscore are one token each;
/// everything else (whitespace, punctuation) is a separator and produces no token.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Approximate token count for budget accounting. Defined as `tokenize(text).len()` so that
/// chunk cutting, BM25, and the compiler all agree on "how many tokens is this text" exactly,
/// not just approximately.
pub fn estimate_tokens(text: &str) -> usize {
    tokenize(text).len()
}

/// Cuts `text` into line-aligned windows of at most `window_tokens` tokens, with successive
/// windows overlapping by at most `overlap_tokens` tokens. Used by the `text` strategy directly
/// and as the final fallback inside AST-aware strategies when a region is larger than
/// `hard_cap_tokens`.
pub fn window_lines_by_tokens(text: &str, window_tokens: usize, overlap_tokens: usize) -> Vec<(usize, usize, String)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let window_tokens = window_tokens.max(1);
    let overlap_tokens = overlap_tokens.min(window_tokens.saturating_sub(1));

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let mut end = start;
        let mut tokens_so_far = 0usize;
        while end < lines.len() {
            let line_tokens = estimate_tokens(lines[end]).max(1);
            if tokens_so_far > 0 && tokens_so_far + line_tokens > window_tokens {
                break;
            }
            tokens_so_far += line_tokens;
            end += 1;
        }
        let end = end.max(start + 1).min(lines.len());
        let slice = lines[start..end].join("\n");
        windows.push((start, end, slice));

        if end >= lines.len() {
            break;
        }

        // Step back by the overlap, measured in lines approximated from overlap_tokens.
        let mut back = 0usize;
        let mut back_tokens = 0usize;
        let mut i = end;
        while i > start && back_tokens < overlap_tokens {
            i -= 1;
            back_tokens += estimate_tokens(lines[i]).max(1);
            back += 1;
        }
        start = end.saturating_sub(back).max(start + 1);
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        let toks = tokenize("fn main() { foo_bar(1, 2) }");
        assert_eq!(toks, vec!["fn", "main", "foo_bar", "1", "2"]);
    }

    #[test]
    fn estimate_tokens_matches_tokenize_len() {
        let text = "alpha beta gamma";
        assert_eq!(estimate_tokens(text), tokenize(text).len());
    }

    #[test]
    fn window_lines_respects_hard_window_and_overlap() {
        let text = (0..20).map(|i| format!("line{i} has five tokens here")).collect::<Vec<_>>().join("\n");
        let windows = window_lines_by_tokens(&text, 20, 5);
        assert!(windows.len() > 1);
        for (start, end, slice) in &windows {
            assert!(end > start);
            assert!(estimate_tokens(slice) <= 20 + 5); // one line of slack at the boundary
        }
    }

    #[test]
    fn window_lines_makes_progress_on_degenerate_input() {
        let text = "a\nb\nc\nd";
        let windows = window_lines_by_tokens(text, 1, 0);
        assert_eq!(windows.last().unwrap().1, 4);
    }
}
