//! Markdown-aware text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting prefers markdown heading boundaries,
//! falls back to paragraph boundaries (`\n\n`) inside oversized sections,
//! and hard-splits paragraphs that still exceed the limit. Small adjacent
//! sections are merged into one chunk, and hard-split pieces can carry a
//! configurable overlap into the next piece.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text for
//! staleness detection on re-embedding.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio used for size budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks, respecting max_tokens and carrying
/// overlap_tokens between hard-split pieces.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut chunk_index: i64 = 0;

    for section in split_sections(text) {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        // A section that fits is treated as one block and merged with
        // its neighbors while the combined size stays under max.
        if section.len() <= max_chars {
            let would_be = if current_buf.is_empty() {
                section.len()
            } else {
                current_buf.len() + 2 + section.len()
            };
            if would_be > max_chars && !current_buf.is_empty() {
                chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                chunk_index += 1;
                current_buf.clear();
            }
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(section);
            continue;
        }

        // Oversized section: fall back to paragraph boundaries within it.
        for para in section.split("\n\n") {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }

            // If adding this paragraph would exceed max, flush current buffer
            let would_be = if current_buf.is_empty() {
                trimmed.len()
            } else {
                current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
            };

            if would_be > max_chars && !current_buf.is_empty() {
                chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                chunk_index += 1;
                current_buf.clear();
            }

            // If a single paragraph exceeds max, split it by lines/words
            if trimmed.len() > max_chars {
                if !current_buf.is_empty() {
                    chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                    chunk_index += 1;
                    current_buf.clear();
                }

                // Hard split at max_chars boundaries, carrying overlap
                // from each piece into the next one
                let mut remaining = trimmed;
                let mut carry = String::new();
                while !remaining.is_empty() {
                    let budget = max_chars.saturating_sub(carry.len()).max(1);
                    let mut split_at = remaining.len().min(budget);
                    while split_at < remaining.len() && !remaining.is_char_boundary(split_at) {
                        split_at -= 1;
                    }
                    // Try to split at a newline or space boundary
                    let mut actual_split = if split_at < remaining.len() {
                        remaining[..split_at]
                            .rfind('\n')
                            .or_else(|| remaining[..split_at].rfind(' '))
                            .map(|pos| pos + 1)
                            .unwrap_or(split_at)
                    } else {
                        split_at
                    };
                    if actual_split == 0 {
                        actual_split = remaining
                            .char_indices()
                            .nth(1)
                            .map(|(i, _)| i)
                            .unwrap_or(remaining.len());
                    }

                    let piece = remaining[..actual_split].trim();
                    remaining = &remaining[actual_split..];
                    if piece.is_empty() {
                        continue;
                    }

                    let piece_text = if carry.is_empty() {
                        piece.to_string()
                    } else {
                        format!("{} {}", carry, piece)
                    };
                    chunks.push(make_chunk(document_id, chunk_index, &piece_text));
                    chunk_index += 1;

                    if overlap_chars > 0 && !remaining.trim().is_empty() {
                        carry = overlap_tail(&piece_text, overlap_chars);
                    } else {
                        carry.clear();
                    }
                }
            } else {
                if !current_buf.is_empty() {
                    current_buf.push_str("\n\n");
                }
                current_buf.push_str(trimmed);
            }
        }
    }

    // Flush remaining
    if !current_buf.is_empty() {
        chunks.push(make_chunk(document_id, chunk_index, &current_buf));
    }

    // Guarantee at least one chunk
    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Split markdown text into heading-delimited sections. Each section
/// keeps its heading line; text before the first heading forms its own
/// section. Hash lines inside fenced code blocks do not start sections.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && is_heading(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    sections
}

fn is_heading(line: &str) -> bool {
    let stripped = line.trim_start_matches('#');
    let level = line.len() - stripped.len();
    (1..=6).contains(&level) && stripped.starts_with(' ')
}

/// Word-aligned tail of `text`, at most `overlap_chars` long.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || text.len() <= overlap_chars {
        return text.trim().to_string();
    }
    let mut start = text.len() - overlap_chars;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim().to_string(),
        None => tail.trim().to_string(),
    }
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("doc1", text, 5, 0);
        assert!(chunks.len() > 1);
        // Indices must be contiguous starting at 0
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_small_sections_merge_into_one_chunk() {
        let text = "# Title\n\nIntro paragraph.\n\n## Section A\n\nAlpha body.\n\n## Section B\n\nBeta body.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("## Section B"));
    }

    #[test]
    fn test_chunk_boundary_falls_on_heading() {
        // max_tokens=10 => max_chars=40; each section fits alone but not combined
        let text = "## Alpha\n\nFirst body text here.\n\n## Beta\n\nSecond body text.";
        let chunks = chunk_text("doc1", text, 10, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("## Alpha"));
        assert!(chunks[1].text.starts_with("## Beta"));
    }

    #[test]
    fn test_fenced_hash_line_does_not_split() {
        let text = "## A\n\n```\n# xxxxxxxxxx\n```\n\n## B\n\nshort body here.";
        let chunks = chunk_text("doc1", text, 10, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("# xxxxxxxxxx"));
        assert!(chunks[1].text.starts_with("## B"));
    }

    #[test]
    fn test_hard_split_carries_overlap() {
        let text = (0..40)
            .map(|i| format!("w{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 10, 2);
        assert!(chunks.len() > 1);
        // The second chunk starts with words repeated from the first.
        let first_word = chunks[1].text.split(' ').next().unwrap();
        assert!(chunks[0].text.contains(first_word));
    }

    #[test]
    fn test_hard_split_survives_multibyte_text() {
        let text = "Grüße und Überlegungen zur Änderung der Geschäftsordnung ".repeat(20);
        let chunks = chunk_text("doc1", &text, 8, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 0);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 5, 0);
        let c2 = chunk_text("doc1", text, 5, 0);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
