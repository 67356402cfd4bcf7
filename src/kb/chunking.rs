//! Text normalization and recursive chunking.
//!
//! Deterministic: identical input always produces identical chunks, which
//! is what makes re-ingestion idempotent at the content level.

/// A chunk of text with its position in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub ordinal: i32,
    pub content: String,
}

/// Splitter configuration. Defaults match the ingestion pipeline: chunks of
/// at most 512 characters with 64 characters of overlap.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 64,
        }
    }
}

// Separators ordered by preference, semantic boundaries first
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split text into overlapping chunks using recursive splitting at the
    /// highest-level boundary that keeps pieces within the size limit.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Vec::new();
        }

        if text.chars().count() <= self.chunk_size {
            return vec![TextChunk {
                ordinal: 0,
                content: text,
            }];
        }

        let splits = self.recursive_split(&text, SEPARATORS);

        // Merge small splits back together and carry overlap between
        // consecutive chunks.
        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut current = String::new();

        for split in splits {
            let candidate = if current.is_empty() {
                split.clone()
            } else {
                format!("{} {}", current, split)
            };

            if candidate.chars().count() <= self.chunk_size {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                let carried = self.overlap_tail(&current);
                chunks.push(TextChunk {
                    ordinal: chunks.len() as i32,
                    content: std::mem::take(&mut current),
                });
                current = match carried {
                    Some(tail) => format!("{} {}", tail, split),
                    None => split,
                };
            } else {
                // A single split exceeding the limit; hard-cut it.
                let (head, tail) = split_at_chars(&split, self.chunk_size);
                chunks.push(TextChunk {
                    ordinal: chunks.len() as i32,
                    content: head,
                });
                current = tail;
            }
        }

        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(TextChunk {
                ordinal: chunks.len() as i32,
                content: trimmed.to_string(),
            });
        }

        chunks
    }

    fn overlap_tail(&self, chunk: &str) -> Option<String> {
        if self.chunk_overlap == 0 {
            return None;
        }
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= self.chunk_overlap {
            return None;
        }
        Some(chars[chars.len() - self.chunk_overlap..].iter().collect())
    }

    fn recursive_split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let Some((sep, remaining)) = separators.split_first() else {
            return vec![text.to_string()];
        };

        if sep.is_empty() {
            // Character-level fallback
            let chars: Vec<char> = text.chars().collect();
            return chars
                .chunks(self.chunk_size)
                .map(|c| c.iter().collect())
                .collect();
        }

        let mut result = Vec::new();
        for part in text.split(sep) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if part.chars().count() <= self.chunk_size {
                result.push(part.to_string());
            } else {
                result.extend(self.recursive_split(part, remaining));
            }
        }
        result
    }
}

/// Collapse runs of spaces and tabs to a single space per line, trim each
/// line, cap blank runs at one empty line, strip control characters, and
/// trim the whole text.
pub fn normalize_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut collapsed = String::with_capacity(line.len());
        let mut last_was_space = false;
        for ch in line.chars() {
            if ch.is_whitespace() {
                if !last_was_space {
                    collapsed.push(' ');
                    last_was_space = true;
                }
            } else if !ch.is_control() {
                collapsed.push(ch);
                last_was_space = false;
            }
        }
        lines.push(collapsed.trim().to_string());
    }

    let mut out = String::new();
    let mut blank_run = 0usize;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out.trim().to_string()
}

fn split_at_chars(text: &str, at: usize) -> (String, String) {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= at {
        return (text.to_string(), String::new());
    }
    (
        chars[..at].iter().collect(),
        chars[at..].iter().collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(Chunker::default().chunk_text("").is_empty());
        assert!(Chunker::default().chunk_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = Chunker::default().chunk_text("MiniRAG is a RAG platform.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].content, "MiniRAG is a RAG platform.");
    }

    #[test]
    fn test_normalization_collapses_whitespace() {
        let out = normalize_text("hello   \t world  \nnext\tline");
        assert_eq!(out, "hello world\nnext line");
    }

    #[test]
    fn test_normalization_caps_blank_lines() {
        let out = normalize_text("a\n\n\n\n\nb");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn test_long_text_respects_size_limit() {
        let paragraph = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let chunker = Chunker::default();
        let chunks = chunker.chunk_text(&paragraph);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.content.chars().count() <= 512 + 64 + 1,
                "chunk too large: {}",
                chunk.content.len()
            );
            assert!(!chunk.content.trim().is_empty());
        }
    }

    #[test]
    fn test_ordinals_are_sequential() {
        let text = "One sentence here. ".repeat(100);
        let chunks = Chunker::default().chunk_text(&text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i32);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Paragraph one.\n\nParagraph two is somewhat longer. ".repeat(30);
        let a = Chunker::default().chunk_text(&text);
        let b = Chunker::default().chunk_text(&text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "word ".repeat(400);
        let chunker = Chunker::new(100, 20);
        let chunks = chunker.chunk_text(&text);
        assert!(chunks.len() > 1);
        // The head of each following chunk repeats the last `overlap` chars
        // of the previous one.
        let prev_chars: Vec<char> = chunks[0].content.chars().collect();
        let tail: String = prev_chars[prev_chars.len() - 20..].iter().collect();
        assert!(chunks[1].content.starts_with(&tail));
    }

    #[test]
    fn test_unbreakable_run_is_hard_cut() {
        let text = "x".repeat(2000);
        let chunks = Chunker::new(512, 64).chunk_text(&text);
        assert!(chunks.len() >= 3);
        // Carried overlap may push a chunk slightly past the target size.
        assert!(chunks
            .iter()
            .all(|c| c.content.chars().count() <= 512 + 64 + 1));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let p1 = "a".repeat(300);
        let p2 = "b".repeat(300);
        let text = format!("{}\n\n{}", p1, p2);
        let chunks = Chunker::default().chunk_text(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with('a'));
        assert!(chunks[1].content.ends_with('b'));
    }
}
