use super::sections::extract_sections;
use crate::models::Chunk;

/// Split `text` into overlapping windows of at most `size` chars.
///
/// When a window ends inside the text, it is shortened to end just after the
/// last `.`, newline or space, provided that break lies in the second half of
/// the window. Each piece is trimmed.
///
/// # Returns
///
/// `(char_offset, piece)` pairs; offsets are relative to `text` and point at
/// the trimmed piece
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let size = size.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = start + size;
        if end < len {
            let floor = start + size / 2;
            if let Some(brk) = (floor + 1..=end)
                .rev()
                .find(|&i| matches!(chars[i], '.' | '\n' | ' '))
            {
                end = brk + 1;
            }
        } else {
            end = len;
        }

        let window = &chars[start..end];
        let leading = window.iter().take_while(|c| c.is_whitespace()).count();
        let piece: String = window.iter().collect::<String>().trim().to_string();
        if !piece.is_empty() {
            pieces.push((start + leading, piece));
        }

        if end >= len {
            break;
        }
        // Always advance, even if a short window meets a large overlap
        start = end.saturating_sub(overlap).max(start + 1);
    }

    pieces
}

/// Chunk a document section by section.
///
/// Chunk indices run across sections without gaps; `source_offset` is the
/// char offset of each chunk in `raw_text`.
pub fn chunk_sections(document_id: &str, raw_text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for section in extract_sections(raw_text) {
        for (offset, text) in split_text(&section.content, size, overlap) {
            chunks.push(Chunk {
                document_id: document_id.to_string(),
                chunk_index: chunks.len(),
                text,
                source_offset: section.offset + offset,
                section: section.title.clone(),
            });
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_piece() {
        assert_eq!(split_text("Short answer.", 100, 20), vec![(0, "Short answer.".to_string())]);
    }

    #[test]
    fn test_unbroken_text_windows() {
        let text = "x".repeat(250);
        let pieces = split_text(&text, 100, 20);
        let offsets: Vec<usize> = pieces.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 80, 160]);
        assert_eq!(pieces[0].1.len(), 100);
        assert_eq!(pieces[2].1.len(), 90);
    }

    #[test]
    fn test_breaks_at_word_boundary_in_second_half() {
        let text = format!("{} {}", "a".repeat(70), "b".repeat(60));
        let pieces = split_text(&text, 100, 10);
        // Break after the space at index 70
        assert_eq!(pieces[0].1, "a".repeat(70));
        assert_eq!(pieces[1].0, 61);
    }

    #[test]
    fn test_ignores_break_in_first_half() {
        let text = format!("{} {}", "a".repeat(10), "b".repeat(200));
        let pieces = split_text(&text, 100, 10);
        assert_eq!(pieces[0].1.chars().count(), 100);
    }

    #[test]
    fn test_large_overlap_still_progresses() {
        let text = "word ".repeat(40);
        let pieces = split_text(&text, 10, 9);
        assert!(!pieces.is_empty());
        assert!(pieces.len() <= text.len());
        assert!(pieces.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "ñandú ".repeat(50);
        let chars: Vec<char> = text.chars().collect();
        for (offset, piece) in split_text(&text, 40, 8) {
            let len = piece.chars().count();
            assert!(len <= 40);
            let original: String = chars[offset..offset + len].iter().collect();
            assert_eq!(original, piece);
        }
    }

    #[test]
    fn test_chunk_indices_are_global_and_offsets_absolute() {
        let doc = format!("# Billing\n{}\n# Calendar\nSync runs hourly.", "Invoices. ".repeat(30));
        let chunks = chunk_sections("kb", &doc, 100, 20);
        let chars: Vec<char> = doc.chars().collect();

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            let len = chunk.char_len();
            let original: String = chars[chunk.source_offset..chunk.source_offset + len].iter().collect();
            assert_eq!(original, chunk.text);
        }
        assert_eq!(chunks.first().unwrap().section.as_deref(), Some("Billing"));
        assert_eq!(chunks.last().unwrap().section.as_deref(), Some("Calendar"));
        assert_eq!(chunks.last().unwrap().text, "Sync runs hourly.");
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let doc = "# A\nsome text here. ".repeat(20);
        assert_eq!(chunk_sections("d", &doc, 50, 10), chunk_sections("d", &doc, 50, 10));
    }
}
