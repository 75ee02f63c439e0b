use regex::Regex;
use std::sync::OnceLock;

/// Title given to text that precedes the first heading
pub const INTRODUCTION: &str = "Introduction";

/// A run of document text under one heading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// `None` when the document has no headings at all
    pub title: Option<String>,
    /// Heading level 1-3 (0 for untitled text)
    pub level: usize,
    /// Trimmed body text
    pub content: String,
    /// Char offset of `content` in the raw document
    pub offset: usize,
}

pub(crate) fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"^(#{1,3})\s+(.+)$").expect("Invalid regex pattern"))
}

struct Pending {
    title: Option<String>,
    level: usize,
    /// Char offset of the first body line
    start: usize,
    /// Body lines with their terminators
    body: String,
}

impl Pending {
    fn finish(self, out: &mut Vec<Section>) {
        let leading = self.body.chars().take_while(|c| c.is_whitespace()).count();
        let content = self.body.trim();
        if !content.is_empty() {
            out.push(Section {
                title: self.title,
                level: self.level,
                content: content.to_string(),
                offset: self.start + leading,
            });
        }
    }
}

/// Split markdown into sections on `#`, `##` and `###` headings.
///
/// Text before the first heading becomes an [`INTRODUCTION`] section; a
/// document without headings is a single untitled section. Sections whose
/// body is blank are dropped.
pub fn extract_sections(markdown: &str) -> Vec<Section> {
    let heading = heading_regex();
    let mut sections = Vec::new();
    let mut current = Pending {
        title: None,
        level: 0,
        start: 0,
        body: String::new(),
    };
    let mut seen_heading = false;
    let mut offset = 0;

    for line in markdown.split_inclusive('\n') {
        let line_chars = line.chars().count();
        let bare = line.trim_end_matches(['\n', '\r']);

        if let Some(caps) = heading.captures(bare) {
            let previous = std::mem::replace(
                &mut current,
                Pending {
                    title: Some(caps[2].trim().to_string()),
                    level: caps[1].len(),
                    start: offset + line_chars,
                    body: String::new(),
                },
            );
            if !seen_heading {
                Pending {
                    title: Some(INTRODUCTION.to_string()),
                    level: 1,
                    ..previous
                }
                .finish(&mut sections);
            } else {
                previous.finish(&mut sections);
            }
            seen_heading = true;
        } else {
            current.body.push_str(line);
        }
        offset += line_chars;
    }

    current.finish(&mut sections);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_split_on_headings() {
        let doc = "Welcome to the help center.\n\n# Billing\nInvoices are monthly.\n\n## Refunds\nWithin 30 days.\n";
        let sections = extract_sections(doc);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title.as_deref(), Some(INTRODUCTION));
        assert_eq!(sections[0].content, "Welcome to the help center.");
        assert_eq!(sections[1].title.as_deref(), Some("Billing"));
        assert_eq!(sections[1].level, 1);
        assert_eq!(sections[2].title.as_deref(), Some("Refunds"));
        assert_eq!(sections[2].level, 2);
        assert_eq!(sections[2].content, "Within 30 days.");
    }

    #[test]
    fn test_offsets_point_into_raw_text() {
        let doc = "Intro line\n# Título\n\n  Cuerpo con acentos.\n### Deep\nlast";
        let chars: Vec<char> = doc.chars().collect();
        for section in extract_sections(doc) {
            let len = section.content.chars().count();
            let slice: String = chars[section.offset..section.offset + len].iter().collect();
            assert_eq!(slice, section.content);
        }
    }

    #[test]
    fn test_document_without_headings_is_untitled() {
        let sections = extract_sections("  just some text\nover two lines  ");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].title.is_none());
        assert_eq!(sections[0].offset, 2);
        assert_eq!(sections[0].content, "just some text\nover two lines");
    }

    #[test]
    fn test_empty_sections_dropped_and_deep_headings_are_text() {
        let doc = "# Empty\n\n# Full\n#### not a heading\nbody";
        let sections = extract_sections(doc);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title.as_deref(), Some("Full"));
        assert_eq!(sections[0].content, "#### not a heading\nbody");
    }

    #[test]
    fn test_crlf_headings() {
        let sections = extract_sections("# Setup\r\nInstall the app.\r\n");
        assert_eq!(sections[0].title.as_deref(), Some("Setup"));
        assert_eq!(sections[0].content, "Install the app.");
    }
}
