//! Tag derivation for documents uploaded without explicit tags.

use super::sections::heading_regex;
use std::collections::BTreeSet;

/// Upper bound on derived tags per document
pub const MAX_TAGS: usize = 10;

/// Derive tags from heading words longer than 3 chars.
///
/// Falls back to `fallback_keywords` found anywhere in the text when the
/// headings yield nothing. At most [`MAX_TAGS`] tags, first seen wins.
pub fn extract_tags(markdown: &str, fallback_keywords: &[String]) -> BTreeSet<String> {
    let heading = heading_regex();
    let mut ordered: Vec<String> = Vec::new();

    for line in markdown.lines() {
        let Some(caps) = heading.captures(line) else {
            continue;
        };
        for word in caps[2].to_lowercase().split_whitespace() {
            if word.chars().count() > 3 && !ordered.iter().any(|w| w == word) {
                ordered.push(word.to_string());
            }
        }
    }

    if ordered.is_empty() {
        let lower = markdown.to_lowercase();
        for keyword in fallback_keywords {
            let keyword = keyword.to_lowercase();
            if !keyword.is_empty() && lower.contains(&keyword) && !ordered.contains(&keyword) {
                ordered.push(keyword);
            }
        }
    }

    ordered.into_iter().take(MAX_TAGS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_from_headings() {
        let doc = "# Creating an Operation\ntext\n## Closing the Sale\nmore\n#### Ignored Deep Heading";
        let tags = extract_tags(doc, &[]);
        let expected: BTreeSet<String> = ["creating", "operation", "closing", "sale"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_tags_capped() {
        let doc = "# alpha bravo charlie delta echoes foxtrot golfing hotel india juliet kilos limas";
        assert_eq!(extract_tags(doc, &[]).len(), MAX_TAGS);
    }

    #[test]
    fn test_fallback_keywords() {
        let keywords = vec!["Dashboard".to_string(), "invoice".to_string(), "calendar".to_string()];
        let tags = extract_tags("Open the dashboard to see each INVOICE.", &keywords);
        let expected: BTreeSet<String> = ["dashboard", "invoice"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn test_no_headings_no_keywords() {
        assert!(extract_tags("plain text", &[]).is_empty());
    }
}
