//! Character-window and section-aware text splitting.

use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 40;
pub const DEFAULT_PARENT_SIZE: usize = 2000;
const CHILD_OVERLAP: usize = 20;

lazy_static! {
    // "\n12A. Section title\n"
    static ref SECTION_TITLE: Regex = Regex::new(r"\n\d+[A-Z]?\. {1,3}[^\n]{0,60}\n").unwrap();
}

/// Split into windows of roughly `chunk_size` characters that end on a
/// space. Each window starts at the last space at least `overlap`
/// characters before the previous window's end. Empty chunks are dropped.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut chunks = Vec::new();
    let mut index = 0;

    while index < n {
        let start = index
            .checked_sub(overlap)
            .and_then(|left| (0..=left).rev().find(|&i| chars[i] == ' '))
            .unwrap_or(0);
        let end = (index + chunk_size..n).find(|&i| chars[i] == ' ').unwrap_or(n);

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        index = end + 1;
    }
    chunks
}

/// Split at numbered section titles such as `"\n3B. Payment terms\n"`.
/// Each section after the first starts with its title line.
pub fn split_by_titles(text: &str) -> Vec<String> {
    let titles: Vec<regex::Match> = SECTION_TITLE.find_iter(text).collect();
    let mut sections = Vec::with_capacity(titles.len() + 1);

    let preamble_end = titles.first().map_or(text.len(), |m| m.start());
    sections.push(text[..preamble_end].to_string());

    for (i, title) in titles.iter().enumerate() {
        let body_end = titles.get(i + 1).map_or(text.len(), |next| next.start());
        sections.push(format!("{}\n{}", title.as_str().trim(), text[title.end()..body_end].trim()));
    }

    sections.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Parent windows per section, each split into smaller child windows.
pub fn parent_child_chunks(
    text: &str,
    parent_size: usize,
    child_size: usize,
    overlap: usize,
) -> Vec<(String, Vec<String>)> {
    split_by_titles(text)
        .iter()
        .flat_map(|section| chunk_text(section, parent_size, overlap))
        .map(|parent| {
            let children = chunk_text(&parent, child_size, CHILD_OVERLAP);
            (parent, children)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("  hello world  ", 500, 40), vec!["hello world"]);
        assert!(chunk_text("", 500, 40).is_empty());
        assert!(chunk_text("    ", 2, 0).is_empty());
    }

    #[test]
    fn test_chunks_end_on_spaces_and_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text(text, 10, 5);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(text.contains(chunk.as_str()));
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        // consecutive windows share at least one word
        let first_last = chunks[0].split(' ').last().unwrap();
        assert!(chunks[1].contains(first_last));
        assert!(chunks.last().unwrap().ends_with("theta"));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "naïve café résumé ".repeat(20);
        let chunks = chunk_text(&text, 30, 5);
        assert!(chunks.iter().all(|c| c.chars().count() >= 1));
    }

    #[test]
    fn test_split_by_titles() {
        let text = "Preamble text\n1. Definitions\nTerms are defined.\n2A. Payment\nPay monthly.";
        let sections = split_by_titles(text);
        assert_eq!(
            sections,
            vec![
                "Preamble text".to_string(),
                "1. Definitions\nTerms are defined.".to_string(),
                "2A. Payment\nPay monthly.".to_string(),
            ]
        );
        assert_eq!(split_by_titles("no titles here"), vec!["no titles here"]);
    }

    #[test]
    fn test_parent_child_chunks() {
        let text = "word ".repeat(200);
        let pairs = parent_child_chunks(&text, 400, 100, 40);
        assert!(pairs.len() >= 2);
        for (parent, children) in &pairs {
            assert!(!children.is_empty());
            assert!(children.iter().all(|c| parent.contains(c.as_str())));
        }
    }
}
