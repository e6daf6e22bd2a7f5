//! Keyword extraction shared by the evidence gate and the context assembler.

use std::collections::HashSet;
use std::sync::LazyLock;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "were",
        "been", "have", "has", "had", "not", "but", "all", "any", "can", "could", "should",
        "would", "will", "when", "then", "than", "them", "they", "their", "there", "here",
        "what", "which", "while", "where", "who", "whom", "why", "how", "you", "your",
        "our", "its", "it's", "use", "used", "using", "always", "never", "every", "each",
        "some", "such", "very", "just", "also", "only", "more", "most", "make", "made",
        "about", "after", "before", "over", "under", "between", "does", "doing", "did",
        "don't", "doesn't", "instead", "ensure", "avoid", "prefer",
    ]
    .into_iter()
    .collect()
});

/// Extracts meaningful keywords: lowercased, stopwords dropped, length ≥ 3.
///
/// Order follows first appearance; duplicates are removed.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_' && c != '\'') {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if word.len() < 3 || STOPWORDS.contains(word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_stopwords_and_short_words() {
        let keywords = extract_keywords("Always use the db pool for every query");
        assert_eq!(keywords, vec!["pool", "query"]);
    }

    #[test]
    fn test_deduplicates_preserving_order() {
        let keywords = extract_keywords("retry the retry logic with backoff retry");
        assert_eq!(keywords, vec!["retry", "logic", "backoff"]);
    }

    #[test]
    fn test_all_stopwords_yields_empty() {
        assert!(extract_keywords("always use the and for with").is_empty());
    }

    #[test]
    fn test_keeps_hyphenated_terms() {
        let keywords = extract_keywords("prefer table-driven tests");
        assert_eq!(keywords, vec!["table-driven", "tests"]);
    }
}
