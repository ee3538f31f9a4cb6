//! The searchable, page-ordered text of one document.
//!
//! Searching is a linear scan with a literal, case-insensitive substring match.
//! Documents are tens to low hundreds of pages, so there is no inverted index.

use schemars::JsonSchema;

use crate::{errors::PipelineError, prelude::*};

/// The recognized text of one page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PageResult {
    /// 1-based page number.
    pub page: usize,

    /// The recognized text, lower-cased. Empty if nothing was recognized, or
    /// if the page failed and we kept going.
    pub text: String,
}

impl PageResult {
    /// Create a page result, lower-casing `text` so that searches never need
    /// to fold case again.
    pub fn new(page: usize, text: &str) -> Self {
        Self {
            page,
            text: text.to_lowercase(),
        }
    }
}

/// One matching page.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SearchResult {
    /// 1-based page number.
    pub page: usize,

    /// Display label, like `Page 3`.
    pub label: String,

    /// Context around the first match on the page, with newlines replaced by
    /// spaces, wrapped in `...`.
    pub snippet: String,

    /// The full lower-cased page text.
    pub full_text: String,
}

/// Lower-case and trim a query, the same way page text was normalized.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// The finished index: exactly one [`PageResult`] per page, in page order.
///
/// Immutable once built, so it can be shared between concurrent queries
/// without locking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentIndex {
    pages: Vec<PageResult>,
}

impl DocumentIndex {
    /// An index of a document with no pages.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from pages in any order.
    ///
    /// Fails unless the page numbers are exactly `1..=page_count`.
    pub fn from_pages(
        page_count: usize,
        mut pages: Vec<PageResult>,
    ) -> Result<Self, PipelineError> {
        pages.sort_by_key(|p| p.page);
        let complete = pages.len() == page_count
            && pages.iter().enumerate().all(|(i, p)| p.page == i + 1);
        if !complete {
            return Err(PipelineError::IncompleteIndex {
                expected: page_count,
                found: pages.len(),
            });
        }
        Ok(Self { pages })
    }

    /// All pages, in ascending page order.
    pub fn pages(&self) -> &[PageResult] {
        &self.pages
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Find every page containing `query`.
    ///
    /// Only the first occurrence on each page produces a snippet. Results come
    /// back in page order. An empty (or all-whitespace) query matches nothing.
    #[instrument(level = "debug", skip(self))]
    pub fn search(&self, query: &str, context_chars: usize) -> Vec<SearchResult> {
        let query = normalize_query(query);
        if query.is_empty() {
            return vec![];
        }

        let results = self
            .pages
            .iter()
            .filter_map(|page| {
                let start = page.text.find(&query)?;
                let snippet = snippet(&page.text, start, start + query.len(), context_chars);
                Some(SearchResult {
                    page: page.page,
                    label: format!("Page {}", page.page),
                    snippet: format!("...{snippet}..."),
                    full_text: page.text.clone(),
                })
            })
            .collect::<Vec<_>>();
        debug!(matches = results.len(), "Searched index");
        results
    }
}

/// Extract up to `context_chars` characters on either side of the match at
/// `start..end` (byte offsets), and flatten newlines into spaces.
fn snippet(text: &str, start: usize, end: usize, context_chars: usize) -> String {
    let before = &text[..start];
    let window_start = before
        .char_indices()
        .rev()
        .take(context_chars)
        .last()
        .map_or(start, |(i, _)| i);

    let after = &text[end..];
    let window_end = end
        + after
            .char_indices()
            .nth(context_chars)
            .map_or(after.len(), |(i, _)| i);

    text[window_start..window_end].replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(texts: &[&str]) -> DocumentIndex {
        let pages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| PageResult::new(i + 1, text))
            .collect();
        DocumentIndex::from_pages(texts.len(), pages).expect("complete index")
    }

    fn invoice_index() -> DocumentIndex {
        index(&[
            "Quarterly report\nNothing to see here.",
            "Dear customer,\nplease find attached Invoice #4521 for March.",
            "Thank you for your business.",
        ])
    }

    #[test]
    fn finds_the_page_with_the_match() {
        let results = invoice_index().search("invoice", 100);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page, 2);
        assert_eq!(results[0].label, "Page 2");
        assert!(results[0].snippet.contains("invoice #4521"));
        assert!(results[0].snippet.starts_with("...") && results[0].snippet.ends_with("..."));
        assert!(!results[0].snippet.contains('\n'));
        assert!(results[0].full_text.contains('\n'));
    }

    #[test]
    fn queries_are_case_insensitive_and_trimmed() {
        let index = invoice_index();
        assert_eq!(index.search("  INVOICE\t", 100), index.search("invoice", 100));
        assert_eq!(index.search("InVoIcE #4521", 100)[0].page, 2);
    }

    #[test]
    fn empty_queries_match_nothing() {
        let index = invoice_index();
        assert!(index.search("", 100).is_empty());
        assert!(index.search("   \n", 100).is_empty());
    }

    #[test]
    fn results_come_back_in_page_order() {
        let index = index(&["the cat", "no match", "another cat", "cat"]);
        let pages = index
            .search("cat", 10)
            .iter()
            .map(|r| r.page)
            .collect::<Vec<_>>();
        assert_eq!(pages, vec![1, 3, 4]);
    }

    #[test]
    fn only_the_first_match_on_a_page_is_used() {
        let text = format!("alpha {} alpha", "x".repeat(300));
        let results = index(&[&text]).search("alpha", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].snippet, "...alpha xxxx...");
    }

    #[test]
    fn snippet_is_bounded_by_context() {
        let text = format!("{}needle{}", "a".repeat(500), "b".repeat(500));
        let results = index(&[&text]).search("needle", 100);
        let inner = results[0]
            .snippet
            .strip_prefix("...")
            .and_then(|s| s.strip_suffix("..."))
            .expect("snippet is wrapped in ellipses");
        assert_eq!(inner.chars().count(), 100 + "needle".len() + 100);
        assert_eq!(inner, format!("{}needle{}", "a".repeat(100), "b".repeat(100)));
    }

    #[test]
    fn snippet_is_clamped_at_text_boundaries() {
        let results = index(&["needle at start", "ends with needle", "needle"])
            .search("needle", 100);
        let snippets = results.iter().map(|r| r.snippet.as_str()).collect::<Vec<_>>();
        assert_eq!(
            snippets,
            vec!["...needle at start...", "...ends with needle...", "...needle..."]
        );
    }

    #[test]
    fn snippet_counts_characters_not_bytes() {
        let text = format!("{}ß target ü{}", "é".repeat(10), "ö".repeat(10));
        let results = index(&[&text]).search("target", 3);
        assert_eq!(results[0].snippet, "...éß target üö...");
    }

    #[test]
    fn zero_context_shows_only_the_match() {
        let results = invoice_index().search("#4521", 0);
        assert_eq!(results[0].snippet, "...#4521...");
    }

    #[test]
    fn non_matching_pages_never_appear() {
        let index = invoice_index();
        for query in ["report", "customer", "business", "march", "zebra"] {
            let normalized = normalize_query(query);
            for result in index.search(query, 100) {
                assert!(index.pages()[result.page - 1].text.contains(&normalized));
            }
        }
        assert!(index.search("zebra", 100).is_empty());
    }

    #[test]
    fn search_is_idempotent() {
        let index = invoice_index();
        assert_eq!(index.search("you", 20), index.search("you", 20));
    }

    #[test]
    fn empty_pages_never_match() {
        let index = index(&["", "text"]);
        assert!(index.search("t", 100).iter().all(|r| r.page == 2));
    }

    #[test]
    fn from_pages_sorts_and_checks_coverage() {
        let pages = vec![
            PageResult::new(3, "c"),
            PageResult::new(1, "a"),
            PageResult::new(2, "b"),
        ];
        let index = DocumentIndex::from_pages(3, pages).expect("complete");
        let numbers = index.pages().iter().map(|p| p.page).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3]);

        let gap = vec![PageResult::new(1, "a"), PageResult::new(3, "c")];
        assert!(matches!(
            DocumentIndex::from_pages(3, gap),
            Err(PipelineError::IncompleteIndex { expected: 3, found: 2 })
        ));

        let duplicate = vec![PageResult::new(1, "a"), PageResult::new(1, "a")];
        assert!(DocumentIndex::from_pages(2, duplicate).is_err());
    }

    #[test]
    fn empty_index_matches_nothing() {
        let index = DocumentIndex::empty();
        assert!(index.is_empty());
        assert!(index.search("anything", 100).is_empty());
    }

    #[test]
    fn page_results_are_lower_cased() {
        assert_eq!(PageResult::new(1, "HeLLo World").text, "hello world");
    }
}
