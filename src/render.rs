//! Human-readable search results.

use crate::index::{SearchResult, normalize_query};

/// Render `results` for a terminal.
///
/// Matches in each preview are highlighted as `**QUERY**`.
pub fn render_text(query: &str, results: &[SearchResult], show_full_text: bool) -> String {
    let needle = normalize_query(query);
    if results.is_empty() || needle.is_empty() {
        return format!("No results found for {:?}\n", query.trim());
    }

    let highlight = format!("**{}**", needle.to_uppercase());
    let noun = if results.len() == 1 {
        "occurrence"
    } else {
        "occurrences"
    };
    let mut out = format!("Found {} {noun}\n", results.len());
    for result in results {
        out.push_str(&format!(
            "\n{}\n{}\n",
            result.label,
            result.snippet.replace(&needle, &highlight)
        ));
        if show_full_text {
            out.push('\n');
            for line in result.full_text.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DocumentIndex, PageResult};

    fn results(query: &str) -> Vec<SearchResult> {
        let pages = vec![
            PageResult::new(1, "Cover page"),
            PageResult::new(2, "Please pay Invoice #4521.\nThanks, and see invoice terms."),
            PageResult::new(3, "Appendix: invoice history"),
        ];
        DocumentIndex::from_pages(3, pages)
            .expect("complete index")
            .search(query, 100)
    }

    #[test]
    fn renders_headline_and_one_block_per_page() {
        let text = render_text("Invoice", &results("Invoice"), false);
        assert!(text.starts_with("Found 2 occurrences\n"));
        assert!(text.contains("\nPage 2\n"));
        assert!(text.contains("\nPage 3\n"));
        assert!(!text.contains("Page 1"));
        assert!(text.contains("please pay **INVOICE** #4521."));
        assert!(text.contains("appendix: **INVOICE** history"));
    }

    #[test]
    fn highlights_every_occurrence_inside_the_preview() {
        let text = render_text("invoice", &results("invoice"), false);
        assert!(text.contains("**INVOICE** #4521. thanks, and see **INVOICE** terms."));
    }

    #[test]
    fn singular_headline() {
        let text = render_text("cover", &results("cover"), false);
        assert!(text.starts_with("Found 1 occurrence\n"));
    }

    #[test]
    fn full_text_is_optional() {
        let without = render_text("appendix", &results("appendix"), false);
        let with = render_text("appendix", &results("appendix"), true);
        assert!(!without.contains("    appendix: invoice history"));
        assert!(with.contains("    appendix: invoice history"));
    }

    #[test]
    fn empty_results_say_so() {
        assert_eq!(
            render_text(" zebra ", &results("zebra"), false),
            "No results found for \"zebra\"\n"
        );
        assert_eq!(render_text("", &[], false), "No results found for \"\"\n");
    }
}
