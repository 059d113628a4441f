use crate::models::Document;

/// Added to the term-overlap count when the whole query appears verbatim.
const VERBATIM_BONUS: f32 = 1.0;

/// Keyword-overlap scorer: the only ranker in this service. A semantic
/// backend stays out of scope, so there is no configuration toggle for one.
/// An approximation by design: distinct query terms longer than two characters
/// are matched case-insensitively as substrings of the document text, a full
/// verbatim occurrence of the query earns a fixed bonus, and the sum is
/// normalized by (term count + 1) so scores land in [0, 1].
pub fn score_document(query: &str, document_text: &str) -> f32 {
    let normalized_query = query.trim().to_lowercase();
    let text = document_text.to_lowercase();

    let mut terms: Vec<&str> = normalized_query
        .split_whitespace()
        .filter(|term| term.chars().count() > 2)
        .collect();
    terms.sort_unstable();
    terms.dedup();

    let matched = terms.iter().filter(|term| text.contains(**term)).count() as f32;

    let bonus = if !normalized_query.is_empty() && text.contains(&normalized_query) {
        VERBATIM_BONUS
    } else {
        0.0
    };

    (matched + bonus) / (terms.len() as f32 + 1.0)
}

/// Returns the top `top_k` documents by descending score, excluding documents
/// that match nothing. Ties keep the original candidate order.
pub fn rank_documents<'a>(
    query: &str,
    documents: &'a [Document],
    top_k: usize,
) -> Vec<(&'a Document, f32)> {
    let mut scored: Vec<(&Document, f32)> = documents
        .iter()
        .map(|doc| (doc, score_document(query, &doc.searchable_text())))
        .filter(|(_, score)| *score > 0.0)
        .collect();

    // Stable sort so equal scores preserve candidate order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}
