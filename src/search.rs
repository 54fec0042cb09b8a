//! Terminal rendering of search hits, answers and statistics.

use serde::Serialize;

use crate::{
    answer::AnswerOutcome,
    error::Result,
    retriever::SearchHit,
    store::StoreStats,
};

/// Longest preview of a chunk's text in human output.
const PREVIEW_CHARS: usize = 160;

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SearchHit],
}

/// `text` with whitespace collapsed, cut to `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

pub fn format_human(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }

    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!(
            "{:>3}. [{:.3}] {} (page {}, chunk {})\n     {}\n",
            hit.rank,
            hit.score,
            hit.chunk.document_id,
            hit.chunk.page,
            hit.chunk.chunk_id,
            preview(&hit.chunk.text, PREVIEW_CHARS)
        ));
    }
    out.push_str(&format!("\n{} result(s)", hits.len()));
    out
}

pub fn format_json(hits: &[SearchHit], query: &str) -> Result<String> {
    Ok(serde_json::to_string(&SearchOutput {
        query,
        result_count: hits.len(),
        results: hits,
    })?)
}

/// The answer, then a numbered source list.
pub fn format_answer(outcome: &AnswerOutcome) -> String {
    let mut out = outcome.answer.trim_end().to_string();
    if !outcome.sources.is_empty() {
        out.push_str("\n\nSources:");
        for hit in &outcome.sources {
            out.push_str(&format!(
                "\n  [{}] {} page {}",
                hit.rank, hit.chunk.document_id, hit.chunk.page
            ));
        }
    }
    out
}

pub fn format_stats(stats: &StoreStats, data_dir: &std::path::Path) -> String {
    let dimension = stats
        .dimension
        .map_or_else(|| "-".to_string(), |d| d.to_string());
    format!(
        "Data directory: {}\nDocuments: {}\nChunks: {}\nVectors: {}\nDimension: {dimension}",
        data_dir.display(),
        stats.total_documents,
        stats.total_chunks,
        stats.total_vectors,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkRecord;

    fn hit(rank: usize, doc: &str, page: u32, text: &str) -> SearchHit {
        SearchHit {
            rank,
            score: 0.8,
            chunk: ChunkRecord {
                document_id: doc.to_string(),
                page,
                chunk_id: 0,
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n b\t c", 10), "a b c");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn human_output_lists_hits() {
        let out = format_human(&[hit(1, "a.pdf", 2, "alpha")]);
        assert!(out.contains("  1. [0.800] a.pdf (page 2, chunk 0)"));
        assert!(out.contains("     alpha"));
        assert!(out.ends_with("1 result(s)"));
        assert_eq!(format_human(&[]), "No results found.");
    }

    #[test]
    fn json_output_is_parseable() {
        let json = format_json(&[hit(1, "a.pdf", 2, "alpha")], "q").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["query"], "q");
        assert_eq!(value["result_count"], 1);
        assert_eq!(value["results"][0]["document_id"], "a.pdf");
    }

    #[test]
    fn answer_lists_sources() {
        let outcome = AnswerOutcome {
            answer: "Two years.\n".into(),
            sources: vec![hit(1, "guide.pdf", 3, "warranty")],
        };
        assert_eq!(
            format_answer(&outcome),
            "Two years.\n\nSources:\n  [1] guide.pdf page 3"
        );
    }

    #[test]
    fn stats_show_missing_dimension() {
        let stats = StoreStats {
            total_vectors: 0,
            total_chunks: 0,
            total_documents: 0,
            dimension: None,
        };
        let out = format_stats(&stats, std::path::Path::new("/tmp/docrag"));
        assert!(out.contains("Chunks: 0"));
        assert!(out.ends_with("Dimension: -"));
    }
}
