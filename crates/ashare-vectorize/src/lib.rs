#![forbid(unsafe_code)]
//! Builds the searchable vector index: cleans concept text, embeds it in
//! batches, validates the returned dimension, and writes embeddings without
//! disturbing the fusion-owned `version` column.

use std::time::Duration;

use ashare_adapters::embed::EmbeddingAdapter;
use ashare_core::error::{Error, Result};
use ashare_db::queries::ConceptRow;
use sqlx::PgPool;

/// Per-company vectorization totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorizeCounts {
    pub embedded: u32,
    pub dimension_errors: u32,
    pub total: u32,
}

/// Collapses runs of whitespace to a single ASCII space, strips ASCII
/// control characters (keeping CJK and other non-control text untouched),
/// folds curly quotes to their ASCII equivalents, and drops zero-width
/// characters that otherwise survive naive whitespace trimming.
#[must_use]
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;

    for c in input.chars() {
        let mapped = match c {
            '\u{2018}' | '\u{2019}' => Some('\''),
            '\u{201C}' | '\u{201D}' => Some('"'),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => None,
            c if c.is_control() && c != '\n' && c != '\t' => None,
            c if c.is_whitespace() => Some(' '),
            c => Some(c),
        };
        match mapped {
            Some(' ') => {
                if !last_was_space {
                    out.push(' ');
                }
                last_was_space = true;
            }
            Some(c) => {
                out.push(c);
                last_was_space = false;
            }
            None => {}
        }
    }

    out.trim().to_string()
}

/// Builds the embedding input for one concept: name plus cleaned
/// description, truncated to `max_len` Unicode scalars and suffixed with
/// `"..."` when truncation occurs. The name is preserved in full only when
/// it fits within the truncation budget.
#[must_use]
pub fn prepare_text_for_embedding(concept_name: &str, description: &str, max_len: usize) -> String {
    let cleaned_name = clean_text(concept_name);
    let cleaned_desc = clean_text(description);
    let combined = if cleaned_desc.is_empty() {
        cleaned_name.clone()
    } else {
        format!("{cleaned_name}: {cleaned_desc}")
    };

    if combined.chars().count() <= max_len {
        return combined;
    }

    let available = max_len.saturating_sub(3);
    let name_len = cleaned_name.chars().count();
    if name_len >= available || cleaned_desc.is_empty() {
        let truncated: String = combined.chars().take(available).collect();
        return format!("{truncated}...");
    }

    let max_desc_len = available.saturating_sub(name_len + 2);
    let truncated_desc: String = cleaned_desc.chars().take(max_desc_len).collect();
    format!("{cleaned_name}: {truncated_desc}...")
}

/// Embeds and persists vectors for one company's concepts lacking an
/// embedding (or, on `rebuild`, every active concept), in batches of
/// `batch_size`, flushing each batch's writes before requesting the next.
/// A batch entry whose returned vector has the wrong dimension is dropped
/// (counted, not retried) without failing the rest of the batch.
pub async fn vectorize_company(
    pool: &PgPool,
    adapter: &dyn EmbeddingAdapter,
    company_code: &str,
    rebuild: bool,
    batch_size: usize,
    max_text_length: usize,
    deadline: Duration,
) -> Result<VectorizeCounts> {
    let rows = ashare_db::queries::concepts_needing_embedding(pool, company_code, rebuild).await?;
    let mut counts = VectorizeCounts::default();

    for batch in rows.chunks(batch_size.max(1)) {
        counts.total += batch.len() as u32;
        let texts: Vec<String> = batch
            .iter()
            .map(|row: &ConceptRow| prepare_text_for_embedding(&row.concept_name, description(row), max_text_length))
            .collect();

        let vectors = adapter.embed_texts(&texts, deadline).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Internal(format!(
                "embedding adapter returned {} vectors for a batch of {}",
                vectors.len(),
                batch.len()
            )));
        }

        for (row, vector) in batch.iter().zip(vectors.into_iter()) {
            if vector.len() != adapter.embedding_dimension() {
                tracing::warn!(
                    concept_id = %row.concept_id,
                    expected = adapter.embedding_dimension(),
                    actual = vector.len(),
                    "dropping embedding with mismatched dimension"
                );
                counts.dimension_errors += 1;
                continue;
            }
            ashare_db::queries::update_embedding(pool, row.concept_id, &vector).await?;
            counts.embedded += 1;
        }
    }

    Ok(counts)
}

fn description(row: &ConceptRow) -> &str {
    row.concept_details
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace_and_strips_controls() {
        assert_eq!(clean_text("a   b\tc"), "a b c");
        assert_eq!(clean_text("a\u{0007}b"), "ab");
    }

    #[test]
    fn clean_text_preserves_chinese() {
        assert_eq!(clean_text("  开山股份  智能制造  "), "开山股份 智能制造");
    }

    #[test]
    fn clean_text_folds_curly_quotes_and_drops_zero_width() {
        assert_eq!(clean_text("\u{2018}hello\u{2019}\u{200B}"), "'hello'");
        assert_eq!(clean_text("\u{201C}quoted\u{201D}"), "\"quoted\"");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let once = clean_text("  a\u{0007}  b\u{2019}  ");
        let twice = clean_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn prepare_text_preserves_full_concept_name_when_truncating() {
        let name = "智能制造业务";
        let description = "x".repeat(100);
        let text = prepare_text_for_embedding(name, &description, 20);
        assert!(text.starts_with(name));
        assert!(text.chars().count() <= 20);
    }

    #[test]
    fn prepare_text_handles_empty_description() {
        assert_eq!(prepare_text_for_embedding("概念名称", "", 50), "概念名称");
    }

    proptest::proptest! {
        #[test]
        fn clean_text_is_idempotent_for_arbitrary_input(s in ".{0,80}") {
            let once = clean_text(&s);
            let twice = clean_text(&once);
            proptest::prop_assert_eq!(once, twice);
        }

        #[test]
        fn prepare_text_never_exceeds_budget(
            name in "[\\p{Han}a-zA-Z]{1,10}",
            description in ".{0,200}",
            max_len in 5usize..60,
        ) {
            let text = prepare_text_for_embedding(&name, &description, max_len);
            proptest::prop_assert!(text.chars().count() <= max_len);

            let cleaned_name = clean_text(&name);
            let cleaned_desc = clean_text(&description);
            let combined_len = if cleaned_desc.is_empty() {
                cleaned_name.chars().count()
            } else {
                cleaned_name.chars().count() + 2 + cleaned_desc.chars().count()
            };
            if combined_len <= max_len || cleaned_name.chars().count() <= max_len.saturating_sub(3) {
                proptest::prop_assert!(text.starts_with(&cleaned_name));
            }
        }
    }
}
