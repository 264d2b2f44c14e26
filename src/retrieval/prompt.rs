//! Prompt construction and answer extraction for claim analysis

use crate::retrieval::ScoredClause;

/// Marker the prompt ends with; the model's answer follows it
pub const ANSWER_MARKER: &str = "ANALYSIS:";

/// Returned when there is nothing to ground an analysis on
pub const NO_CLAUSES_MESSAGE: &str =
    "No relevant policy clauses were found to analyze this claim.";

/// Build the analysis prompt: clause bullets in retrieval order, then the
/// claim, then the instruction, ending with the answer marker
///
/// Deterministic for a fixed input; the clause order is the caller's ranked
/// order and must not be re-sorted here.
pub fn build_analysis_prompt(query: &str, clauses: &[ScoredClause]) -> String {
    let context = clauses
        .iter()
        .map(|scored| format!("- [{}] {}", scored.clause.id, scored.clause.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Instruct: You are an expert Insurance Policy Analyst. \
         Based on the following policy clauses, analyze the user's claim description. \
         State if it is likely covered and cite the clause ID.\n\n\
         POLICY CLAUSES:\n{context}\n\n\
         USER CLAIM: {query}\n\n\
         {ANSWER_MARKER}"
    )
}

/// Extract the text after the answer marker; if the marker is absent the raw
/// output is returned rather than failing, so malformed generation degrades
/// instead of aborting the request
pub fn extract_analysis(raw: &str) -> String {
    match raw.rsplit_once(ANSWER_MARKER) {
        Some((_, after)) => after.trim().to_string(),
        None => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Clause;

    fn scored(id: &str, text: &str) -> ScoredClause {
        ScoredClause::new(Clause::new(id, text), 0.9)
    }

    #[test]
    fn test_prompt_is_deterministic_and_ordered() {
        let clauses = vec![scored("C1", "collision coverage"), scored("C2", "exclusions")];

        let a = build_analysis_prompt("my car was hit", &clauses);
        let b = build_analysis_prompt("my car was hit", &clauses);
        assert_eq!(a, b);

        let c1 = a.find("- [C1] collision coverage").unwrap();
        let c2 = a.find("- [C2] exclusions").unwrap();
        assert!(c1 < c2);
        assert!(a.contains("USER CLAIM: my car was hit"));
        assert!(a.ends_with(ANSWER_MARKER));
    }

    #[test]
    fn test_extract_after_marker() {
        let raw = "Instruct: ...\n\nANALYSIS: The claim is likely covered under C1.";
        assert_eq!(
            extract_analysis(raw),
            "The claim is likely covered under C1."
        );
    }

    #[test]
    fn test_extract_uses_last_marker() {
        let raw = "ANALYSIS: echoed prompt\nANALYSIS: the real answer";
        assert_eq!(extract_analysis(raw), "the real answer");
    }

    #[test]
    fn test_missing_marker_returns_raw_output() {
        let raw = "  The model ignored the format entirely.  ";
        assert_eq!(
            extract_analysis(raw),
            "The model ignored the format entirely."
        );
    }
}
