//! Built-in sample policy clauses for seeding a fresh index

use crate::retrieval::Clause;

/// Sample policy clauses covering auto, property and liability policies
pub fn sample_clauses() -> Vec<Clause> {
    vec![
        Clause::new(
            "CLAUSE_001",
            "This policy covers damage to the insured vehicle resulting from collision with \
             another vehicle or object, subject to the deductible amount specified in the \
             policy schedule.",
        )
        .with_meta("policy_type", "Auto Insurance")
        .with_meta("section", "Coverage"),
        Clause::new(
            "CLAUSE_002",
            "The insurer shall not be liable for any loss or damage caused by wear and tear, \
             mechanical breakdown, or failure of parts unless such failure is directly caused \
             by an insured peril.",
        )
        .with_meta("policy_type", "Auto Insurance")
        .with_meta("section", "Exclusions"),
        Clause::new(
            "CLAUSE_003",
            "In the event of a claim, the insured must notify the insurer within 30 days of \
             the occurrence of the loss or damage, providing all relevant documentation and \
             evidence.",
        )
        .with_meta("policy_type", "General")
        .with_meta("section", "Claims Procedure"),
        Clause::new(
            "CLAUSE_004",
            "This policy provides coverage for medical expenses incurred as a result of \
             injuries sustained in an automobile accident, up to the policy limits specified \
             in the schedule.",
        )
        .with_meta("policy_type", "Auto Insurance")
        .with_meta("section", "Medical Coverage"),
        Clause::new(
            "CLAUSE_005",
            "The insured property is covered against loss or damage caused by fire, \
             lightning, explosion, or smoke, subject to the terms and conditions of this \
             policy.",
        )
        .with_meta("policy_type", "Property Insurance")
        .with_meta("section", "Coverage"),
        Clause::new(
            "CLAUSE_006",
            "Flood damage is excluded from coverage unless specifically endorsed and \
             additional premium is paid for flood coverage.",
        )
        .with_meta("policy_type", "Property Insurance")
        .with_meta("section", "Exclusions"),
        Clause::new(
            "CLAUSE_007",
            "The policyholder must maintain the insured property in good condition and take \
             reasonable precautions to prevent loss or damage.",
        )
        .with_meta("policy_type", "Property Insurance")
        .with_meta("section", "Duties of Insured"),
        Clause::new(
            "CLAUSE_008",
            "Coverage for theft of personal belongings is limited to items specifically \
             listed in the policy schedule, and proof of ownership may be required.",
        )
        .with_meta("policy_type", "Property Insurance")
        .with_meta("section", "Coverage Limits"),
        Clause::new(
            "CLAUSE_009",
            "Liability coverage extends to bodily injury and property damage caused by the \
             insured's negligence, up to the policy limits stated in the declaration page.",
        )
        .with_meta("policy_type", "Liability Insurance")
        .with_meta("section", "Coverage"),
        Clause::new(
            "CLAUSE_010",
            "Intentional acts, criminal activities, and damage caused while under the \
             influence of alcohol or drugs are excluded from coverage.",
        )
        .with_meta("policy_type", "General")
        .with_meta("section", "Exclusions"),
        Clause::new(
            "CLAUSE_011",
            "This policy covers sudden and accidental discharge of water or steam from \
             within a plumbing, heating, air conditioning, or automatic fire protective \
             sprinkler system.",
        )
        .with_meta("policy_type", "Property Insurance")
        .with_meta("section", "Coverage"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sample_ids_are_unique() {
        let clauses = sample_clauses();
        let ids: HashSet<&str> = clauses.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), clauses.len());
        assert!(clauses.iter().all(|c| !c.text.is_empty()));
    }
}
