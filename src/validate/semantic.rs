//! Advisory semantic pass over validated mapping results.

use std::collections::HashMap;

use crate::operation::{ColumnMappingResult, IssueKind, SemanticIssue};

/// Overall confidence below this raises a missing-context advisory.
const LOW_CONFIDENCE_BAR: f64 = 0.5;

/// Raise advisory issues over an already-validated mapping.
///
/// Never fails: every finding is a suggestion for the caller or the
/// refinement pass, not a rejection.
///
/// - duplicate `columnIndex` across mappings -> inconsistent
/// - an alternative scored above the selected mapping -> ambiguous
/// - a schema-required field absent from the mapping -> incomplete
/// - low overall confidence -> missing_context
pub fn semantic_issues(
    result: &ColumnMappingResult,
    required_fields: &[&str],
) -> Vec<SemanticIssue> {
    let mut issues = Vec::new();

    let mut index_owners: HashMap<i64, &str> = HashMap::new();
    for mapping in &result.canonical_fields {
        if let Some(other) = index_owners.insert(mapping.column_index, &mapping.canonical_name) {
            issues.push(SemanticIssue {
                kind: IssueKind::Inconsistent,
                field: Some(mapping.canonical_name.clone()),
                message: format!(
                    "column {} is mapped to both {:?} and {:?}",
                    mapping.column_index, other, mapping.canonical_name
                ),
            });
        }
    }

    for mapping in &result.canonical_fields {
        if let Some(better) = mapping
            .alternatives
            .iter()
            .find(|alt| alt.confidence > mapping.confidence)
        {
            issues.push(SemanticIssue {
                kind: IssueKind::Ambiguous,
                field: Some(mapping.canonical_name.clone()),
                message: format!(
                    "alternative {:?} scored higher ({:.2} > {:.2}) for header {:?}",
                    better.canonical_name,
                    better.confidence,
                    mapping.confidence,
                    mapping.source_header
                ),
            });
        }
    }

    for required in required_fields {
        if !result
            .canonical_fields
            .iter()
            .any(|m| m.canonical_name == *required)
        {
            issues.push(SemanticIssue {
                kind: IssueKind::Incomplete,
                field: Some((*required).to_string()),
                message: format!("required field {required:?} has no mapped column"),
            });
        }
    }

    if !result.canonical_fields.is_empty() && result.meta.avg_confidence < LOW_CONFIDENCE_BAR {
        issues.push(SemanticIssue {
            kind: IssueKind::MissingContext,
            field: None,
            message: format!(
                "overall confidence {:.2} is low; more sample rows may help",
                result.meta.avg_confidence
            ),
        });
    }

    issues
}
