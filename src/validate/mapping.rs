//! Column-mapping result validation.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::AiError;
use crate::operation::{ColumnMappingResult, MAPPING_SCHEMA_VERSION};

/// Reasoning strings are cut here, with an ellipsis.
const MAX_REASONING_CHARS: usize = 256;

/// Validate and normalize a column-mapping result.
///
/// Enforced invariants:
/// - `schemaVersion` equals [`MAPPING_SCHEMA_VERSION`]
/// - no duplicate `canonicalName` (first occurrence kept)
/// - every `canonicalName` belongs to `canonical_fields`
/// - every `columnIndex` is in `[0, header_count)` when the count is known
/// - confidences clamped to `[0, 1]`, reasoning truncated, meta recomputed
pub fn validate_mapping(
    raw: &Value,
    header_count: Option<usize>,
    canonical_fields: &[&str],
) -> Result<ColumnMappingResult, AiError> {
    let mut result: ColumnMappingResult =
        serde_json::from_value(raw.clone()).map_err(|e| AiError::ValidationFailed {
            reason: format!("mapping result does not deserialize: {e}"),
        })?;

    if result.schema_version != MAPPING_SCHEMA_VERSION {
        return Err(AiError::ValidationFailed {
            reason: format!(
                "unexpected schema version {:?}, expected {MAPPING_SCHEMA_VERSION:?}",
                result.schema_version
            ),
        });
    }

    // Dedupe by canonical name, keeping the first occurrence.
    let mut seen = HashSet::new();
    result
        .canonical_fields
        .retain(|mapping| seen.insert(mapping.canonical_name.clone()));

    for mapping in &mut result.canonical_fields {
        if !canonical_fields.contains(&mapping.canonical_name.as_str()) {
            return Err(AiError::ValidationFailed {
                reason: format!(
                    "canonical name {:?} is not in the allowed set",
                    mapping.canonical_name
                ),
            });
        }
        if mapping.column_index < 0 {
            return Err(AiError::ValidationFailed {
                reason: format!(
                    "negative column index {} for header {:?}",
                    mapping.column_index, mapping.source_header
                ),
            });
        }
        if let Some(count) = header_count {
            if mapping.column_index >= count as i64 {
                return Err(AiError::ValidationFailed {
                    reason: format!(
                        "column index {} out of range for {count} headers",
                        mapping.column_index
                    ),
                });
            }
        }
        mapping.confidence = mapping.confidence.clamp(0.0, 1.0);
        for alternative in &mut mapping.alternatives {
            alternative.confidence = alternative.confidence.clamp(0.0, 1.0);
        }
        if mapping.reasoning.chars().count() > MAX_REASONING_CHARS {
            let truncated: String = mapping.reasoning.chars().take(MAX_REASONING_CHARS).collect();
            mapping.reasoning = format!("{truncated}\u{2026}");
        }
    }

    result.recompute_meta(header_count);
    Ok(result)
}
