//! Paste-analysis result validation.

use serde_json::Value;

use crate::error::AiError;
use crate::operation::PasteAnalysisResult;

/// Validate a paste-analysis result.
///
/// The closed enumerations (`inputType`, `detectedFormat`,
/// `suggestedOutput`) are enforced by deserialization; on top of that the
/// confidence is clamped to `[0, 1]` and a normalized table, when
/// present, must be rectangular.
pub fn validate_paste(raw: &Value) -> Result<PasteAnalysisResult, AiError> {
    let mut result: PasteAnalysisResult =
        serde_json::from_value(raw.clone()).map_err(|e| AiError::ValidationFailed {
            reason: format!("paste analysis does not deserialize: {e}"),
        })?;

    result.confidence = result.confidence.clamp(0.0, 1.0);

    if let Some(table) = &result.normalized_table {
        let width = table.headers.len();
        for (i, row) in table.rows.iter().enumerate() {
            if row.len() != width {
                return Err(AiError::ValidationFailed {
                    reason: format!(
                        "normalized table row {i} has {} cells, expected {width}",
                        row.len()
                    ),
                });
            }
        }
    }

    Ok(result)
}
