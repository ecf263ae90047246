//! The closed set of AI operations and their typed requests and results.
//!
//! Every externally visible call goes through one of these operations. The
//! dispatch table on [`Operation`] ties each to its prompt id, structured
//! output schema version, and response JSON schema; the orchestrating
//! service never branches on anything else.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Schema version enforced for column-mapping output, in both the schema
/// builder and the validator.
pub const MAPPING_SCHEMA_VERSION: &str = "v2";

/// Schema version for paste-analysis output.
pub const PASTE_SCHEMA_VERSION: &str = "v1";

/// The closed set of canonical field names arbitrary source headers are
/// mapped into. Read-only after startup; injected where needed rather than
/// referenced globally so tests can substitute their own set.
pub const CANONICAL_FIELDS: &[&str] = &[
    "id",
    "title",
    "description",
    "instructions",
    "category",
    "priority",
    "status",
    "assignee",
    "tags",
    "estimate",
    "due_date",
    "notes",
];

/// An AI operation supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    MapColumns,
    AnalyzePaste,
    Suggestions,
    SummarizeDiff,
    ValidateSemantic,
    RefineMapping,
}

impl Operation {
    /// Stable identifier used in cache keys, metrics labels, and logs.
    pub fn id(&self) -> &'static str {
        match self {
            Operation::MapColumns => "map_columns",
            Operation::AnalyzePaste => "analyze_paste",
            Operation::Suggestions => "suggestions",
            Operation::SummarizeDiff => "summarize_diff",
            Operation::ValidateSemantic => "validate_semantic",
            Operation::RefineMapping => "refine_mapping",
        }
    }

    /// Prompt id resolved through the registry for this operation.
    pub fn prompt_id(&self) -> &'static str {
        self.id()
    }

    /// Structured output schema version, part of every cache key.
    pub fn schema_version(&self) -> &'static str {
        match self {
            Operation::MapColumns | Operation::RefineMapping => MAPPING_SCHEMA_VERSION,
            Operation::AnalyzePaste => PASTE_SCHEMA_VERSION,
            Operation::Suggestions | Operation::SummarizeDiff | Operation::ValidateSemantic => "v1",
        }
    }

    /// Whether the prompt builder appends the JSON schema reminder block.
    pub fn wants_schema_reminder(&self) -> bool {
        matches!(self, Operation::MapColumns | Operation::RefineMapping)
    }

    /// All operations, in a fixed order.
    pub fn all() -> &'static [Operation] {
        &[
            Operation::MapColumns,
            Operation::AnalyzePaste,
            Operation::Suggestions,
            Operation::SummarizeDiff,
            Operation::ValidateSemantic,
            Operation::RefineMapping,
        ]
    }

    /// JSON schema (strict mode) the provider is asked to conform to.
    pub fn response_schema(&self) -> Value {
        match self {
            Operation::MapColumns | Operation::RefineMapping => mapping_response_schema(),
            Operation::AnalyzePaste => paste_response_schema(),
            Operation::Suggestions => json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["suggestions"],
                "properties": {
                    "suggestions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["category", "text", "priority"],
                            "properties": {
                                "category": { "type": "string" },
                                "text": { "type": "string" },
                                "priority": { "enum": ["high", "medium", "low"] }
                            }
                        }
                    }
                }
            }),
            Operation::SummarizeDiff => json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["summary", "changes"],
                "properties": {
                    "summary": { "type": "string" },
                    "changes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["kind", "description"],
                            "properties": {
                                "kind": { "enum": ["added", "removed", "modified"] },
                                "description": { "type": "string" }
                            }
                        }
                    }
                }
            }),
            Operation::ValidateSemantic => json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["valid", "issues"],
                "properties": {
                    "valid": { "type": "boolean" },
                    "issues": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["kind", "message"],
                            "properties": {
                                "kind": {
                                    "enum": ["ambiguous", "inconsistent", "incomplete", "missing_context"]
                                },
                                "field": { "type": ["string", "null"] },
                                "message": { "type": "string" }
                            }
                        }
                    }
                }
            }),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

fn mapping_response_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["schemaVersion", "canonicalFields", "extraColumns", "meta"],
        "properties": {
            "schemaVersion": { "const": MAPPING_SCHEMA_VERSION },
            "canonicalFields": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["sourceHeader", "columnIndex", "canonicalName", "confidence"],
                    "properties": {
                        "sourceHeader": { "type": "string" },
                        "columnIndex": { "type": "integer" },
                        "canonicalName": { "type": "string" },
                        "confidence": { "type": "number" },
                        "reasoning": { "type": "string" },
                        "alternatives": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["canonicalName", "confidence"],
                                "properties": {
                                    "canonicalName": { "type": "string" },
                                    "confidence": { "type": "number" }
                                }
                            }
                        }
                    }
                }
            },
            "extraColumns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["sourceHeader", "columnIndex"],
                    "properties": {
                        "sourceHeader": { "type": "string" },
                        "columnIndex": { "type": "integer" },
                        "semanticRole": { "type": ["string", "null"] }
                    }
                }
            },
            "meta": {
                "type": "object",
                "additionalProperties": false,
                "required": ["mappedColumns", "unmappedColumns", "avgConfidence"],
                "properties": {
                    "mappedColumns": { "type": "integer" },
                    "unmappedColumns": { "type": "integer" },
                    "avgConfidence": { "type": "number" }
                }
            }
        }
    })
}

fn paste_response_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["inputType", "detectedFormat", "suggestedOutput", "confidence"],
        "properties": {
            "inputType": { "enum": ["table", "list", "prose", "mixed", "unknown"] },
            "detectedFormat": {
                "enum": ["csv", "tsv", "markdown", "html", "json", "plain_text", "unknown"]
            },
            "suggestedOutput": { "enum": ["spec_table", "checklist", "freeform"] },
            "confidence": { "type": "number" },
            "normalizedTable": {
                "type": ["object", "null"],
                "additionalProperties": false,
                "required": ["headers", "rows"],
                "properties": {
                    "headers": { "type": "array", "items": { "type": "string" } },
                    "rows": {
                        "type": "array",
                        "items": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "notes": { "type": ["string", "null"] }
        }
    })
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to map spreadsheet headers onto canonical fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapColumnsRequest {
    pub headers: Vec<String>,
    /// A handful of sample rows shown to the model for disambiguation.
    #[serde(default)]
    pub sample_rows: Vec<Vec<String>>,
    /// Target schema type (e.g. "task_list", "generic").
    pub schema_type: String,
    /// ISO language code of the source document.
    pub language: String,
}

/// Request to analyze a pasted blob of unknown provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteAnalysisRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_hint: Option<String>,
}

/// Request for improvement suggestions on a generated spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsRequest {
    pub spec_markdown: String,
    pub schema_type: String,
}

/// Request to summarize the difference between two spec revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummaryRequest {
    pub before: String,
    pub after: String,
}

/// Request to semantically validate a spec document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticValidationRequest {
    pub spec_markdown: String,
    pub schema_type: String,
}

/// Request for a refinement pass over a low-confidence mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineMappingRequest {
    #[serde(flatten)]
    pub base: MapColumnsRequest,
    /// Headers the first pass mapped below the confidence bar.
    pub ambiguous_headers: Vec<String>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A single header-to-canonical-field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub source_header: String,
    /// Index into the request's header list. Signed so that out-of-range
    /// model output is representable before validation rejects it.
    pub column_index: i64,
    pub canonical_name: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<AlternativeMapping>,
}

/// A runner-up canonical name the model also considered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeMapping {
    pub canonical_name: String,
    pub confidence: f64,
}

/// A source column that did not meet the confidence bar for any canonical
/// name, preserved verbatim with a semantic-role annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraColumn {
    pub source_header: String,
    pub column_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_role: Option<String>,
}

/// Aggregate statistics over a mapping result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingMeta {
    pub mapped_columns: usize,
    pub unmapped_columns: usize,
    pub avg_confidence: f64,
}

/// Validated result of a MapColumns or RefineMapping call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMappingResult {
    pub schema_version: String,
    pub canonical_fields: Vec<FieldMapping>,
    #[serde(default)]
    pub extra_columns: Vec<ExtraColumn>,
    pub meta: MappingMeta,
}

impl ColumnMappingResult {
    /// Recompute `meta` from the kept mappings. `header_count` bounds the
    /// unmapped count when known.
    pub fn recompute_meta(&mut self, header_count: Option<usize>) {
        let mapped = self.canonical_fields.len();
        let avg = if mapped == 0 {
            0.0
        } else {
            self.canonical_fields.iter().map(|m| m.confidence).sum::<f64>() / mapped as f64
        };
        let unmapped = match header_count {
            Some(total) => total.saturating_sub(mapped),
            None => self.extra_columns.len(),
        };
        self.meta = MappingMeta {
            mapped_columns: mapped,
            unmapped_columns: unmapped,
            avg_confidence: avg,
        };
    }
}

/// Kind of input detected in a pasted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteInputType {
    Table,
    List,
    Prose,
    Mixed,
    Unknown,
}

/// Serialization format detected in a pasted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedFormat {
    Csv,
    Tsv,
    Markdown,
    Html,
    Json,
    PlainText,
    Unknown,
}

/// Output shape the converter should produce for this paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedOutput {
    SpecTable,
    Checklist,
    Freeform,
}

/// A table extracted from a paste, normalized to rectangular form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Validated result of an AnalyzePaste call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteAnalysisResult {
    pub input_type: PasteInputType,
    pub detected_format: DetectedFormat,
    pub suggested_output: SuggestedOutput,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_table: Option<NormalizedTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One improvement suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub category: String,
    pub text: String,
    pub priority: SuggestionPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

/// Result of a Suggestions call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsResult {
    pub suggestions: Vec<Suggestion>,
}

/// Kind of change in a diff summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One change within a diff summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffChange {
    pub kind: ChangeKind,
    pub description: String,
}

/// Result of a SummarizeDiff call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummaryResult {
    pub summary: String,
    pub changes: Vec<DiffChange>,
}

/// Advisory issue kinds raised by semantic validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Ambiguous,
    Inconsistent,
    Incomplete,
    MissingContext,
}

/// One advisory issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticIssue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

/// Result of a ValidateSemantic call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticValidationResult {
    pub valid: bool,
    pub issues: Vec<SemanticIssue>,
}
