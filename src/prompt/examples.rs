//! Few-shot example store with context-aware scoring.

use std::sync::RwLock;

use serde_json::Value;

use crate::operation::Operation;

/// A few-shot example shown to the model.
///
/// `expected` is the JSON output the example demonstrates; for mapping
/// examples it holds the expected header-to-canonical assignments, for
/// paste analysis the expected classification.
#[derive(Debug, Clone)]
pub struct Example {
    pub operation: Operation,
    pub schema_type: String,
    pub language: String,
    pub headers: Vec<String>,
    pub expected: Value,
}

impl Example {
    /// Relevance score against the current request context.
    ///
    /// Schema-type match +100, language match +50, column-count proximity
    /// `max(0, 30 - 5*|delta|)`, and a +10 baseline for `generic` examples
    /// so they surface when nothing specific matches.
    fn score(&self, schema_type: &str, language: &str, column_count: Option<usize>) -> i64 {
        let mut score = 0i64;
        if !schema_type.is_empty() && self.schema_type == schema_type {
            score += 100;
        }
        if !language.is_empty() && self.language == language {
            score += 50;
        }
        if let Some(count) = column_count {
            let delta = (self.headers.len() as i64 - count as i64).abs();
            score += (30 - 5 * delta).max(0);
        }
        if self.schema_type == "generic" {
            score += 10;
        }
        score
    }
}

/// Store of few-shot examples, scored per lookup.
#[derive(Default)]
pub struct ExampleStore {
    examples: RwLock<Vec<Example>>,
}

impl ExampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with the built-in example pack.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for example in default_examples() {
            store.add(example);
        }
        store
    }

    pub fn add(&self, example: Example) {
        self.examples
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(example);
    }

    pub fn len(&self) -> usize {
        self.examples.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The top `k` examples for `operation` by descending score. Ties keep
    /// insertion order, so the selection is deterministic.
    pub fn top_k(
        &self,
        operation: Operation,
        schema_type: &str,
        language: &str,
        column_count: Option<usize>,
        k: usize,
    ) -> Vec<Example> {
        let examples = self.examples.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(i64, usize, &Example)> = examples
            .iter()
            .enumerate()
            .filter(|(_, e)| e.operation == operation)
            .map(|(i, e)| (e.score(schema_type, language, column_count), i, e))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().take(k).map(|(_, _, e)| e.clone()).collect()
    }
}

fn default_examples() -> Vec<Example> {
    vec![
        Example {
            operation: Operation::MapColumns,
            schema_type: "task_list".to_string(),
            language: "en".to_string(),
            headers: vec![
                "Task ID".to_string(),
                "Summary".to_string(),
                "Steps".to_string(),
                "Owner".to_string(),
            ],
            expected: serde_json::json!({
                "Task ID": "id",
                "Summary": "title",
                "Steps": "instructions",
                "Owner": "assignee",
            }),
        },
        Example {
            operation: Operation::MapColumns,
            schema_type: "generic".to_string(),
            language: "en".to_string(),
            headers: vec!["Name".to_string(), "Details".to_string(), "Due".to_string()],
            expected: serde_json::json!({
                "Name": "title",
                "Details": "description",
                "Due": "due_date",
            }),
        },
        Example {
            operation: Operation::MapColumns,
            schema_type: "task_list".to_string(),
            language: "de".to_string(),
            headers: vec![
                "Nr".to_string(),
                "Titel".to_string(),
                "Beschreibung".to_string(),
            ],
            expected: serde_json::json!({
                "Nr": "id",
                "Titel": "title",
                "Beschreibung": "description",
            }),
        },
        Example {
            operation: Operation::AnalyzePaste,
            schema_type: "generic".to_string(),
            language: "en".to_string(),
            headers: vec![],
            expected: serde_json::json!({
                "inputType": "table",
                "detectedFormat": "tsv",
                "suggestedOutput": "spec_table",
            }),
        },
    ]
}
