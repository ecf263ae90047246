//! Prompt registry: versioned, content-hashed prompt storage.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::operation::Operation;

/// Environment variable prefix for per-prompt version pinning. The full
/// variable name is the prefix plus the uppercased prompt id, e.g.
/// `SHEETSPEC_PROMPT_MAP_COLUMNS=v2`.
pub const PROMPT_ENV_PREFIX: &str = "SHEETSPEC_PROMPT_";

/// One registered prompt version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEntry {
    pub id: String,
    pub version: String,
    pub content: String,
    /// SHA-256 hex of `content`.
    pub content_hash: String,
}

impl PromptEntry {
    /// The cache-key fragment that invalidates whenever content changes:
    /// `version ":" first 8 hex of content_hash`.
    pub fn cache_version(&self) -> String {
        format!("{}:{}", self.version, &self.content_hash[..8])
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
struct Inner {
    /// Per-id versions in append order; the latest is last.
    prompts: HashMap<String, Vec<PromptEntry>>,
    /// Programmatic version overrides (e.g. installed by A/B promotion).
    overrides: HashMap<String, String>,
}

/// Thread-safe registry of prompt versions.
///
/// Lookup priority: programmatic override, then environment override,
/// then the latest registered version.
#[derive(Default)]
pub struct PromptRegistry {
    inner: RwLock<Inner>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt version. Replaces an existing entry with the same
    /// id and version, otherwise appends.
    pub fn register(&self, id: impl Into<String>, version: impl Into<String>, content: impl Into<String>) {
        let content = content.into();
        let entry = PromptEntry {
            id: id.into(),
            version: version.into(),
            content_hash: content_hash(&content),
            content,
        };

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let versions = inner.prompts.entry(entry.id.clone()).or_default();
        if let Some(existing) = versions.iter_mut().find(|e| e.version == entry.version) {
            *existing = entry;
        } else {
            versions.push(entry);
        }
    }

    /// Pin `id` to a specific version (wins over env and latest).
    pub fn set_override(&self, id: impl Into<String>, version: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.overrides.insert(id.into(), version.into());
    }

    /// Remove a programmatic override.
    pub fn clear_override(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.overrides.remove(id);
    }

    /// Resolve the active prompt for `id`.
    pub fn get(&self, id: &str) -> Option<PromptEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let versions = inner.prompts.get(id)?;

        if let Some(version) = inner.overrides.get(id) {
            if let Some(entry) = versions.iter().find(|e| &e.version == version) {
                return Some(entry.clone());
            }
            tracing::warn!(
                prompt_id = %id,
                version = %version,
                "override names an unregistered version, falling back"
            );
        }

        let env_var = format!("{}{}", PROMPT_ENV_PREFIX, id.to_uppercase());
        if let Ok(version) = std::env::var(&env_var) {
            if let Some(entry) = versions.iter().find(|e| e.version == version) {
                return Some(entry.clone());
            }
            tracing::warn!(
                prompt_id = %id,
                env_var = %env_var,
                version = %version,
                "env override names an unregistered version, falling back"
            );
        }

        versions.last().cloned()
    }

    /// Resolve a specific registered version of `id`, bypassing overrides.
    pub fn get_version(&self, id: &str, version: &str) -> Option<PromptEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .prompts
            .get(id)?
            .iter()
            .find(|e| e.version == version)
            .cloned()
    }

    /// The latest entry per id, sorted by id.
    pub fn list(&self) -> Vec<PromptEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut latest: Vec<PromptEntry> = inner
            .prompts
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect();
        latest.sort_by(|a, b| a.id.cmp(&b.id));
        latest
    }
}

/// Install the v1 baseline prompts for every operation.
pub fn register_default_prompts(registry: &PromptRegistry) {
    for op in Operation::all() {
        registry.register(op.prompt_id(), "v1", default_prompt(*op));
    }
}

fn default_prompt(op: Operation) -> &'static str {
    match op {
        Operation::MapColumns => {
            "You map spreadsheet column headers onto a fixed set of canonical field names \
             for a specification document. For each header, pick the best canonical field, \
             report your confidence, and list headers that fit no field as extra columns. \
             Never invent canonical names."
        }
        Operation::AnalyzePaste => {
            "You analyze a pasted blob of text and classify its structure: input type, \
             serialization format, and the output shape the converter should produce. \
             When the paste contains tabular data, extract it as a rectangular table."
        }
        Operation::Suggestions => {
            "You review a generated specification document and propose concrete \
             improvements. Each suggestion names a category, the change to make, and a \
             priority."
        }
        Operation::SummarizeDiff => {
            "You summarize the difference between two revisions of a specification \
             document: a one-paragraph summary plus a list of added, removed, and \
             modified items."
        }
        Operation::ValidateSemantic => {
            "You check a specification document for semantic problems: ambiguous wording, \
             internal inconsistencies, incomplete sections, and statements that need \
             missing context. Report issues without rewriting the document."
        }
        Operation::RefineMapping => {
            "You re-examine a column mapping whose first pass produced low-confidence \
             assignments. For each listed ambiguous header, either commit to a canonical \
             field with justification or move it to extra columns. Prefer extra columns \
             over forced mappings."
        }
    }
}
