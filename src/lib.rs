//! sheetspec — the reliability and efficiency layer in front of a remote
//! LLM provider for spreadsheet-to-spec document conversion.
//!
//! The engine accepts a closed set of structured operations (map
//! spreadsheet headers to canonical fields, analyze a pasted blob,
//! propose improvements, summarize a diff, semantically validate a spec)
//! and, per call, decides whether to serve from the multi-tier cache,
//! reject on budget exhaustion, suppress via the circuit breaker,
//! dispatch to the primary provider, or fall back to a secondary — while
//! tracing cost, latency, tokens, confidence, and errors.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sheetspec::config::AiConfig;
//! use sheetspec::operation::MapColumnsRequest;
//! use sheetspec::service::AiService;
//! use sheetspec::testing::StubProvider;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), sheetspec::error::AiError> {
//! let service = AiService::new(
//!     AiConfig::resolve().expect("config"),
//!     vec![Arc::new(StubProvider::succeeding("{}"))],
//! )?;
//! let request = MapColumnsRequest {
//!     headers: vec!["ID".into(), "Title".into()],
//!     sample_rows: vec![],
//!     schema_type: "task_list".into(),
//!     language: "en".into(),
//! };
//! let mapping = service.map_columns(&request, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod abtest;
pub mod breaker;
pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod operation;
pub mod prompt;
pub mod safety;
pub mod service;
pub mod testing;
pub mod trace;
pub mod validate;

pub use error::{AiError, Error, Result};
pub use operation::Operation;
pub use service::AiService;

/// Initialize structured logging from `RUST_LOG` (default `info`).
///
/// Call once at startup; embedding applications that bring their own
/// subscriber should skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
