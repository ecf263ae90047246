//! LLM provider abstraction and delivery stack.
//!
//! The only process boundary is the [`Provider`] trait. Reliability
//! concerns are layered as decorators, each implementing `Provider`
//! itself so they compose freely:
//!
//! ```text
//! FallbackChain
//!   ├── CheckedProvider ── RetryProvider ── primary
//!   └── CheckedProvider ── RetryProvider ── secondary
//! ```
//!
//! [`CheckedProvider`] gates finish reasons and validates structured
//! output (with bounded corrective re-queries); [`RetryProvider`] retries
//! transient failures with jittered exponential backoff; the
//! [`FallbackChain`] advances to the next provider on any non-permanent
//! failure and stops immediately on permanent ones.

mod chain;
mod checked;
pub mod classify;
mod provider;
mod retry;

pub use chain::FallbackChain;
pub use checked::CheckedProvider;
pub use classify::{Classification, ErrorCategory, classify};
pub use provider::{FinishReason, Provider, StructuredRequest, StructuredResponse};
pub use retry::{RetryConfig, RetryProvider};
