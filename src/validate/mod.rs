//! Structured-output validation.
//!
//! Outputs are checked before they are cached or returned: the mapping
//! and paste validators enforce hard invariants (failures are permanent
//! and never cached), while the semantic pass raises advisory issues
//! without failing.

mod mapping;
mod paste;
mod semantic;

pub use mapping::validate_mapping;
pub use paste::validate_paste;
pub use semantic::semantic_issues;
