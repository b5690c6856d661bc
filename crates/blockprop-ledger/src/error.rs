//! Error types for blockprop-ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur while mutating a ledger.
///
/// Every variant signals a broken invariant, never a transient condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Canonicalization kept rewriting the tree past the pass ceiling.
    #[error("ledger canonicalization did not settle after {passes} passes")]
    TidyDiverged { passes: usize },
}
