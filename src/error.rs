//! Error types for the orchestration core.
//!
//! The distinction that matters here is transient vs. routine:
//!
//! - **Transient persistence failures** (statement timeouts and similar) occur
//!   mid-transaction. The surrounding operation rolls back completely and the
//!   caller receives a structured failure result, never the raw error.
//! - Strategy unavailability is *not* an error; it is a routine negative
//!   predicate result (`available_for` returning false) and is modeled as
//!   ordinary outcome enums in [`crate::strategies`].

use thiserror::Error;

/// A transient failure while persisting a state change.
///
/// These are the only errors the strategy adapters catch. Anything else
/// propagates to the caller's own retry handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// A database statement exceeded its time budget.
    #[error("statement timeout while persisting {context}")]
    StatementTimeout {
        /// What was being persisted (e.g. "system note").
        context: String,
    },

    /// The query was canceled by the executor (e.g. connection reset).
    #[error("query canceled while persisting {context}")]
    QueryCanceled {
        /// What was being persisted.
        context: String,
    },
}

impl PersistenceError {
    /// Creates a statement-timeout error with the given context.
    pub fn statement_timeout(context: impl Into<String>) -> Self {
        PersistenceError::StatementTimeout {
            context: context.into(),
        }
    }

    /// Returns true if retrying the whole operation later may succeed.
    ///
    /// All variants are currently transient; the method exists so call sites
    /// read as intent rather than as an exhaustiveness artifact.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PersistenceError::StatementTimeout { .. } | PersistenceError::QueryCanceled { .. }
        )
    }
}
