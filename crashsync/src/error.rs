//! Domain error taxonomy.
//!
//! Referential problems (a relation pointing outside the loaded corpus) are
//! logged and skipped at the call site rather than surfaced here; malformed
//! version strings are filtered before comparison. What remains fatal is a
//! data-integrity violation on a tracker write, and external I/O failures,
//! which abort the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An issue selected for an in-place update is missing a signature
    /// custom field. Proceeding would corrupt tracker state, so the spec's
    /// update is aborted.
    #[error("issue {issue_id} has no {field} field, refusing to update")]
    MissingSignatureField { issue_id: i64, field: &'static str },

    /// The batch fetched zero pending specs; nothing to reconcile.
    #[error("no pending crash specs were fetched")]
    NoPendingSpecs,

    /// Another crashsync instance holds the run lock.
    #[error("run lock {path} is held by another instance")]
    AlreadyRunning { path: String },
}
