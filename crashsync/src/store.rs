//! Store layer interfaces and implementations.
//!
//! The reconciliation engine only ever sees these traits. `IssueStore` has
//! historically been backed either by the tracker's HTTP API or by a direct
//! read of its database; both backends present the same `IssueRecord`
//! contract and the engine never branches on backend identity.

pub mod memory;
pub mod sqlite;

use crate::types::{CrashSpec, ExtendedIssueEntry, IssueRecord, RelationType};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashSet;

/// Epoch date passed to [`IssueStore::fetch_all_since`] to force a
/// full-corpus fetch. New signatures must be searched against all issues,
/// not just a delta, so every run loads everything.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

/// IssueStore is the tracker-side collaborator: the issue corpus snapshot
/// and the write operations the reconciler applies.
pub trait IssueStore: Send + Sync {
    /// Full snapshot of issues updated since `since`, including relations
    /// and concatenated free text. Called once per run, with [`epoch`].
    fn fetch_all_since(&self, since: NaiveDate) -> Result<Vec<ExtendedIssueEntry>>;

    /// Names of statuses the tracker's status registry marks as closed.
    /// Fetched once per run; anything outside this set counts as open.
    fn closed_status_names(&self) -> Result<HashSet<String>>;

    /// Creates a new issue tagged with the given source and returns it.
    fn create_issue(
        &self,
        project_id: i64,
        subject: &str,
        description: &str,
        source_tag: &str,
    ) -> Result<IssueRecord>;

    /// Appends signatures and affected versions to an issue's fields, and
    /// optionally a journal note. Append-only union semantics: existing
    /// values are never removed, and values already present are not
    /// duplicated.
    fn update_issue(
        &self,
        issue_id: i64,
        sig_v1_add: &[String],
        sig_v2_add: &str,
        affected_versions_add: &[String],
        note: Option<&str>,
    ) -> Result<()>;

    /// Links two issues. Duplicate-relation and self-relation attempts are
    /// logged and swallowed rather than failing the run.
    fn add_relation(&self, from_id: i64, to_id: i64, relation_type: &RelationType) -> Result<()>;

    /// Heuristic routing of a crash to a tracker project, from the daemons
    /// that crashed and the backtrace frames. Black box to the engine.
    fn pick_project_for(&self, daemons: &[String], stack_names: &[String]) -> Result<i64>;
}

/// SpecStore is the telemetry-side collaborator: pending crash specs and
/// the per-spec bookkeeping the reconciler writes back.
pub trait SpecStore: Send + Sync {
    /// Pending crash specs in ascending id order, so reruns are
    /// deterministic.
    fn pending_specs(&self) -> Result<Vec<CrashSpec>>;

    /// Records the spec's tracked status and, when given, its main issue.
    fn record_status(
        &self,
        spec_id: i64,
        status_tag: &str,
        main_issue: Option<&IssueRecord>,
    ) -> Result<()>;

    /// (spec id, version) pairs already notified by previous runs.
    fn already_notified(&self) -> Result<HashSet<(i64, String)>>;

    /// Marks a (spec, version) pair as notified so later runs never
    /// re-notify it.
    fn record_notified(&self, spec_id: i64, version: &str) -> Result<()>;

    /// True when the spec's description note was already appended to the
    /// given issue by a previous run.
    fn description_added(&self, spec_id: i64, issue_id: i64) -> Result<bool>;

    fn record_description_added(&self, spec_id: i64, issue_id: i64) -> Result<()>;

    /// True when the term appears in the assert message or assert file of
    /// any crash event behind this spec. Case-insensitive; used by the
    /// heartbeat-map eligibility gate.
    fn crash_fields_contain(&self, spec_id: i64, term: &str) -> Result<bool>;

    /// Raw crash-dump sample of the spec's most recently reported event,
    /// embedded into generated issue descriptions.
    fn most_recent_crash_event(&self, spec_id: i64) -> Result<Option<serde_json::Value>>;
}
