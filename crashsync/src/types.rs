//! Core data structures for the crashsync reconciliation engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// CrashSpec is one distinct crash fingerprint plus its aggregate metadata,
/// as reported by the telemetry pipeline. Read-only input for a run.
#[derive(Debug, Clone)]
pub struct CrashSpec {
    pub id: i64,
    /// Legacy client-derived signatures. May be empty.
    pub sig_v1: Vec<String>,
    /// Authoritative backend-derived signature, a fixed-length binary digest.
    /// Always present for specs entering reconciliation.
    pub sig_v2: Vec<u8>,
    /// Ordered, sanitized backtrace frame identifiers.
    pub stack_names: Vec<String>,
    pub assert_func: Option<String>,
    pub assert_condition: Option<String>,
    /// Affected major release strings; may contain malformed entries
    /// until sanitized.
    pub majors_affected: Vec<String>,
    /// Affected dotted versions; may contain malformed entries until
    /// sanitized.
    pub minors_affected: Vec<String>,
    /// Daemon process names observed crashing.
    pub daemons: Vec<String>,
    /// Status tag recorded for this spec by a previous run, if any.
    pub prior_status: Option<String>,
}

impl CrashSpec {
    /// Hex rendering of the authoritative signature, the form it takes in
    /// tracker custom fields and free text.
    pub fn sig_v2_hex(&self) -> String {
        hex::encode(&self.sig_v2)
    }
}

pub const TRACKER_TYPE_BUG: &str = "Bug";
pub const TRACKER_TYPE_BACKPORT: &str = "Backport";

/// IssueRecord is the canonical view of a tracker issue, regardless of
/// whether it was loaded through the tracker API or by direct database read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: i64,
    pub subject: String,
    /// Date the issue was last updated. Monotonic per issue, even across
    /// note edits and deletions.
    pub updated_on: NaiveDate,
    pub status: String,
    /// Tracker type name, e.g. "Bug" or "Backport".
    pub tracker_type: String,
    /// Target version, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub affected_versions: Vec<String>,
    /// Crash signature custom fields. Newline-separated when holding more
    /// than one signature. None when the field was never populated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig_v1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig_v2: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relations: Vec<Relation>,
}

impl IssueRecord {
    pub fn is_backport(&self) -> bool {
        self.tracker_type == TRACKER_TYPE_BACKPORT
    }

    /// All versions this issue records: the target version, if present,
    /// plus the affected-versions field.
    pub fn affected_and_target_versions(&self) -> Vec<String> {
        let mut versions = Vec::new();
        if let Some(ref fixed) = self.fixed_version {
            versions.push(fixed.clone());
        }
        versions.extend(self.affected_versions.iter().cloned());
        versions
    }
}

/// Relation between two tracker issues, directed from `from_id` to `to_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from_id: i64,
    pub to_id: i64,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
}

/// RelationType categorizes the link between two issues.
///
/// `Duplicates` points from a duplicate to its canonical original;
/// `CopiedTo` points from an original to its backport. `Relates` marks a
/// different, merely associated bug and is never followed when gathering
/// equivalent issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    Duplicates,
    CopiedTo,
    Relates,
    Other(String),
}

impl RelationType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::Duplicates => "duplicates",
            RelationType::CopiedTo => "copied_to",
            RelationType::Relates => "relates",
            RelationType::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "duplicates" => RelationType::Duplicates,
            "copied_to" => RelationType::CopiedTo,
            "relates" => RelationType::Relates,
            other => RelationType::Other(other.to_string()),
        }
    }

    /// True for the relation kinds followed when expanding a found-issue
    /// set to its canonical originals and backports.
    pub fn is_equivalence(&self) -> bool {
        matches!(self, RelationType::Duplicates | RelationType::CopiedTo)
    }
}

impl From<String> for RelationType {
    fn from(s: String) -> Self {
        RelationType::parse(&s)
    }
}

impl From<RelationType> for String {
    fn from(r: RelationType) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ExtendedIssueEntry is an IssueRecord plus its precomputed searchable
/// text (description and journal notes, concatenated). Built once at
/// corpus-load time and never mutated within a run.
#[derive(Debug, Clone)]
pub struct ExtendedIssueEntry {
    pub issue: IssueRecord,
    pub text: String,
}

/// Action selected for a spec by the reconciliation decider. Transient;
/// exactly one is chosen per spec per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Notify,
    OpenNew,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Notify => "notify",
            Action::OpenNew => "open-new",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a spec was ignored before reaching signature search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Heartbeat-map marker present in the spec's status, stack, or assert
    /// text. Not a bug.
    HeartbeatMap,
    /// No valid major or minor version data remained after sanitizing.
    NotApplicable,
    /// Every affected major is below the minimum supported major.
    Eol,
}

impl IgnoreReason {
    /// Status tag recorded for the spec in the telemetry store.
    pub fn status_tag(&self) -> &'static str {
        match self {
            IgnoreReason::HeartbeatMap => "HeartbeatMap",
            IgnoreReason::NotApplicable => "NA",
            IgnoreReason::Eol => "EOL",
        }
    }
}

/// Per-spec state reached by the reconciliation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecState {
    Ignored(IgnoreReason),
    NoIssuesFound,
    OpenIssueFound,
    AllClosedNotBug,
    AllClosedSomeBug,
}

/// Newest versions recorded across a spec's related issues: the absolute
/// newest, and the newest per major release. Recomputed per spec; the
/// related-issue set differs per spec so this is never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMaxima {
    pub global: String,
    pub per_major: BTreeMap<String, String>,
}

/// Status recorded for a spec when only backports remain among its related
/// issues and no non-backport issue can supply a status.
pub const CLOSED_STATUS_SENTINEL: &str = "Closed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_type_round_trips_through_names() {
        for name in ["duplicates", "copied_to", "relates", "blocks"] {
            assert_eq!(RelationType::parse(name).as_str(), name);
        }
    }

    #[test]
    fn only_duplicates_and_copied_to_are_equivalence_relations() {
        assert!(RelationType::Duplicates.is_equivalence());
        assert!(RelationType::CopiedTo.is_equivalence());
        assert!(!RelationType::Relates.is_equivalence());
        assert!(!RelationType::Other("blocks".into()).is_equivalence());
    }

    #[test]
    fn affected_and_target_versions_includes_fixed_version() {
        let issue = IssueRecord {
            id: 1,
            subject: "crash: frame".into(),
            updated_on: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            status: "Resolved".into(),
            tracker_type: TRACKER_TYPE_BUG.into(),
            fixed_version: Some("16.2.7".into()),
            affected_versions: vec!["16.2.5".into(), "15.2.4".into()],
            sig_v1: None,
            sig_v2: None,
            relations: vec![],
        };
        assert_eq!(
            issue.affected_and_target_versions(),
            vec!["16.2.7", "16.2.5", "15.2.4"]
        );
    }
}
