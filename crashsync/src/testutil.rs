//! Shared fixtures for unit tests.

use chrono::NaiveDate;

use crate::types::{CrashSpec, ExtendedIssueEntry, IssueRecord, TRACKER_TYPE_BUG};

/// A spec that passes every eligibility gate and carries one supported
/// affected version. Tests override fields as needed.
pub(crate) fn spec_fixture(id: i64) -> CrashSpec {
    CrashSpec {
        id,
        sig_v1: Vec::new(),
        sig_v2: vec![id as u8; 8],
        stack_names: vec!["OSD::do_recovery".into(), "PrimaryLogPG::on_failure".into()],
        assert_func: None,
        assert_condition: None,
        majors_affected: vec!["16".into()],
        minors_affected: vec!["16.2.0".into()],
        daemons: vec!["ceph-osd".into()],
        prior_status: None,
    }
}

/// An open bug issue with no signature fields populated. Does not match
/// any spec until a test sets a signature field or text.
pub(crate) fn issue_fixture(id: i64) -> IssueRecord {
    IssueRecord {
        id,
        subject: format!("crash: frame_{id}"),
        updated_on: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        status: "New".into(),
        tracker_type: TRACKER_TYPE_BUG.into(),
        fixed_version: None,
        affected_versions: Vec::new(),
        sig_v1: None,
        sig_v2: None,
        relations: Vec::new(),
    }
}

pub(crate) fn entry_fixture(issue: IssueRecord, text: &str) -> ExtendedIssueEntry {
    ExtendedIssueEntry {
        issue,
        text: text.to_string(),
    }
}
