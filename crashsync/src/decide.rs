//! The reconciliation decider.
//!
//! Given a sanitized crash spec and the run's issue-corpus snapshot, walks
//! the policy state machine and produces a [`Decision`]: the state reached,
//! the action to take, and everything the orchestrator needs to apply it.
//! The decider reads collaborator state but performs no external mutation
//! itself; applying the decision is the orchestrator's job.

use anyhow::Result;
use std::collections::HashSet;

use crate::corpus::IssueCorpusIndex;
use crate::diff;
use crate::notify;
use crate::status;
use crate::store::SpecStore;
use crate::types::{
    Action, CrashSpec, IgnoreReason, IssueRecord, SpecState, CLOSED_STATUS_SENTINEL,
};

const HEARTBEAT_MARKER: &str = "HeartbeatMap";

/// Everything the orchestrator needs to apply a spec's reconciliation.
#[derive(Debug, Clone)]
pub struct Decision {
    pub state: SpecState,
    pub action: Action,
    /// Open issue to update in place, when the state is `OpenIssueFound`.
    pub main_issue: Option<IssueRecord>,
    /// Status tag to mirror into the spec store, with the issue it came
    /// from when one exists.
    pub record_status: Option<(String, Option<IssueRecord>)>,
    /// Issues related to the spec; a newly opened ticket is linked to each.
    pub related: Vec<IssueRecord>,
    /// Description preamble for a newly opened ticket.
    pub new_issue_preamble: String,
    /// Fragment to append to the run's notification email.
    pub email_fragment: String,
    /// Versions to record as notified once the decision is applied.
    pub notify_versions: Vec<String>,
}

impl Decision {
    fn ignored(reason: IgnoreReason) -> Self {
        Decision {
            state: SpecState::Ignored(reason),
            action: Action::None,
            main_issue: None,
            record_status: Some((reason.status_tag().to_string(), None)),
            related: Vec::new(),
            new_issue_preamble: String::new(),
            email_fragment: String::new(),
            notify_versions: Vec::new(),
        }
    }

    fn with_state(state: SpecState) -> Self {
        Decision {
            state,
            action: Action::None,
            main_issue: None,
            record_status: None,
            related: Vec::new(),
            new_issue_preamble: String::new(),
            email_fragment: String::new(),
            notify_versions: Vec::new(),
        }
    }
}

/// Per-run decision engine. Holds the immutable corpus snapshot and the
/// externally fetched closed-status and already-notified sets.
pub struct Decider<'a> {
    pub corpus: &'a IssueCorpusIndex,
    pub spec_store: &'a dyn SpecStore,
    pub closed_statuses: &'a HashSet<String>,
    pub already_notified: &'a HashSet<(i64, String)>,
    pub min_supported_major: u32,
    pub tracker_issues_url: &'a str,
    pub dashboard_spec_url: &'a str,
}

impl<'a> Decider<'a> {
    /// Runs the state machine for one spec. The spec must already be
    /// version-sanitized.
    pub fn decide(&self, spec: &CrashSpec) -> Result<Decision> {
        if let Some(reason) = self.ignore_reason(spec)? {
            log::info!("   spec {} ignored: {}", spec.id, reason.status_tag());
            return Ok(Decision::ignored(reason));
        }

        let related = self.corpus.related_issues(spec);
        log::debug!("  found {} related issues", related.len());
        for issue in &related {
            log::debug!("    {} {}", issue.id, issue.subject);
        }

        if related.is_empty() {
            log::info!("  no issues found");
            let mut decision = Decision::with_state(SpecState::NoIssuesFound);
            decision.action = Action::OpenNew;
            return Ok(decision);
        }

        if related
            .iter()
            .all(|i| i.is_backport() || i.status == "Duplicate")
        {
            log::error!("  all related issues are either backports or duplicates");
        }

        if let Some(main) = self.find_main_issue(&related, false) {
            log::info!("  found main issue: {}", main.id);
            let mut decision = Decision::with_state(SpecState::OpenIssueFound);
            decision.main_issue = Some(main.clone());
            decision.record_status = Some((main.status.clone(), Some(main.clone())));
            decision.related = related.into_iter().cloned().collect();
            return Ok(decision);
        }
        log::info!("  no open main issue found");

        if related
            .iter()
            .all(|i| i.is_backport() || status::is_not_a_bug(&i.status))
        {
            // Nothing to open: every related issue is a backport or was
            // closed as not-a-bug. The spec still mirrors the status of the
            // most recently updated non-backport issue, or the sentinel if
            // only backports remain.
            log::debug!("  all related issues are backports or classified not-a-bug");
            let last_closed = self.find_main_issue(&related, true);
            let tag = last_closed
                .map(|i| i.status.clone())
                .unwrap_or_else(|| CLOSED_STATUS_SENTINEL.to_string());
            let mut decision = Decision::with_state(SpecState::AllClosedNotBug);
            decision.record_status = Some((tag, last_closed.cloned()));
            decision.related = related.into_iter().cloned().collect();
            return Ok(decision);
        }

        // All related issues are closed, and at least one of them was
        // closed as a genuine bug. Delegate to the version-diff
        // sub-decision.
        let bug_closed: Vec<i64> = related
            .iter()
            .filter(|i| !i.is_backport() && status::is_bug(&i.status))
            .map(|i| i.id)
            .collect();
        log::debug!("  issues closed as genuine bugs: {bug_closed:?}");
        self.decide_closed_bug(spec, related)
    }

    /// Sub-decision for the `AllClosedSomeBug` state: compare the spec's
    /// observed versions with everything recorded across the related
    /// issues, then open a ticket, notify, or do nothing.
    fn decide_closed_bug(&self, spec: &CrashSpec, related: Vec<&IssueRecord>) -> Result<Decision> {
        let maxima = diff::affected_maxima(&related);
        log::debug!(
            "  related-issue versions: global_max={} per_major={:?}",
            maxima.global,
            maxima.per_major
        );
        let delta = diff::diff(spec, &maxima, self.min_supported_major);
        log::debug!(
            "  version diff: global={:?} per_major={:?}",
            delta.global,
            delta.per_major
        );

        let mut decision = Decision::with_state(SpecState::AllClosedSomeBug);
        decision.related = related.iter().map(|i| (*i).clone()).collect();

        if !delta.global.is_empty() {
            // A genuinely new occurrence on a newer release than ever
            // recorded: open a new ticket and link the closed ones.
            decision.action = Action::OpenNew;
            decision.new_issue_preamble = notify::new_issue_preamble(&delta.global, &maxima);
            return Ok(decision);
        }

        let per_major = notify::filter_notified(spec.id, delta.per_major, self.already_notified);
        if per_major.is_empty() {
            log::debug!("  no versions left to notify about");
            return Ok(decision);
        }

        decision.action = Action::Notify;
        decision.notify_versions = per_major.values().flatten().cloned().collect();

        let mut fragment = notify::per_major_message(&per_major, &maxima);
        let last_closed = self.find_main_issue(&related, true);
        let tag = last_closed
            .map(|i| i.status.clone())
            .unwrap_or_else(|| CLOSED_STATUS_SENTINEL.to_string());
        if let Some(issue) = last_closed {
            fragment.push_str(&notify::notification_links(
                self.tracker_issues_url,
                self.dashboard_spec_url,
                issue.id,
                spec,
            ));
        }
        decision.record_status = Some((tag, last_closed.cloned()));
        decision.email_fragment = fragment;
        Ok(decision)
    }

    /// Eligibility gates, checked before any signature search.
    fn ignore_reason(&self, spec: &CrashSpec) -> Result<Option<IgnoreReason>> {
        if self.is_heartbeat_map(spec)? {
            return Ok(Some(IgnoreReason::HeartbeatMap));
        }
        if spec.majors_affected.is_empty() {
            log::info!("   missing majors affected, or all versions are development versions");
            return Ok(Some(IgnoreReason::NotApplicable));
        }
        let newest_major = spec
            .majors_affected
            .iter()
            .filter_map(|m| m.parse::<u32>().ok())
            .max();
        match newest_major {
            Some(major) if major < self.min_supported_major => {
                return Ok(Some(IgnoreReason::Eol));
            }
            None => return Ok(Some(IgnoreReason::NotApplicable)),
            _ => {}
        }
        if spec.minors_affected.is_empty() {
            log::info!("   missing minors affected, or all versions are development versions");
            return Ok(Some(IgnoreReason::NotApplicable));
        }
        Ok(None)
    }

    /// Heartbeat-map crashes are watchdog timeouts, not bugs. The marker
    /// can appear in a previously recorded status, a backtrace frame, the
    /// assert function, or only in the crash events' assert text.
    fn is_heartbeat_map(&self, spec: &CrashSpec) -> Result<bool> {
        if spec.prior_status.as_deref() == Some(HEARTBEAT_MARKER) {
            log::debug!("  spec {} was already tagged HeartbeatMap", spec.id);
            return Ok(true);
        }
        if spec.stack_names.iter().any(|f| f.contains(HEARTBEAT_MARKER)) {
            log::debug!("  heartbeat marker found in backtrace");
            return Ok(true);
        }
        if spec
            .assert_func
            .as_deref()
            .is_some_and(|f| f.contains(HEARTBEAT_MARKER))
        {
            log::debug!("  heartbeat marker found in assert_func");
            return Ok(true);
        }
        if self
            .spec_store
            .crash_fields_contain(spec.id, "heartbeatmap")?
        {
            log::debug!("  heartbeat marker found in assert_msg or assert_file");
            return Ok(true);
        }
        Ok(false)
    }

    /// The issue that best represents the spec: most recently updated,
    /// not a backport, and open unless `include_closed`.
    ///
    /// Issues sharing an `updated_on` date have no defined secondary
    /// ordering; the stable sort keeps their incoming order and the first
    /// wins.
    fn find_main_issue<'r>(
        &self,
        related: &[&'r IssueRecord],
        include_closed: bool,
    ) -> Option<&'r IssueRecord> {
        let mut by_recency: Vec<&IssueRecord> = related.to_vec();
        by_recency.sort_by(|a, b| b.updated_on.cmp(&a.updated_on));
        by_recency.into_iter().find(|i| {
            !i.is_backport() && (include_closed || status::is_open(&i.status, self.closed_statuses))
        })
    }
}
