//! The reconciler: sequences the decision engine over the pending spec
//! batch and applies the resulting actions against the stores.
//!
//! Strictly sequential; one run processes the whole batch against a single
//! corpus snapshot. Store mutations are committed per spec, immediately
//! after that spec's decision is finalized, so a crash mid-run loses only
//! the in-progress spec. Notification text accumulates across the batch
//! and is sent as exactly one email at the end.

use anyhow::{Context, Result};
use std::time::Instant;

use crate::config::SyncConfig;
use crate::corpus::IssueCorpusIndex;
use crate::decide::{Decider, Decision};
use crate::error::SyncError;
use crate::notify::Notifier;
use crate::store::{self, IssueStore, SpecStore};
use crate::types::{Action, CrashSpec, IssueRecord, RelationType, SpecState};
use crate::version;

/// Source tag stamped on issues the reconciler creates.
const SOURCE_TAG: &str = "Telemetry";

/// Counts of what a run did, for the end-of-run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub processed: usize,
    pub ignored: usize,
    pub updated: usize,
    pub opened: usize,
    pub notified: usize,
    pub unchanged: usize,
}

pub struct Reconciler<'a> {
    pub issue_store: &'a dyn IssueStore,
    pub spec_store: &'a dyn SpecStore,
    pub notifier: &'a dyn Notifier,
    pub config: &'a SyncConfig,
    /// When set, every decision is logged exactly as it would be applied,
    /// but no external mutation occurs.
    pub dry_run: bool,
}

impl<'a> Reconciler<'a> {
    /// Runs one full reconciliation batch.
    pub fn run(&self) -> Result<RunStats> {
        let started = Instant::now();

        let closed_statuses = self
            .issue_store
            .closed_status_names()
            .context("failed to fetch closed status names")?;
        let snapshot = self
            .issue_store
            .fetch_all_since(store::epoch())
            .context("failed to fetch issue snapshot")?;
        let corpus = IssueCorpusIndex::build(snapshot);
        log::info!("loaded {} issues into the corpus index", corpus.len());

        let already_notified = self.spec_store.already_notified()?;
        let specs = self.spec_store.pending_specs()?;
        if specs.is_empty() {
            return Err(SyncError::NoPendingSpecs.into());
        }
        log::info!("processing {} specs", specs.len());

        let decider = Decider {
            corpus: &corpus,
            spec_store: self.spec_store,
            closed_statuses: &closed_statuses,
            already_notified: &already_notified,
            min_supported_major: self.config.min_supported_major,
            tracker_issues_url: &self.config.tracker_issues_url,
            dashboard_spec_url: &self.config.dashboard_spec_url,
        };

        let mut stats = RunStats::default();
        let mut email_body = String::new();
        for mut spec in specs {
            log::info!("handle spec {}", spec.id);
            version::sanitize_spec_versions(&mut spec);
            let decision = decider.decide(&spec)?;
            self.apply(&spec, &decision, &mut email_body, &mut stats)?;
            stats.processed += 1;
        }

        if !email_body.is_empty() {
            if self.dry_run {
                log::info!("DRY send email:\n{email_body}");
            } else {
                self.notifier.send(&email_body)?;
            }
        }

        log::info!(
            "run finished in {} seconds",
            started.elapsed().as_secs()
        );
        Ok(stats)
    }

    /// Applies one spec's decision: the status mirror, the chosen action,
    /// and the notification bookkeeping.
    fn apply(
        &self,
        spec: &CrashSpec,
        decision: &Decision,
        email_body: &mut String,
        stats: &mut RunStats,
    ) -> Result<()> {
        match decision.state {
            SpecState::Ignored(_) => stats.ignored += 1,
            SpecState::OpenIssueFound => stats.updated += 1,
            _ => match decision.action {
                Action::OpenNew => stats.opened += 1,
                Action::Notify => stats.notified += 1,
                Action::None => stats.unchanged += 1,
            },
        }

        if decision.state == SpecState::OpenIssueFound {
            if let Some(main) = &decision.main_issue {
                self.update_main_issue(spec, main)?;
            }
        }

        match decision.action {
            Action::OpenNew => self.open_new_issue(spec, decision)?,
            Action::Notify => {
                email_body.push_str(&decision.email_fragment);
                for ver in &decision.notify_versions {
                    if self.dry_run {
                        log::info!("DRY record notified: spec {} version {ver}", spec.id);
                    } else {
                        self.spec_store.record_notified(spec.id, ver)?;
                    }
                }
            }
            Action::None => {}
        }

        // A newly opened ticket supplies the status itself; every other
        // path mirrors the decision's status tag.
        if decision.action != Action::OpenNew {
            if let Some((tag, source)) = &decision.record_status {
                self.record_status(spec.id, tag, source.as_ref())?;
            }
        }
        Ok(())
    }

    /// Appends the spec's signatures and versions to the open main issue,
    /// plus its description note the first time around.
    fn update_main_issue(&self, spec: &CrashSpec, main: &IssueRecord) -> Result<()> {
        // An issue missing its signature fields cannot be safely appended
        // to; silently proceeding would corrupt tracker state.
        if main.sig_v2.is_none() {
            return Err(SyncError::MissingSignatureField {
                issue_id: main.id,
                field: "sig_v2",
            }
            .into());
        }
        if main.sig_v1.is_none() {
            return Err(SyncError::MissingSignatureField {
                issue_id: main.id,
                field: "sig_v1",
            }
            .into());
        }

        let note = if self.spec_store.description_added(spec.id, main.id)? {
            None
        } else {
            log::debug!("  adding spec description to issue {} notes", main.id);
            Some(self.compose_description(spec, "")?)
        };

        if self.dry_run {
            log::info!(
                "DRY update issue {}: append sig_v2 {}, sig_v1 {:?}, versions {:?}, note: {}",
                main.id,
                spec.sig_v2_hex(),
                spec.sig_v1,
                spec.minors_affected,
                note.is_some(),
            );
            return Ok(());
        }

        self.issue_store.update_issue(
            main.id,
            &spec.sig_v1,
            &spec.sig_v2_hex(),
            &spec.minors_affected,
            note.as_deref(),
        )?;
        if note.is_some() {
            self.spec_store.record_description_added(spec.id, main.id)?;
        }
        Ok(())
    }

    /// Creates a new ticket for the spec and links every related issue to
    /// it with a "relates" relation. "duplicates" and "copied_to" stay
    /// reserved for tracker-curated canonicalization.
    fn open_new_issue(&self, spec: &CrashSpec, decision: &Decision) -> Result<()> {
        let project_id = self
            .issue_store
            .pick_project_for(&spec.daemons, &spec.stack_names)?;
        let subject = compose_subject(spec);
        let description = self.compose_description(spec, &decision.new_issue_preamble)?;

        if self.dry_run {
            log::info!("DRY create issue:");
            log::info!("DRY   project_id={project_id}");
            log::info!("DRY   subject={subject}");
            log::info!("DRY   description=\n{description}");
            log::info!(
                "DRY   relate to issues {:?}",
                decision.related.iter().map(|i| i.id).collect::<Vec<_>>()
            );
            return Ok(());
        }

        let created = self
            .issue_store
            .create_issue(project_id, &subject, &description, SOURCE_TAG)?;
        log::info!("    created issue {}: {}", created.id, created.subject);

        self.issue_store.update_issue(
            created.id,
            &spec.sig_v1,
            &spec.sig_v2_hex(),
            &spec.minors_affected,
            None,
        )?;
        self.spec_store
            .record_description_added(spec.id, created.id)?;
        for related in &decision.related {
            self.issue_store
                .add_relation(created.id, related.id, &RelationType::Relates)?;
        }
        self.record_status(spec.id, &created.status, Some(&created))?;
        Ok(())
    }

    fn record_status(
        &self,
        spec_id: i64,
        tag: &str,
        source: Option<&IssueRecord>,
    ) -> Result<()> {
        if self.dry_run {
            log::info!(
                "DRY record status: spec {spec_id} -> {tag} (issue {:?})",
                source.map(|i| i.id)
            );
            return Ok(());
        }
        self.spec_store.record_status(spec_id, tag, source)
    }

    /// Issue description: preamble, dashboard link, assert info, sanitized
    /// backtrace, and a pretty-printed sample of the most recent crash
    /// event.
    fn compose_description(&self, spec: &CrashSpec, preamble: &str) -> Result<String> {
        let mut desc = String::from("\n");
        if !preamble.is_empty() {
            desc.push_str(preamble);
            desc.push('\n');
        }
        desc.push_str(&format!(
            "{}{}\n",
            self.config.dashboard_spec_url,
            spec.sig_v2_hex()
        ));
        if let Some(ref func) = spec.assert_func {
            // assert_condition accompanies assert_func whenever present
            if let Some(ref cond) = spec.assert_condition {
                desc.push_str(&format!("\nAssert condition: {cond}\n"));
            }
            desc.push_str(&format!("Assert function: {func}\n"));
        }
        desc.push_str("\nSanitized backtrace:\n<pre>");
        for frame in &spec.stack_names {
            desc.push_str(&format!("    {frame}\n"));
        }
        desc.push_str("</pre>");
        if let Some(event) = self.spec_store.most_recent_crash_event(spec.id)? {
            desc.push_str("\nCrash dump sample:\n<pre>");
            desc.push_str(&serde_json::to_string_pretty(&event)?);
            desc.push_str("</pre>");
        }
        Ok(desc)
    }
}

/// Issue subject: the assert site when one exists, otherwise the top
/// backtrace frame. Truncated to the tracker's 255-character limit.
pub fn compose_subject(spec: &CrashSpec) -> String {
    let mut subject = String::from("crash: ");
    if let Some(ref func) = spec.assert_func {
        subject.push_str(func);
        subject.push_str(": ");
        match spec.assert_condition.as_deref() {
            Some("abort") => subject.push_str("abort"),
            Some(cond) => subject.push_str(&format!("assert({cond})")),
            None => {}
        }
    } else if let Some(frame) = spec.stack_names.first() {
        subject.push_str(frame);
    }
    subject.chars().take(255).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spec_fixture;

    #[test]
    fn subject_prefers_the_assert_site() {
        let mut spec = spec_fixture(1);
        spec.assert_func = Some("PeeringState::proc_replica_log".into());
        spec.assert_condition = Some("info.last_update <= last".into());
        assert_eq!(
            compose_subject(&spec),
            "crash: PeeringState::proc_replica_log: assert(info.last_update <= last)"
        );
    }

    #[test]
    fn subject_spells_out_aborts() {
        let mut spec = spec_fixture(1);
        spec.assert_func = Some("BlueFS::_flush_range".into());
        spec.assert_condition = Some("abort".into());
        assert_eq!(compose_subject(&spec), "crash: BlueFS::_flush_range: abort");
    }

    #[test]
    fn subject_falls_back_to_the_top_frame() {
        let spec = spec_fixture(1);
        assert_eq!(compose_subject(&spec), "crash: OSD::do_recovery");
    }

    #[test]
    fn subject_is_truncated_to_255_chars() {
        let mut spec = spec_fixture(1);
        spec.assert_func = Some("f".repeat(400));
        assert_eq!(compose_subject(&spec).chars().count(), 255);
    }
}
