//! Notification assembly and repeat-notification suppression.
//!
//! Per-major version diffs that do not warrant a new ticket are reported by
//! email instead. Each (spec, version) pair is notified at most once across
//! runs; the suppression set is persisted through the spec store.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::process::{Command, Stdio};

use crate::types::{CrashSpec, VersionMaxima};

/// Removes every version already notified for this spec and drops any
/// major whose list becomes empty. Idempotent: once the surviving versions
/// are recorded, a rerun filters everything out.
pub fn filter_notified(
    spec_id: i64,
    per_major: BTreeMap<String, Vec<String>>,
    already_notified: &HashSet<(i64, String)>,
) -> BTreeMap<String, Vec<String>> {
    per_major
        .into_iter()
        .filter_map(|(maj, versions)| {
            let kept: Vec<String> = versions
                .into_iter()
                .filter(|v| !already_notified.contains(&(spec_id, v.clone())))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some((maj, kept))
            }
        })
        .collect()
}

/// Message body fragment for the per-major versions that survived
/// filtering. Distinguishes an older major seen for the first time from a
/// newer minor of an already-recorded major.
pub fn per_major_message(
    per_major: &BTreeMap<String, Vec<String>>,
    maxima: &VersionMaxima,
) -> String {
    let mut text = String::new();
    for (maj, versions) in per_major {
        match maxima.per_major.get(maj) {
            None => {
                text.push_str(&format!(
                    "New crash events were reported via telemetry with an older major \
                     '{maj}' ({versions:?}) that is reported for the first time.\n"
                ));
            }
            Some(recorded_max) => {
                text.push_str(&format!(
                    "New crash events were reported via telemetry with newer versions \
                     ({versions:?}) than encountered in the tracker ({recorded_max}).\n"
                ));
            }
        }
    }
    text
}

/// Preamble for a newly opened ticket when telemetry reported versions
/// newer than anything recorded across the related issues.
pub fn new_issue_preamble(global_diff: &[String], maxima: &VersionMaxima) -> String {
    format!(
        "*New crash events were reported via telemetry with newer versions \
         ({:?}) than encountered in the tracker ({}).*\n",
        global_diff, maxima.global
    )
}

/// Tracker-issue and dashboard links appended to a notification fragment.
pub fn notification_links(
    tracker_issues_url: &str,
    dashboard_spec_url: &str,
    issue_id: i64,
    spec: &CrashSpec,
) -> String {
    format!(
        "See:\n{tracker_issues_url}{issue_id}\n{dashboard_spec_url}{}\n\n",
        spec.sig_v2_hex()
    )
}

/// Outbound email delivery. One send per run, if any text accumulated.
pub trait Notifier: Send + Sync {
    fn send(&self, body: &str) -> Result<()>;
}

/// Sends mail by piping a composed message through the local sendmail
/// binary.
pub struct SendmailNotifier {
    pub from: String,
    pub to: String,
    pub subject: String,
}

impl Notifier for SendmailNotifier {
    fn send(&self, body: &str) -> Result<()> {
        let mut child = Command::new("/usr/sbin/sendmail")
            .arg("-t")
            .stdin(Stdio::piped())
            .spawn()
            .context("failed to spawn sendmail")?;

        let message = format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.from, self.to, self.subject, body
        );
        child
            .stdin
            .take()
            .context("sendmail stdin unavailable")?
            .write_all(message.as_bytes())
            .context("failed to write message to sendmail")?;

        let status = child.wait().context("failed to wait for sendmail")?;
        if !status.success() {
            anyhow::bail!("sendmail exited with {status}");
        }
        log::info!("  sent notification email to {}", self.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn per_major(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(maj, vs)| {
                (
                    maj.to_string(),
                    vs.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn filter_drops_notified_versions_and_empty_majors() {
        let diff = per_major(&[("15", &["15.2.4", "15.2.5"]), ("16", &["16.2.8"])]);
        let notified: HashSet<(i64, String)> =
            [(7, "15.2.4".to_string()), (7, "16.2.8".to_string())].into();

        let kept = filter_notified(7, diff, &notified);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("15").unwrap(), &vec!["15.2.5"]);
    }

    #[test]
    fn filter_only_suppresses_the_matching_spec() {
        let diff = per_major(&[("15", &["15.2.4"])]);
        let notified: HashSet<(i64, String)> = [(99, "15.2.4".to_string())].into();
        let kept = filter_notified(7, diff, &notified);
        assert_eq!(kept.get("15").unwrap(), &vec!["15.2.4"]);
    }

    #[test]
    fn filter_is_idempotent_across_runs() {
        let diff = per_major(&[("15", &["15.2.4", "15.2.5"])]);
        let mut notified = HashSet::new();

        let first = filter_notified(7, diff.clone(), &notified);
        for versions in first.values() {
            for v in versions {
                notified.insert((7, v.clone()));
            }
        }
        let second = filter_notified(7, diff, &notified);
        assert!(second.is_empty());
    }

    #[test]
    fn message_distinguishes_first_time_majors() {
        let maxima = crate::types::VersionMaxima {
            global: "16.2.2".into(),
            per_major: [("16".to_string(), "16.2.2".to_string())].into(),
        };
        let diff = per_major(&[("15", &["15.2.4"]), ("16", &["16.2.8"])]);
        let text = per_major_message(&diff, &maxima);
        assert!(text.contains("older major '15'"));
        assert!(text.contains("reported for the first time"));
        assert!(text.contains("than encountered in the tracker (16.2.2)"));
    }
}
