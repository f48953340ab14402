//! In-memory store implementations.
//!
//! The memory backend serves two purposes: it is the second concrete
//! implementation behind the store traits (the engine never branches on
//! which backend it talks to), and it is what the test suites drive full
//! reconciliation runs against.

use crate::store::{IssueStore, SpecStore};
use crate::types::{CrashSpec, ExtendedIssueEntry, IssueRecord, Relation, RelationType};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Issue snapshot held in memory, mutated in place by reconciler writes.
#[derive(Default)]
pub struct MemoryIssueStore {
    state: Mutex<IssueState>,
    /// Project id returned by [`IssueStore::pick_project_for`]; the memory
    /// backend routes every crash to one project.
    pub default_project: i64,
    pub closed_statuses: HashSet<String>,
    /// Date stamped onto issues created through this store.
    pub today: Option<NaiveDate>,
}

#[derive(Default)]
struct IssueState {
    issues: BTreeMap<i64, ExtendedIssueEntry>,
    next_id: i64,
}

impl MemoryIssueStore {
    pub fn new(entries: Vec<ExtendedIssueEntry>) -> Self {
        let next_id = entries.iter().map(|e| e.issue.id).max().unwrap_or(0) + 1;
        MemoryIssueStore {
            state: Mutex::new(IssueState {
                issues: entries.into_iter().map(|e| (e.issue.id, e)).collect(),
                next_id,
            }),
            default_project: 1,
            closed_statuses: HashSet::new(),
            today: None,
        }
    }

    pub fn with_closed_statuses(mut self, names: &[&str]) -> Self {
        self.closed_statuses = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Snapshot of an issue's current state, for assertions.
    pub fn issue(&self, id: i64) -> Option<IssueRecord> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(&id)
            .map(|e| e.issue.clone())
    }

    pub fn issue_count(&self) -> usize {
        self.state.lock().unwrap().issues.len()
    }
}

impl IssueStore for MemoryIssueStore {
    fn fetch_all_since(&self, since: NaiveDate) -> Result<Vec<ExtendedIssueEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .issues
            .values()
            .filter(|e| e.issue.updated_on >= since)
            .cloned()
            .collect())
    }

    fn closed_status_names(&self) -> Result<HashSet<String>> {
        Ok(self.closed_statuses.clone())
    }

    fn create_issue(
        &self,
        _project_id: i64,
        subject: &str,
        description: &str,
        _source_tag: &str,
    ) -> Result<IssueRecord> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let issue = IssueRecord {
            id,
            subject: subject.to_string(),
            updated_on: self.today.unwrap_or_else(|| crate::store::epoch()),
            status: "New".to_string(),
            tracker_type: crate::types::TRACKER_TYPE_BUG.to_string(),
            fixed_version: None,
            affected_versions: Vec::new(),
            sig_v1: Some(String::new()),
            sig_v2: Some(String::new()),
            relations: Vec::new(),
        };
        state.issues.insert(
            id,
            ExtendedIssueEntry {
                issue: issue.clone(),
                text: format!("{description}\n"),
            },
        );
        Ok(issue)
    }

    fn update_issue(
        &self,
        issue_id: i64,
        sig_v1_add: &[String],
        sig_v2_add: &str,
        affected_versions_add: &[String],
        note: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .issues
            .get_mut(&issue_id)
            .ok_or_else(|| anyhow::anyhow!("issue {issue_id} not found"))?;
        if let Some(note) = note {
            entry.text.push_str(note);
            entry.text.push('\n');
        }
        let issue = &mut entry.issue;

        let v2 = issue.sig_v2.get_or_insert_with(String::new);
        if !sig_v2_add.is_empty() && !v2.contains(sig_v2_add) {
            append_line(v2, sig_v2_add);
        }
        let v1 = issue.sig_v1.get_or_insert_with(String::new);
        for sig in sig_v1_add {
            if !v1.contains(sig.as_str()) {
                append_line(v1, sig);
            }
        }
        for version in affected_versions_add {
            if !issue.affected_versions.contains(version) {
                issue.affected_versions.push(version.clone());
            }
        }
        Ok(())
    }

    fn add_relation(&self, from_id: i64, to_id: i64, relation_type: &RelationType) -> Result<()> {
        if from_id == to_id {
            log::warn!("  skipping self-relation on issue {from_id}");
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.issues.get_mut(&from_id) else {
            log::warn!("  relation source {from_id} not found");
            return Ok(());
        };
        let duplicate = entry
            .issue
            .relations
            .iter()
            .any(|r| r.to_id == to_id && r.relation_type == *relation_type);
        if duplicate {
            log::warn!("  skipping duplicate relation {from_id} -> {to_id}");
            return Ok(());
        }
        entry.issue.relations.push(Relation {
            from_id,
            to_id,
            relation_type: relation_type.clone(),
        });
        Ok(())
    }

    fn pick_project_for(&self, _daemons: &[String], _stack_names: &[String]) -> Result<i64> {
        Ok(self.default_project)
    }
}

fn append_line(field: &mut String, addition: &str) {
    if field.is_empty() {
        field.push_str(addition);
    } else {
        field.push('\n');
        field.push_str(addition);
    }
}

/// Telemetry-side bookkeeping held in memory.
#[derive(Default)]
pub struct MemorySpecStore {
    pub specs: Vec<CrashSpec>,
    /// Per-spec assert_msg/assert_file text probed by the heartbeat gate.
    pub crash_text: HashMap<i64, String>,
    pub crash_events: HashMap<i64, serde_json::Value>,
    statuses: Mutex<HashMap<i64, (String, Option<i64>)>>,
    notified: Mutex<HashSet<(i64, String)>>,
    descriptions: Mutex<HashSet<(i64, i64)>>,
}

impl MemorySpecStore {
    pub fn new(specs: Vec<CrashSpec>) -> Self {
        MemorySpecStore {
            specs,
            ..Default::default()
        }
    }

    /// Recorded (status tag, main issue id) for a spec, for assertions.
    pub fn status_of(&self, spec_id: i64) -> Option<(String, Option<i64>)> {
        self.statuses.lock().unwrap().get(&spec_id).cloned()
    }

    pub fn notified_pairs(&self) -> HashSet<(i64, String)> {
        self.notified.lock().unwrap().clone()
    }
}

impl SpecStore for MemorySpecStore {
    fn pending_specs(&self) -> Result<Vec<CrashSpec>> {
        let mut specs = self.specs.clone();
        specs.sort_by_key(|s| s.id);
        Ok(specs)
    }

    fn record_status(
        &self,
        spec_id: i64,
        status_tag: &str,
        main_issue: Option<&IssueRecord>,
    ) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(spec_id, (status_tag.to_string(), main_issue.map(|i| i.id)));
        Ok(())
    }

    fn already_notified(&self) -> Result<HashSet<(i64, String)>> {
        Ok(self.notified.lock().unwrap().clone())
    }

    fn record_notified(&self, spec_id: i64, version: &str) -> Result<()> {
        self.notified
            .lock()
            .unwrap()
            .insert((spec_id, version.to_string()));
        Ok(())
    }

    fn description_added(&self, spec_id: i64, issue_id: i64) -> Result<bool> {
        Ok(self
            .descriptions
            .lock()
            .unwrap()
            .contains(&(spec_id, issue_id)))
    }

    fn record_description_added(&self, spec_id: i64, issue_id: i64) -> Result<()> {
        self.descriptions.lock().unwrap().insert((spec_id, issue_id));
        Ok(())
    }

    fn crash_fields_contain(&self, spec_id: i64, term: &str) -> Result<bool> {
        let needle = term.to_lowercase();
        Ok(self
            .crash_text
            .get(&spec_id)
            .is_some_and(|text| text.to_lowercase().contains(&needle)))
    }

    fn most_recent_crash_event(&self, spec_id: i64) -> Result<Option<serde_json::Value>> {
        Ok(self.crash_events.get(&spec_id).cloned())
    }
}
