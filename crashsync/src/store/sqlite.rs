//! SQLite store implementations.
//!
//! The tracker side is a local mirror of the tracker database, reduced to
//! the fields the engine reads and writes; reading it directly instead of
//! going through the tracker API is what keeps a full-corpus fetch cheap
//! enough to do every run. The telemetry side holds crash specs and the
//! reconciler's bookkeeping tables.

use crate::store::{IssueStore, SpecStore};
use crate::types::{CrashSpec, ExtendedIssueEntry, IssueRecord, Relation, RelationType};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const TRACKER_SCHEMA: &str = include_str!("tracker_schema.sql");
const TELEMETRY_SCHEMA: &str = include_str!("telemetry_schema.sql");

fn split_lines(field: &str) -> Vec<String> {
    field
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

fn join_lines(values: &[String]) -> String {
    values.join("\n")
}

/// Tracker mirror backed by SQLite.
pub struct SqliteIssueStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteIssueStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open tracker mirror at {path:?}"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(TRACKER_SCHEMA)?;
        Ok(SqliteIssueStore {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn project_ids(&self, conn: &Connection) -> Result<HashMap<String, i64>> {
        let mut stmt = conn.prepare("SELECT name, id FROM projects")?;
        let projects = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, i64>, _>>()?;
        Ok(projects)
    }
}

impl IssueStore for SqliteIssueStore {
    fn fetch_all_since(&self, since: NaiveDate) -> Result<Vec<ExtendedIssueEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, subject, description, updated_on, status, tracker_type,
                    fixed_version, sig_v1, sig_v2, affected_versions
             FROM issues WHERE updated_on >= ?",
        )?;
        let mut entries: HashMap<i64, ExtendedIssueEntry> = stmt
            .query_map(params![since], |row| {
                let description: String = row.get(2)?;
                let affected: String = row.get(9)?;
                let issue = IssueRecord {
                    id: row.get(0)?,
                    subject: row.get(1)?,
                    updated_on: row.get(3)?,
                    status: row.get(4)?,
                    tracker_type: row.get(5)?,
                    fixed_version: row.get(6)?,
                    sig_v1: row.get(7)?,
                    sig_v2: row.get(8)?,
                    affected_versions: split_lines(&affected),
                    relations: Vec::new(),
                };
                let text = if description.is_empty() {
                    String::new()
                } else {
                    format!("{description}\n")
                };
                Ok((issue.id, ExtendedIssueEntry { issue, text }))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        // Journal notes extend the searchable text; a note's issue may be
        // outside the fetched window.
        let mut notes_stmt =
            conn.prepare("SELECT issue_id, notes FROM journal_notes ORDER BY id")?;
        let notes = notes_stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (issue_id, note) in notes {
            if let Some(entry) = entries.get_mut(&issue_id) {
                entry.text.push_str(&note);
                entry.text.push('\n');
            }
        }

        let mut rel_stmt =
            conn.prepare("SELECT issue_from_id, issue_to_id, relation_type FROM issue_relations")?;
        let relations = rel_stmt
            .query_map([], |row| {
                Ok(Relation {
                    from_id: row.get(0)?,
                    to_id: row.get(1)?,
                    relation_type: RelationType::parse(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for rel in relations {
            if let Some(entry) = entries.get_mut(&rel.from_id) {
                entry.issue.relations.push(rel);
            }
        }

        Ok(entries.into_values().collect())
    }

    fn closed_status_names(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM issue_statuses WHERE is_closed = 1")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(names)
    }

    fn create_issue(
        &self,
        project_id: i64,
        subject: &str,
        description: &str,
        source_tag: &str,
    ) -> Result<IssueRecord> {
        let conn = self.conn.lock().unwrap();
        let today = Utc::now().date_naive();
        conn.execute(
            "INSERT INTO issues (subject, description, updated_on, status, tracker_type,
                                 sig_v1, sig_v2, affected_versions, project_id, source)
             VALUES (?, ?, ?, 'New', 'Bug', '', '', '', ?, ?)",
            params![subject, description, today, project_id, source_tag],
        )?;
        let id = conn.last_insert_rowid();
        Ok(IssueRecord {
            id,
            subject: subject.to_string(),
            updated_on: today,
            status: "New".to_string(),
            tracker_type: "Bug".to_string(),
            fixed_version: None,
            affected_versions: Vec::new(),
            sig_v1: Some(String::new()),
            sig_v2: Some(String::new()),
            relations: Vec::new(),
        })
    }

    fn update_issue(
        &self,
        issue_id: i64,
        sig_v1_add: &[String],
        sig_v2_add: &str,
        affected_versions_add: &[String],
        note: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let (mut v1, mut v2, affected): (String, String, String) = conn
            .query_row(
                "SELECT COALESCE(sig_v1, ''), COALESCE(sig_v2, ''), affected_versions
                 FROM issues WHERE id = ?",
                params![issue_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("issue {issue_id} not found in tracker mirror"))?;

        if !sig_v2_add.is_empty() && !v2.contains(sig_v2_add) {
            if !v2.is_empty() {
                v2.push('\n');
            }
            v2.push_str(sig_v2_add);
        }
        for sig in sig_v1_add {
            if !v1.contains(sig.as_str()) {
                if !v1.is_empty() {
                    v1.push('\n');
                }
                v1.push_str(sig);
            }
        }
        let mut versions = split_lines(&affected);
        for version in affected_versions_add {
            if !versions.contains(version) {
                versions.push(version.clone());
            }
        }

        conn.execute(
            "UPDATE issues
             SET sig_v1 = ?, sig_v2 = ?, affected_versions = ?, updated_on = ?
             WHERE id = ?",
            params![
                v1,
                v2,
                join_lines(&versions),
                Utc::now().date_naive(),
                issue_id
            ],
        )?;

        if let Some(note) = note {
            conn.execute(
                "INSERT INTO journal_notes (issue_id, notes) VALUES (?, ?)",
                params![issue_id, note],
            )?;
        }
        Ok(())
    }

    fn add_relation(&self, from_id: i64, to_id: i64, relation_type: &RelationType) -> Result<()> {
        if from_id == to_id {
            log::warn!("  skipping self-relation on issue {from_id}");
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO issue_relations (issue_from_id, issue_to_id, relation_type)
             VALUES (?, ?, ?)",
            params![from_id, to_id, relation_type.as_str()],
        )?;
        if inserted == 0 {
            log::warn!("  skipping duplicate relation {from_id} -> {to_id}");
        }
        Ok(())
    }

    fn pick_project_for(&self, daemons: &[String], stack_names: &[String]) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let projects = self.project_ids(&conn)?;
        route_project(&projects, daemons, stack_names)
    }
}

fn in_backtrace(stack_names: &[String], term: &str) -> bool {
    let joined = stack_names.join(", ").to_lowercase();
    joined.contains(&term.to_lowercase())
}

/// Routes a crash to a tracker project from the daemons that reported it
/// and the backtrace frames. Anything non-obvious lands in the catch-all
/// "rados" project.
fn route_project(
    projects: &HashMap<String, i64>,
    daemons: &[String],
    stack_names: &[String],
) -> Result<i64> {
    let rados = *projects
        .get("rados")
        .context("project 'rados' missing from tracker mirror")?;
    let get = |name: &str| projects.get(name).copied().unwrap_or(rados);

    if in_backtrace(stack_names, "KernelDevice") {
        return Ok(get("bluestore"));
    }

    // Daemon names are not always reported.
    let daemons: Vec<&String> = daemons.iter().filter(|d| !d.is_empty()).collect();
    if daemons.is_empty() {
        return Ok(rados);
    }

    if daemons.iter().all(|d| d.contains("rbd")) {
        return Ok(get("rbd"));
    }
    if daemons.len() != 1 {
        // Different daemons reporting the same crash.
        return Ok(rados);
    }

    let process = daemons[0].as_str();
    if process.contains("radosgw") {
        return Ok(get("rgw"));
    }
    if process.contains("cephfs") || ["ganesha.nfsd", "ceph-fuse", "ceph_mds"].contains(&process) {
        return Ok(get("cephfs"));
    }
    if process == "ceph-mgr" {
        if in_backtrace(stack_names, "rbd") {
            return Ok(get("rbd"));
        }
        return Ok(get("mgr"));
    }
    if process.contains("blue")
        || in_backtrace(stack_names, "bluefs")
        || in_backtrace(stack_names, "bluestore")
    {
        return Ok(get("bluestore"));
    }
    Ok(rados)
}

/// Telemetry store backed by SQLite.
pub struct SqliteSpecStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteSpecStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open telemetry db at {path:?}"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(TELEMETRY_SCHEMA)?;
        Ok(SqliteSpecStore {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SpecStore for SqliteSpecStore {
    fn pending_specs(&self) -> Result<Vec<CrashSpec>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sig_v1, sig_v2, stack_names, assert_func, assert_condition,
                    majors_affected, minors_affected, daemons, status
             FROM specs ORDER BY id",
        )?;
        let specs = stmt
            .query_map([], |row| {
                Ok(CrashSpec {
                    id: row.get(0)?,
                    sig_v1: split_lines(&row.get::<_, String>(1)?),
                    sig_v2: row.get(2)?,
                    stack_names: split_lines(&row.get::<_, String>(3)?),
                    assert_func: row.get(4)?,
                    assert_condition: row.get(5)?,
                    majors_affected: split_lines(&row.get::<_, String>(6)?),
                    minors_affected: split_lines(&row.get::<_, String>(7)?),
                    daemons: split_lines(&row.get::<_, String>(8)?),
                    prior_status: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<CrashSpec>, _>>()?;
        // Specs with fewer than two sanitized frames carry too little
        // signal to search or report on.
        Ok(specs
            .into_iter()
            .filter(|s| s.stack_names.len() > 1)
            .collect())
    }

    fn record_status(
        &self,
        spec_id: i64,
        status_tag: &str,
        main_issue: Option<&IssueRecord>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE specs SET status = ? WHERE id = ?",
            params![status_tag, spec_id],
        )?;
        log::debug!("  updated spec {spec_id} to status {status_tag}");
        if let Some(issue) = main_issue {
            conn.execute(
                "INSERT INTO spec_main_issue (spec_id, issue_id, issue_status)
                 VALUES (?, ?, ?)
                 ON CONFLICT (spec_id) DO UPDATE SET issue_id = ?, issue_status = ?",
                params![spec_id, issue.id, issue.status, issue.id, issue.status],
            )?;
            log::debug!("  recorded main issue {} for spec {spec_id}", issue.id);
        }
        Ok(())
    }

    fn already_notified(&self) -> Result<HashSet<(i64, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT spec_id, version FROM email_sent")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashSet<(i64, String)>, _>>()?;
        Ok(pairs)
    }

    fn record_notified(&self, spec_id: i64, version: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO email_sent (spec_id, version) VALUES (?, ?)",
            params![spec_id, version],
        )?;
        Ok(())
    }

    fn description_added(&self, spec_id: i64, issue_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM description_added WHERE spec_id = ? AND issue_id = ?",
                params![spec_id, issue_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_description_added(&self, spec_id: i64, issue_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO description_added (spec_id, issue_id) VALUES (?, ?)",
            params![spec_id, issue_id],
        )?;
        Ok(())
    }

    fn crash_fields_contain(&self, spec_id: i64, term: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let needle = format!("%{}%", term.to_lowercase());
        let found = conn
            .query_row(
                "SELECT 1 FROM crash_events
                 WHERE spec_id = ?
                 AND (LOWER(COALESCE(assert_msg, '')) LIKE ?
                      OR LOWER(COALESCE(assert_file, '')) LIKE ?)
                 LIMIT 1",
                params![spec_id, needle, needle],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn most_recent_crash_event(&self, spec_id: i64) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT raw FROM crash_events WHERE spec_id = ? AND raw IS NOT NULL
                 ORDER BY ts DESC LIMIT 1",
                params![spec_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("malformed crash dump for spec {spec_id}"))?,
            )),
            None => Ok(None),
        }
    }
}
