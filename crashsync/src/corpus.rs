//! In-memory index of the tracker issue corpus.
//!
//! The full issue snapshot is loaded once per run and treated as immutable
//! for the run's duration. Signature terms are searched as case-sensitive
//! substrings over each issue's signature fields and free text, and the
//! found set is then expanded across "duplicates" and "copied_to" relations
//! to reach canonical originals and backports.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::types::{CrashSpec, ExtendedIssueEntry, IssueRecord};

/// IssueCorpusIndex maps issue ids to their searchable entries. Built once
/// at run start; no issues are re-fetched mid-run, even though the run may
/// itself create or update issues. An issue created for one spec is not
/// visible to the next spec's search within the same run.
pub struct IssueCorpusIndex {
    entries: HashMap<i64, ExtendedIssueEntry>,
}

impl IssueCorpusIndex {
    /// Builds the index from a collaborator-supplied issue snapshot. Each
    /// entry carries the issue's free text (description plus journal
    /// notes), concatenated by the store at fetch time.
    pub fn build(snapshot: Vec<ExtendedIssueEntry>) -> Self {
        let entries = snapshot
            .into_iter()
            .map(|entry| (entry.issue.id, entry))
            .collect();
        IssueCorpusIndex { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&ExtendedIssueEntry> {
        self.entries.get(&id)
    }

    /// Accumulates into `found` every issue whose sig-v1 field, sig-v2
    /// field, or concatenated text contains `term` as a substring.
    ///
    /// Case-sensitive: signatures are hex digests where case never varies,
    /// and free-text matching preserves the tracker's historical behavior.
    /// Re-adding an already-found issue is a no-op.
    pub fn search(&self, term: &str, found: &mut BTreeSet<i64>) {
        for (id, entry) in &self.entries {
            if found.contains(id) {
                continue;
            }
            let hit = entry
                .issue
                .sig_v1
                .as_deref()
                .is_some_and(|v1| v1.contains(term))
                || entry
                    .issue
                    .sig_v2
                    .as_deref()
                    .is_some_and(|v2| v2.contains(term))
                || entry.text.contains(term);
            if hit {
                found.insert(*id);
            }
        }
    }

    /// Expands a seed set across "duplicates" and "copied_to" relations
    /// originating from each found issue, pulling in canonical originals
    /// and backports.
    ///
    /// "relates" relations are excluded; they mark a different bug, not an
    /// equivalent one. Iterative worklist with the result set doubling as
    /// the visited set, so cyclic relation data terminates: an issue
    /// already in the set is not re-expanded. Relations whose target is
    /// absent from the snapshot are logged and skipped; the corpus may be
    /// a filtered view.
    pub fn expand_relations(&self, found: &mut BTreeSet<i64>) {
        let mut worklist: VecDeque<i64> = found.iter().copied().collect();
        while let Some(id) = worklist.pop_front() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            for rel in &entry.issue.relations {
                if rel.from_id != id || !rel.relation_type.is_equivalence() {
                    continue;
                }
                if !self.entries.contains_key(&rel.to_id) {
                    log::error!(
                        "  issue {} not in corpus while pulling {} of {}",
                        rel.to_id,
                        rel.relation_type,
                        id
                    );
                    continue;
                }
                if found.insert(rel.to_id) {
                    worklist.push_back(rel.to_id);
                }
            }
        }
    }

    /// Gathers every issue related to a crash spec: issues containing any
    /// of its signatures, plus their canonical originals and backports.
    pub fn related_issues(&self, spec: &CrashSpec) -> Vec<&IssueRecord> {
        let mut found = BTreeSet::new();
        for sig_v1 in &spec.sig_v1 {
            log::info!("      sig_v1: {sig_v1}");
            self.search(sig_v1, &mut found);
        }
        let sig_v2 = spec.sig_v2_hex();
        log::info!("      sig_v2: {sig_v2}");
        self.search(&sig_v2, &mut found);

        self.expand_relations(&mut found);

        found
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| &entry.issue)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{entry_fixture, issue_fixture, spec_fixture};
    use crate::types::{Relation, RelationType};

    fn corpus_with(issues: Vec<IssueRecord>) -> IssueCorpusIndex {
        IssueCorpusIndex::build(issues.into_iter().map(|i| entry_fixture(i, "")).collect())
    }

    #[test]
    fn search_matches_each_signature_field_and_text() {
        let mut sig_field = issue_fixture(1);
        sig_field.sig_v1 = Some("aaa111".into());
        let mut v2_field = issue_fixture(2);
        v2_field.sig_v2 = Some("bbb222".into());
        let text_hit = issue_fixture(3);
        let corpus = IssueCorpusIndex::build(vec![
            entry_fixture(sig_field, ""),
            entry_fixture(v2_field, ""),
            entry_fixture(text_hit, "seen in the wild: ccc333 reported\n"),
        ]);

        let mut found = BTreeSet::new();
        corpus.search("aaa111", &mut found);
        corpus.search("bbb222", &mut found);
        corpus.search("ccc333", &mut found);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn search_is_case_sensitive() {
        let mut issue = issue_fixture(1);
        issue.sig_v1 = Some("DeadBeef".into());
        let corpus = corpus_with(vec![issue]);
        let mut found = BTreeSet::new();
        corpus.search("deadbeef", &mut found);
        assert!(found.is_empty());
        corpus.search("DeadBeef", &mut found);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn search_accumulates_idempotently() {
        let mut issue = issue_fixture(7);
        issue.sig_v1 = Some("cafef00d".into());
        let corpus = corpus_with(vec![issue]);
        let mut found = BTreeSet::new();
        corpus.search("cafef00d", &mut found);
        corpus.search("cafef00d", &mut found);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn expand_follows_duplicates_and_copied_to_only() {
        let mut dup = issue_fixture(1);
        dup.relations = vec![
            Relation {
                from_id: 1,
                to_id: 2,
                relation_type: RelationType::Duplicates,
            },
            Relation {
                from_id: 1,
                to_id: 4,
                relation_type: RelationType::Relates,
            },
        ];
        let mut original = issue_fixture(2);
        original.relations = vec![Relation {
            from_id: 2,
            to_id: 3,
            relation_type: RelationType::CopiedTo,
        }];
        let backport = issue_fixture(3);
        let unrelated = issue_fixture(4);
        let corpus = corpus_with(vec![dup, original, backport, unrelated]);

        let mut found: BTreeSet<i64> = [1].into();
        corpus.expand_relations(&mut found);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn expand_ignores_relations_targeting_the_expanding_issue() {
        // Only relations *originating from* a found issue are followed.
        let seed = issue_fixture(1);
        let mut pointing_in = issue_fixture(2);
        pointing_in.relations = vec![Relation {
            from_id: 2,
            to_id: 1,
            relation_type: RelationType::Duplicates,
        }];
        let corpus = corpus_with(vec![seed, pointing_in]);
        let mut found: BTreeSet<i64> = [1].into();
        corpus.expand_relations(&mut found);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn expand_terminates_on_relation_cycles() {
        // A duplicates B, B copied_to A.
        let mut a = issue_fixture(1);
        a.relations = vec![Relation {
            from_id: 1,
            to_id: 2,
            relation_type: RelationType::Duplicates,
        }];
        let mut b = issue_fixture(2);
        b.relations = vec![Relation {
            from_id: 2,
            to_id: 1,
            relation_type: RelationType::CopiedTo,
        }];
        let corpus = corpus_with(vec![a, b]);
        let mut found: BTreeSet<i64> = [1].into();
        corpus.expand_relations(&mut found);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn expand_skips_targets_missing_from_snapshot() {
        let mut a = issue_fixture(1);
        a.relations = vec![Relation {
            from_id: 1,
            to_id: 999,
            relation_type: RelationType::Duplicates,
        }];
        let corpus = corpus_with(vec![a]);
        let mut found: BTreeSet<i64> = [1].into();
        corpus.expand_relations(&mut found);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn related_issues_searches_all_signatures_then_expands() {
        let mut hit = issue_fixture(10);
        hit.sig_v2 = Some("00010203".into());
        hit.relations = vec![Relation {
            from_id: 10,
            to_id: 11,
            relation_type: RelationType::CopiedTo,
        }];
        let backport = issue_fixture(11);
        let corpus = corpus_with(vec![hit, backport]);

        let mut spec = spec_fixture(1);
        spec.sig_v2 = vec![0, 1, 2, 3];
        let related = corpus.related_issues(&spec);
        let ids: Vec<i64> = related.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![10, 11]);
    }
}
