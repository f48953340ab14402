//! Version deltas between telemetry-observed versions and versions already
//! recorded across a spec's related issues.

use std::collections::BTreeMap;

use crate::types::{CrashSpec, IssueRecord, VersionMaxima};
use crate::version;

/// Versions observed via telemetry that exceed anything recorded in the
/// related issues. `global` and `per_major` are independent; a version can
/// appear in both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDiff {
    /// Versions newer than the absolute newest recorded version.
    pub global: Vec<String>,
    /// Per major release: newer minors, or a major seen for the first time.
    pub per_major: BTreeMap<String, Vec<String>>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.per_major.is_empty()
    }
}

/// Folds every related issue's affected and target versions into a global
/// maximum and a per-major maximum.
pub fn affected_maxima(related_issues: &[&IssueRecord]) -> VersionMaxima {
    let mut per_major: BTreeMap<String, String> = BTreeMap::new();
    let mut global = String::from("0.0.0");
    for issue in related_issues {
        for ver in issue.affected_and_target_versions() {
            global = version::max(&global, &ver).to_string();
            let maj = version::major_of(&ver).to_string();
            per_major
                .entry(maj)
                .and_modify(|cur| {
                    if version::compare(&ver, cur) == std::cmp::Ordering::Greater {
                        *cur = ver.clone();
                    }
                })
                .or_insert(ver);
        }
    }
    VersionMaxima { global, per_major }
}

/// Computes which of the spec's affected versions are newer than the
/// recorded maxima, skipping majors below `min_supported_major`.
///
/// A version lands in `global` when it exceeds the absolute recorded
/// maximum. Separately, it lands in `per_major` when its major was never
/// recorded, or it exceeds that major's recorded maximum; a major key is
/// created on its first diff and later diffs for the same major append.
pub fn diff(spec: &CrashSpec, maxima: &VersionMaxima, min_supported_major: u32) -> VersionDiff {
    let mut out = VersionDiff::default();
    for ver in &spec.minors_affected {
        let maj = version::major_of(ver);
        let below_min = maj
            .parse::<u32>()
            .map(|m| m < min_supported_major)
            .unwrap_or(true);
        if below_min {
            continue;
        }

        if version::compare(ver, &maxima.global) == std::cmp::Ordering::Greater {
            out.global.push(ver.clone());
        }

        let newer_for_major = match maxima.per_major.get(maj) {
            None => true,
            Some(max) => version::compare(ver, max) == std::cmp::Ordering::Greater,
        };
        if newer_for_major {
            out.per_major
                .entry(maj.to_string())
                .or_default()
                .push(ver.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{issue_fixture, spec_fixture};

    #[test]
    fn maxima_fold_affected_and_target_versions() {
        let mut a = issue_fixture(1);
        a.affected_versions = vec!["14.2.9".into(), "15.2.3".into()];
        let mut b = issue_fixture(2);
        b.affected_versions = vec!["16.2.1".into()];
        b.fixed_version = Some("16.2.5".into());
        let issues = vec![&a, &b];

        let maxima = affected_maxima(&issues);
        assert_eq!(maxima.global, "16.2.5");
        assert_eq!(maxima.per_major.get("14").unwrap(), "14.2.9");
        assert_eq!(maxima.per_major.get("15").unwrap(), "15.2.3");
        assert_eq!(maxima.per_major.get("16").unwrap(), "16.2.5");
    }

    #[test]
    fn maxima_of_no_issues_is_the_zero_version() {
        let maxima = affected_maxima(&[]);
        assert_eq!(maxima.global, "0.0.0");
        assert!(maxima.per_major.is_empty());
    }

    #[test]
    fn worked_example() {
        let mut spec = spec_fixture(1);
        spec.minors_affected = vec![
            "14.2.3".into(),
            "15.1.2".into(),
            "15.2.10".into(),
            "16.2.1".into(),
            "16.2.4".into(),
            "16.2.5".into(),
        ];
        let maxima = VersionMaxima {
            global: "16.2.2".into(),
            per_major: [
                ("15".to_string(), "15.2.15".to_string()),
                ("16".to_string(), "16.2.2".to_string()),
            ]
            .into(),
        };

        let d = diff(&spec, &maxima, 15);
        assert_eq!(d.global, vec!["16.2.4", "16.2.5"]);
        assert_eq!(d.per_major.len(), 1);
        // 15.2.10 is excluded: 15's recorded max 15.2.15 already exceeds it
        // under string ordering.
        assert_eq!(d.per_major.get("16").unwrap(), &vec!["16.2.4", "16.2.5"]);
    }

    #[test]
    fn unseen_major_diffs_per_major_but_not_globally() {
        let mut spec = spec_fixture(1);
        spec.minors_affected = vec!["15.2.4".into()];
        let maxima = VersionMaxima {
            global: "16.2.2".into(),
            per_major: [("16".to_string(), "16.2.2".to_string())].into(),
        };
        let d = diff(&spec, &maxima, 15);
        assert!(d.global.is_empty());
        assert_eq!(d.per_major.get("15").unwrap(), &vec!["15.2.4"]);
    }

    #[test]
    fn majors_below_minimum_are_skipped_entirely() {
        let mut spec = spec_fixture(1);
        spec.minors_affected = vec!["14.2.22".into()];
        let maxima = VersionMaxima {
            global: "0.0.0".into(),
            per_major: BTreeMap::new(),
        };
        let d = diff(&spec, &maxima, 15);
        assert!(d.is_empty());
    }
}
