//! Version string ordering and format validation.
//!
//! Versions are compared by splitting on `.` and comparing the token
//! sequences lexicographically *as strings*, not numerically. This
//! reproduces the ordering the tracker data was reconciled under from the
//! start: `"16.2.9"` sorts above `"16.2.10"`. Changing it would silently
//! reshuffle which telemetry versions count as "newer than recorded", so
//! the ordering is kept as-is and pinned by tests.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::types::CrashSpec;

/// Compares two dotted version strings component-wise as strings.
///
/// Callers are responsible for filtering malformed versions first; see
/// [`sanitize_spec_versions`].
pub fn compare(a: &str, b: &str) -> Ordering {
    let at: Vec<&str> = a.split('.').collect();
    let bt: Vec<&str> = b.split('.').collect();
    at.cmp(&bt)
}

/// Returns the greater of two version strings under [`compare`].
pub fn max<'a>(a: &'a str, b: &'a str) -> &'a str {
    if compare(a, b) == Ordering::Greater {
        a
    } else {
        b
    }
}

/// Extracts the major component of a dotted version string.
pub fn major_of(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

fn major_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").unwrap())
}

fn minor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The middle component only ever takes 0 (dev), 1 (rc) or 2 (stable).
    // Keeping the narrow pattern rejects junk like '16.1.0-944-ge53ee8bd'.
    RE.get_or_init(|| Regex::new(r"^\d+\.[012]+\.\d+$").unwrap())
}

/// True for a plain integer major release string. Filters out reported
/// values like "Development" or "l".
pub fn is_valid_major(version: &str) -> bool {
    major_re().is_match(version)
}

/// True for a `%d.%d.%d` minor version string. Filters out reported values
/// like "14.2.1.2" or "16.1.0-944-ge53ee8bd".
pub fn is_valid_minor(version: &str) -> bool {
    minor_re().is_match(version)
}

/// Drops malformed entries from a spec's affected major and minor version
/// lists. The spec proceeds with whatever valid versions remain; if none
/// remain, the eligibility gate marks it "NA" downstream.
pub fn sanitize_spec_versions(spec: &mut CrashSpec) {
    if !spec.majors_affected.is_empty() {
        if spec.majors_affected.iter().all(|m| m == "Development") {
            log::info!("  spec {}: all affected majors are Development", spec.id);
        }
        spec.majors_affected.retain(|m| is_valid_major(m));
    }
    if !spec.minors_affected.is_empty() {
        spec.minors_affected.retain(|m| is_valid_minor(m));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn string_ordering_is_component_wise() {
        assert_eq!(compare("15.2.1", "15.2.2"), Ordering::Less);
        assert_eq!(compare("16.2.0", "15.2.9"), Ordering::Greater);
        assert_eq!(compare("15.2.1", "15.2.1"), Ordering::Equal);
        assert_eq!(compare("15.2", "15.2.1"), Ordering::Less);
    }

    #[test]
    fn two_digit_components_sort_as_strings_not_numbers() {
        // Documented behavior: "9" > "10" under string comparison.
        assert_eq!(compare("16.2.9", "16.2.10"), Ordering::Greater);
        assert_eq!(max("16.2.9", "16.2.10"), "16.2.9");
    }

    #[test]
    fn max_prefers_later_argument_on_equality() {
        assert_eq!(max("15.2.1", "15.2.1"), "15.2.1");
        assert_eq!(max("0.0.0", "14.2.9"), "14.2.9");
    }

    #[test]
    fn major_format_validation() {
        assert!(is_valid_major("15"));
        assert!(is_valid_major("9"));
        assert!(!is_valid_major("Development"));
        assert!(!is_valid_major("l"));
        assert!(!is_valid_major("15.2"));
        assert!(!is_valid_major(""));
    }

    #[test]
    fn minor_format_validation() {
        assert!(is_valid_minor("14.2.1"));
        assert!(is_valid_minor("16.0.0"));
        assert!(!is_valid_minor("14.2.1.2"));
        assert!(!is_valid_minor("Development"));
        assert!(!is_valid_minor("16.1.0-944-ge53ee8bd"));
        assert!(!is_valid_minor("16.3.0"));
    }

    #[test]
    fn sanitize_drops_malformed_entries_only() {
        let mut spec = crate::testutil::spec_fixture(1);
        spec.majors_affected = vec!["15".into(), "Development".into(), "16".into()];
        spec.minors_affected = vec!["15.2.1".into(), "14.2.1.2".into(), "16.2.0".into()];
        sanitize_spec_versions(&mut spec);
        assert_eq!(spec.majors_affected, vec!["15", "16"]);
        assert_eq!(spec.minors_affected, vec!["15.2.1", "16.2.0"]);
    }

    proptest! {
        // Total order consistent with component-wise string comparison.
        #[test]
        fn compare_is_a_total_order(
            a in r"[0-9]{1,2}\.[0-2]\.[0-9]{1,2}",
            b in r"[0-9]{1,2}\.[0-2]\.[0-9]{1,2}",
            c in r"[0-9]{1,2}\.[0-2]\.[0-9]{1,2}",
        ) {
            // Antisymmetry
            prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
            // Reflexivity
            prop_assert_eq!(compare(&a, &a), Ordering::Equal);
            // Transitivity of <=
            if compare(&a, &b) != Ordering::Greater && compare(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare(&a, &c), Ordering::Greater);
            }
            // Consistency with the underlying token comparison
            let at: Vec<&str> = a.split('.').collect();
            let bt: Vec<&str> = b.split('.').collect();
            prop_assert_eq!(compare(&a, &b), at.cmp(&bt));
        }
    }
}
