//! Table-driven classification of tracker status names.
//!
//! Whether a status counts as *closed* comes from the tracker's own status
//! registry, fetched once per run. Whether a closed status still marks the
//! issue as a genuine bug is a fixed local table: that judgment is policy,
//! not tracker data.

use std::collections::HashSet;

/// Statuses implying the issue is a real bug. "Rejected" and "Closed" are
/// known to be used inconsistently in the tracker; they are treated as
/// bugs for now.
const BUG_STATUSES: &[&str] = &[
    "Resolved",
    "Need More Info",
    "Can't reproduce",
    "Won't Fix - EOL",
    "Rejected",
    "Closed",
];

/// Statuses implying the issue is not a bug. "Duplicate" redirects to the
/// canonical original, which relation expansion has already pulled into
/// the related-issue set.
const NOT_A_BUG_STATUSES: &[&str] = &["Won't Fix", "Duplicate"];

/// True when `status` is not in the tracker-supplied closed set.
pub fn is_open(status: &str, closed_status_names: &HashSet<String>) -> bool {
    !closed_status_names.contains(status)
}

/// True when a closed status still classifies the issue as a bug.
pub fn is_bug(status: &str) -> bool {
    BUG_STATUSES.contains(&status)
}

/// True when a status explicitly marks the issue as not a bug.
pub fn is_not_a_bug(status: &str) -> bool {
    NOT_A_BUG_STATUSES.contains(&status)
}
