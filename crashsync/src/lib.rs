//! Reconciles crash fingerprints collected by telemetry against an issue
//! tracker: searches the issue corpus for each crash signature, walks
//! duplicate/copy relations to the main issue, and decides per spec whether
//! to annotate an open issue, open a new one, or notify about a regression
//! in a newer release.

pub mod config;
pub mod corpus;
pub mod decide;
pub mod diff;
pub mod error;
pub mod notify;
pub mod status;
pub mod store;
pub mod sync;
pub mod types;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;
