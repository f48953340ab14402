//! Run configuration, layered from an optional config file and
//! CRASHSYNC_* environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Issues whose crashes are all older than this major release are tagged
/// EOL and never opened.
pub const DEFAULT_MIN_SUPPORTED_MAJOR: u32 = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// SQLite database holding crash specs and sync bookkeeping.
    pub telemetry_db: String,
    /// SQLite mirror of the tracker database (read-mostly).
    pub tracker_db: String,
    pub min_supported_major: u32,
    /// Base URL for links to tracker issues in notifications.
    pub tracker_issues_url: String,
    /// Base URL for crash-spec dashboard links; the sig-v2 hex is appended.
    pub dashboard_spec_url: String,
    /// Lockfile guarding against concurrent runs.
    pub lock_path: String,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub from: String,
    pub to: String,
    pub subject: String,
}

impl SyncConfig {
    /// Loads configuration from `path` (if given), then environment
    /// variables, over built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("telemetry_db", "telemetry.db")?
            .set_default("tracker_db", "tracker.db")?
            .set_default("min_supported_major", DEFAULT_MIN_SUPPORTED_MAJOR as i64)?
            .set_default("tracker_issues_url", "https://tracker.ceph.com/issues/")?
            .set_default(
                "dashboard_spec_url",
                "https://telemetry.ceph.com/d/crash-spec-x-ray?var-sig_v2=",
            )?
            .set_default("lock_path", "crashsync.lock")?
            .set_default("email.from", "telemetry-bot")?
            .set_default("email.to", "telemetry@example.com")?
            .set_default("email.subject", "Telemetry crashes")?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CRASHSYNC").separator("__"),
        );

        builder
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}
