//! SQLite schema for the QAQC store.
//!
//! - `qaqc_issues`, `base_generations`, `in_process_sites` and `uploads` are
//!   mirrors the engine only reads
//! - `auto_qaqc_log` is the append-only audit log
//! - `site_leases` holds per-site run leases
//! - `store_meta` tracks the schema version

/// Migration v1: mirrored inputs, audit log and metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS qaqc_issues (
    issue_num INTEGER PRIMARY KEY,
    site_id TEXT NOT NULL CHECK (length(trim(site_id)) > 0),
    qaqc_status TEXT NOT NULL,
    label TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS base_generations (
    site_id TEXT NOT NULL CHECK (length(trim(site_id)) > 0),
    generated_at TEXT NOT NULL,
    PRIMARY KEY (site_id, generated_at)
);

CREATE TABLE IF NOT EXISTS in_process_sites (
    site_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS uploads (
    upload_id INTEGER NOT NULL,
    site_id TEXT NOT NULL CHECK (length(trim(site_id)) > 0),
    filename TEXT NOT NULL,
    PRIMARY KEY (upload_id, filename)
);

CREATE TABLE IF NOT EXISTS auto_qaqc_log (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_ts TEXT NOT NULL,
    issue_num INTEGER NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('SUCCESS', 'WARNING', 'REVIEW')),
    decided_at TEXT NOT NULL,
    comment TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: per-site leases and read-path indexes.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS site_leases (
    site_id TEXT PRIMARY KEY,
    issue_num INTEGER NOT NULL,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_auto_qaqc_log_state_issue
    ON auto_qaqc_log(state, issue_num);

CREATE INDEX IF NOT EXISTS idx_qaqc_issues_site
    ON qaqc_issues(site_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_uploads_site
    ON uploads(site_id, upload_id DESC);
";

/// Indexes every migrated store must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_auto_qaqc_log_state_issue",
    "idx_qaqc_issues_site",
    "idx_uploads_site",
];
