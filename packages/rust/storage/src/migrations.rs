//! SQL migration definitions for the checkpoint database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: checkpoints",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Last processed item per (group, account)
CREATE TABLE IF NOT EXISTS checkpoints (
    group_name TEXT NOT NULL,
    account    TEXT NOT NULL,
    last_id    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (group_name, account)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
