//! `SQLite` migration system for the index schema.
//!
//! Migrations are embedded at compile time and applied in order when the
//! index opens. Each one runs in its own transaction together with the row
//! that records it, so a failed upgrade leaves the previous schema intact.
//!
//! # Usage
//!
//! ```rust,ignore
//! use promptvault::storage::migrations::{MIGRATIONS, MigrationRunner};
//!
//! let conn = rusqlite::Connection::open_in_memory()?;
//! MigrationRunner::new(&conn).run(MIGRATIONS)?;
//! ```

use rusqlite::{Connection, params};

use crate::{Error, Result};

/// A single migration with version and SQL.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Migration version (sequential, starting at 1).
    pub version: i32,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL batch to apply.
    pub sql: &'static str,
}

/// Schema of the prompt index, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "prompts, tags, and full-text search",
        sql: "
            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                content TEXT NOT NULL,
                is_template INTEGER NOT NULL DEFAULT 0,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                favorite_order INTEGER,
                pin_order INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                branch TEXT NOT NULL DEFAULT 'main',
                content_hash TEXT NOT NULL,
                file_path TEXT NOT NULL UNIQUE,
                archived INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS prompt_tags (
                prompt_id TEXT NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (prompt_id, tag_id)
            );
            CREATE INDEX IF NOT EXISTS idx_prompt_tags_tag_id ON prompt_tags(tag_id);
            CREATE VIRTUAL TABLE IF NOT EXISTS prompts_fts USING fts5(
                prompt_id UNINDEXED,
                name,
                content,
                tags
            );
        ",
    },
    Migration {
        version: 2,
        description: "version ledger and branches",
        sql: "
            CREATE TABLE IF NOT EXISTS prompt_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt_id TEXT NOT NULL,
                branch TEXT NOT NULL DEFAULT 'main',
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                change_reason TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (prompt_id, branch, version)
            );
            CREATE TABLE IF NOT EXISTS branches (
                prompt_id TEXT NOT NULL,
                name TEXT NOT NULL,
                head_version INTEGER NOT NULL,
                parent_branch TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (prompt_id, name)
            );
        ",
    },
    Migration {
        version: 3,
        description: "listing indexes",
        sql: "
            CREATE INDEX IF NOT EXISTS idx_prompts_updated_at ON prompts(updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_prompts_archived ON prompts(archived);
            CREATE INDEX IF NOT EXISTS idx_prompt_versions_prompt
                ON prompt_versions(prompt_id, branch, version DESC);
        ",
    },
    Migration {
        version: 4,
        description: "merge bases between branches",
        sql: "
            CREATE TABLE IF NOT EXISTS merge_bases (
                prompt_id TEXT NOT NULL,
                branch TEXT NOT NULL,
                version INTEGER NOT NULL,
                other_branch TEXT NOT NULL,
                other_version INTEGER NOT NULL,
                PRIMARY KEY (prompt_id, branch, other_branch)
            );
            -- Copied history keeps hash and timestamp, so the fork point of an
            -- existing branch is the last version it shares with its parent.
            INSERT OR IGNORE INTO merge_bases
                (prompt_id, branch, version, other_branch, other_version)
            SELECT b.prompt_id, b.name, MAX(c.version), b.parent_branch, MAX(c.version)
            FROM branches b
            JOIN prompt_versions c
                ON c.prompt_id = b.prompt_id AND c.branch = b.name
            JOIN prompt_versions p
                ON p.prompt_id = b.prompt_id AND p.branch = b.parent_branch
               AND p.version = c.version
               AND p.content_hash = c.content_hash
               AND p.created_at = c.created_at
            WHERE b.parent_branch IS NOT NULL
            GROUP BY b.prompt_id, b.name;
            INSERT OR IGNORE INTO merge_bases
                (prompt_id, branch, version, other_branch, other_version)
            SELECT prompt_id, other_branch, other_version, branch, version FROM merge_bases;
        ",
    },
];

/// Applies pending migrations to a connection.
pub struct MigrationRunner<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationRunner<'a> {
    /// Creates a new migration runner.
    #[must_use]
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Runs all pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails; earlier migrations stay applied.
    pub fn run(&self, migrations: &[Migration]) -> Result<()> {
        self.ensure_migrations_table()?;
        let current = self.current_version()?;

        for migration in migrations.iter().filter(|m| m.version > current) {
            self.apply_migration(migration)?;
        }

        Ok(())
    }

    /// Returns the current schema version (0 for a fresh database).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn current_version(&self) -> Result<i32> {
        self.ensure_migrations_table()?;
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::index("migration_current_version", e))
    }

    fn ensure_migrations_table(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    description TEXT NOT NULL,
                    applied_at INTEGER NOT NULL
                )",
                [],
            )
            .map_err(|e| Error::index("create_migrations_table", e))?;
        Ok(())
    }

    /// Applies a single migration and records it in one transaction.
    fn apply_migration(&self, migration: &Migration) -> Result<()> {
        let operation = format!("migration_v{}", migration.version);
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::index(&operation, e))?;

        tx.execute_batch(migration.sql)
            .map_err(|e| Error::index(&format!("{operation}: {}", migration.description), e))?;

        #[allow(clippy::cast_possible_wrap)]
        let applied_at = crate::current_timestamp() as i64;
        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.description, applied_at],
        )
        .map_err(|e| Error::index("record_migration", e))?;

        tx.commit().map_err(|e| Error::index(&operation, e))?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(&conn);
        assert_eq!(runner.current_version().unwrap(), 0);

        runner.run(MIGRATIONS).unwrap();

        let latest = MIGRATIONS.iter().map(|m| m.version).max().unwrap();
        assert_eq!(runner.current_version().unwrap(), latest);
    }

    #[test]
    fn test_run_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(&conn);
        runner.run(MIGRATIONS).unwrap();
        runner.run(MIGRATIONS).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied, i64::try_from(MIGRATIONS.len()).unwrap());
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(&conn);
        let broken = [Migration {
            version: 1,
            description: "broken",
            sql: "CREATE TABLE ok_table (x INTEGER); THIS IS NOT SQL;",
        }];

        assert!(runner.run(&broken).is_err());
        assert_eq!(runner.current_version().unwrap(), 0);
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'ok_table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_merge_bases_backfilled_from_forks() {
        let conn = Connection::open_in_memory().unwrap();
        let runner = MigrationRunner::new(&conn);
        runner.run(&MIGRATIONS[..3]).unwrap();
        conn.execute_batch(
            "INSERT INTO prompt_versions (prompt_id, branch, version, content, content_hash, created_at)
             VALUES ('p', 'main', 1, 'a', 'ha', 10), ('p', 'main', 2, 'b', 'hb', 20),
                    ('p', 'dev', 1, 'a', 'ha', 10), ('p', 'dev', 2, 'b', 'hb', 20),
                    ('p', 'dev', 3, 'c', 'hc', 30), ('p', 'main', 3, 'd', 'hd', 40);
             INSERT INTO branches (prompt_id, name, head_version, parent_branch, created_at)
             VALUES ('p', 'main', 3, NULL, 10), ('p', 'dev', 3, 'main', 25);",
        )
        .unwrap();

        runner.run(MIGRATIONS).unwrap();

        let bases: Vec<(String, u32, String, u32)> = conn
            .prepare("SELECT branch, version, other_branch, other_version FROM merge_bases ORDER BY branch")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            bases,
            vec![
                ("dev".to_string(), 2, "main".to_string(), 2),
                ("main".to_string(), 2, "dev".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_versions_are_sequential() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i32::try_from(i + 1).unwrap());
        }
    }
}
