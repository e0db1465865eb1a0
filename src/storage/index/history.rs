//! Version ledger rows and branch pointers.
//!
//! Versions are append-only: the next number on a branch is always
//! `MAX(version) + 1`, so numbers stay gap-free and are never reused even
//! after the prompt row itself is gone.

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::prompts::{from_sql_time, to_sql_time};
use crate::models::{Branch, PromptVersion};
use crate::storage::ContentHasher;
use crate::{Error, Result};

const VERSION_COLUMNS: &str =
    "id, prompt_id, branch, version, content, content_hash, change_reason, created_at";

const BRANCH_COLUMNS: &str = "name, prompt_id, head_version, parent_branch, created_at";

fn map_version_row(row: &Row<'_>) -> rusqlite::Result<PromptVersion> {
    Ok(PromptVersion {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        branch: row.get(2)?,
        version: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        change_reason: row.get(6)?,
        created_at: from_sql_time(row.get(7)?),
    })
}

fn map_branch_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        name: row.get(0)?,
        prompt_id: row.get(1)?,
        head_version: row.get(2)?,
        parent_branch: row.get(3)?,
        created_at: from_sql_time(row.get(4)?),
    })
}

/// Highest version number recorded on a branch, 0 if none.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn max_version(conn: &Connection, prompt_id: &str, branch: &str) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM prompt_versions
         WHERE prompt_id = ?1 AND branch = ?2",
        params![prompt_id, branch],
        |row| row.get(0),
    )
    .map_err(|e| Error::index("max_version", e))
}

/// Appends the next version to a branch and moves the branch head onto it.
///
/// The branch row is created (without a parent) if it does not exist yet,
/// which is how `main` comes into being on a prompt's first version.
///
/// # Errors
///
/// Returns [`Error::Index`] if a statement fails.
pub fn append_version(
    conn: &Connection,
    prompt_id: &str,
    branch: &str,
    content: &str,
    change_reason: Option<&str>,
    created_at: u64,
) -> Result<PromptVersion> {
    let version = max_version(conn, prompt_id, branch)? + 1;
    let content_hash = ContentHasher::hash(content);

    conn.execute(
        "INSERT INTO prompt_versions
             (prompt_id, branch, version, content, content_hash, change_reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            prompt_id,
            branch,
            version,
            content,
            content_hash,
            change_reason,
            to_sql_time(created_at)
        ],
    )
    .map_err(|e| Error::index("insert_version", e))?;
    let id = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO branches (prompt_id, name, head_version, parent_branch, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4)
         ON CONFLICT(prompt_id, name) DO UPDATE SET head_version = excluded.head_version",
        params![prompt_id, branch, version, to_sql_time(created_at)],
    )
    .map_err(|e| Error::index("update_branch_head", e))?;

    Ok(PromptVersion {
        id,
        prompt_id: prompt_id.to_string(),
        branch: branch.to_string(),
        version,
        content: content.to_string(),
        content_hash,
        change_reason: change_reason.map(str::to_string),
        created_at,
    })
}

/// Versions of a branch, newest first, capped at `limit` when given.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn list_versions(
    conn: &Connection,
    prompt_id: &str,
    branch: &str,
    limit: Option<usize>,
) -> Result<Vec<PromptVersion>> {
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM prompt_versions
         WHERE prompt_id = ?1 AND branch = ?2
         ORDER BY version DESC
         LIMIT ?3"
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| Error::index("prepare_list_versions", e))?;
    stmt.query_map(params![prompt_id, branch, limit], map_version_row)
        .map_err(|e| Error::index("list_versions", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| Error::index("read_version_row", e))
}

/// One version of a branch.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn get_version(
    conn: &Connection,
    prompt_id: &str,
    branch: &str,
    version: u32,
) -> Result<Option<PromptVersion>> {
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM prompt_versions
         WHERE prompt_id = ?1 AND branch = ?2 AND version = ?3"
    );
    conn.query_row(&sql, params![prompt_id, branch, version], map_version_row)
        .optional()
        .map_err(|e| Error::index("get_version", e))
}

/// The last recorded point where `branch` and `other` held the same
/// content, as `(branch_version, other_version)`.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn merge_base(
    conn: &Connection,
    prompt_id: &str,
    branch: &str,
    other: &str,
) -> Result<Option<(u32, u32)>> {
    conn.query_row(
        "SELECT version, other_version FROM merge_bases
         WHERE prompt_id = ?1 AND branch = ?2 AND other_branch = ?3",
        params![prompt_id, branch, other],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(|e| Error::index("get_merge_base", e))
}

/// Records that `branch` at `version` and `other` at `other_version` hold
/// the same content. Stored in both directions; replaces any earlier base
/// of the pair.
///
/// # Errors
///
/// Returns [`Error::Index`] if the upsert fails.
pub fn record_merge_base(
    conn: &Connection,
    prompt_id: &str,
    (branch, version): (&str, u32),
    (other, other_version): (&str, u32),
) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO merge_bases (prompt_id, branch, version, other_branch, other_version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(prompt_id, branch, other_branch) DO UPDATE SET
                 version = excluded.version,
                 other_version = excluded.other_version",
        )
        .map_err(|e| Error::index("prepare_record_merge_base", e))?;
    stmt.execute(params![prompt_id, branch, version, other, other_version])
        .map_err(|e| Error::index("record_merge_base", e))?;
    stmt.execute(params![prompt_id, other, other_version, branch, version])
        .map_err(|e| Error::index("record_merge_base", e))?;
    Ok(())
}

/// Copies versions `1..=upto` of one branch onto another, keeping their
/// numbers, content, reasons, and timestamps. Returns the number copied.
///
/// # Errors
///
/// Returns [`Error::Index`] if the insert fails, including when the target
/// branch already has any of those numbers.
pub fn copy_versions(
    conn: &Connection,
    prompt_id: &str,
    from_branch: &str,
    to_branch: &str,
    upto: u32,
) -> Result<usize> {
    conn.execute(
        "INSERT INTO prompt_versions
             (prompt_id, branch, version, content, content_hash, change_reason, created_at)
         SELECT prompt_id, ?3, version, content, content_hash, change_reason, created_at
         FROM prompt_versions
         WHERE prompt_id = ?1 AND branch = ?2 AND version <= ?4
         ORDER BY version",
        params![prompt_id, from_branch, to_branch, upto],
    )
    .map_err(|e| Error::index("copy_versions", e))
}

/// One branch pointer.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn get_branch(conn: &Connection, prompt_id: &str, name: &str) -> Result<Option<Branch>> {
    let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE prompt_id = ?1 AND name = ?2");
    conn.query_row(&sql, params![prompt_id, name], map_branch_row)
        .optional()
        .map_err(|e| Error::index("get_branch", e))
}

/// Branches of a prompt, oldest first.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn list_branches(conn: &Connection, prompt_id: &str) -> Result<Vec<Branch>> {
    let sql = format!(
        "SELECT {BRANCH_COLUMNS} FROM branches WHERE prompt_id = ?1 ORDER BY created_at, name"
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| Error::index("prepare_list_branches", e))?;
    stmt.query_map(params![prompt_id], map_branch_row)
        .map_err(|e| Error::index("list_branches", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| Error::index("read_branch_row", e))
}

/// Inserts a branch pointer.
///
/// # Errors
///
/// Returns [`Error::BranchAlreadyExists`] if the name is taken, or
/// [`Error::Index`] for other failures.
pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<()> {
    conn.execute(
        "INSERT INTO branches (prompt_id, name, head_version, parent_branch, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            branch.prompt_id,
            branch.name,
            branch.head_version,
            branch.parent_branch,
            to_sql_time(branch.created_at)
        ],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => Error::BranchAlreadyExists {
            prompt_id: branch.prompt_id.clone(),
            branch: branch.name.clone(),
        },
        _ => Error::index("insert_branch", e),
    })?;
    Ok(())
}

/// Removes a branch pointer; its version rows stay. Returns `true` if a row
/// was deleted.
///
/// # Errors
///
/// Returns [`Error::Index`] if the delete fails.
pub fn delete_branch(conn: &Connection, prompt_id: &str, name: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM merge_bases WHERE prompt_id = ?1 AND (branch = ?2 OR other_branch = ?2)",
        params![prompt_id, name],
    )
    .map_err(|e| Error::index("delete_merge_bases", e))?;
    conn.execute(
        "DELETE FROM branches WHERE prompt_id = ?1 AND name = ?2",
        params![prompt_id, name],
    )
    .map(|n| n > 0)
    .map_err(|e| Error::index("delete_branch", e))
}

/// Removes every version, branch, and merge base row of a prompt.
///
/// # Errors
///
/// Returns [`Error::Index`] if a delete fails.
pub fn purge(conn: &Connection, prompt_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM prompt_versions WHERE prompt_id = ?1",
        params![prompt_id],
    )
    .map_err(|e| Error::index("purge_versions", e))?;
    conn.execute("DELETE FROM branches WHERE prompt_id = ?1", params![prompt_id])
        .map_err(|e| Error::index("purge_branches", e))?;
    conn.execute("DELETE FROM merge_bases WHERE prompt_id = ?1", params![prompt_id])
        .map_err(|e| Error::index("purge_merge_bases", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{MIGRATIONS, MigrationRunner};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        MigrationRunner::new(&conn).run(MIGRATIONS).unwrap();
        conn
    }

    #[test]
    fn test_append_numbers_versions_sequentially() {
        let conn = conn();
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            let v = append_version(&conn, "p", "main", text, None, 10).unwrap();
            assert_eq!(v.version, u32::try_from(i + 1).unwrap());
            assert_eq!(v.content_hash, ContentHasher::hash(text));
        }

        let branch = get_branch(&conn, "p", "main").unwrap().unwrap();
        assert_eq!(branch.head_version, 3);
        assert_eq!(branch.parent_branch, None);
    }

    #[test]
    fn test_list_versions_newest_first_with_limit() {
        let conn = conn();
        for text in ["a", "b", "c"] {
            append_version(&conn, "p", "main", text, Some("edit"), 10).unwrap();
        }

        let all = list_versions(&conn, "p", "main", None).unwrap();
        assert_eq!(
            all.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(list_versions(&conn, "p", "main", Some(2)).unwrap().len(), 2);
        assert!(list_versions(&conn, "p", "other", None).unwrap().is_empty());
    }

    #[test]
    fn test_branches_number_independently() {
        let conn = conn();
        append_version(&conn, "p", "main", "a", None, 10).unwrap();
        append_version(&conn, "p", "main", "b", None, 10).unwrap();
        let dev = append_version(&conn, "p", "dev", "x", None, 10).unwrap();
        assert_eq!(dev.version, 1);
    }

    #[test]
    fn test_copy_versions_shares_history() {
        let conn = conn();
        for text in ["a", "b", "c"] {
            append_version(&conn, "p", "main", text, None, 10).unwrap();
        }

        assert_eq!(copy_versions(&conn, "p", "main", "dev", 2).unwrap(), 2);
        let copied = get_version(&conn, "p", "dev", 2).unwrap().unwrap();
        assert_eq!(copied.content, "b");
        assert!(get_version(&conn, "p", "dev", 3).unwrap().is_none());
    }

    #[test]
    fn test_merge_base_recorded_both_ways() {
        let conn = conn();
        assert_eq!(merge_base(&conn, "p", "main", "dev").unwrap(), None);

        record_merge_base(&conn, "p", ("main", 2), ("dev", 2)).unwrap();
        record_merge_base(&conn, "p", ("main", 4), ("dev", 3)).unwrap();
        assert_eq!(merge_base(&conn, "p", "main", "dev").unwrap(), Some((4, 3)));
        assert_eq!(merge_base(&conn, "p", "dev", "main").unwrap(), Some((3, 4)));

        append_version(&conn, "p", "dev", "a", None, 10).unwrap();
        delete_branch(&conn, "p", "dev").unwrap();
        assert_eq!(merge_base(&conn, "p", "main", "dev").unwrap(), None);
    }

    #[test]
    fn test_insert_branch_twice_conflicts() {
        let conn = conn();
        let branch = Branch {
            name: "dev".to_string(),
            prompt_id: "p".to_string(),
            head_version: 1,
            parent_branch: Some("main".to_string()),
            created_at: 10,
        };
        insert_branch(&conn, &branch).unwrap();
        assert!(matches!(
            insert_branch(&conn, &branch),
            Err(Error::BranchAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_delete_branch_keeps_versions() {
        let conn = conn();
        append_version(&conn, "p", "dev", "a", None, 10).unwrap();
        assert!(delete_branch(&conn, "p", "dev").unwrap());
        assert!(get_branch(&conn, "p", "dev").unwrap().is_none());
        assert_eq!(max_version(&conn, "p", "dev").unwrap(), 1);
    }

    #[test]
    fn test_purge_removes_everything() {
        let conn = conn();
        append_version(&conn, "p", "main", "a", None, 10).unwrap();
        append_version(&conn, "q", "main", "a", None, 10).unwrap();
        purge(&conn, "p").unwrap();

        assert!(list_versions(&conn, "p", "main", None).unwrap().is_empty());
        assert!(list_branches(&conn, "p").unwrap().is_empty());
        assert_eq!(list_versions(&conn, "q", "main", None).unwrap().len(), 1);
    }
}
