//! Prompt rows and their full-text search entries.

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use std::path::{Path, PathBuf};

use super::tags::{self, placeholders};
use crate::models::{IndexStats, ListFilter, Prompt, SearchHit};
use crate::{Error, Result};

/// Column list matching [`map_prompt_row`].
const PROMPT_COLUMNS: &str = "id, name, description, content, is_template, is_favorite, \
     is_pinned, favorite_order, pin_order, created_at, updated_at, version, branch, \
     content_hash, file_path, archived";

/// The slice of a prompt row the reconciler compares against disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRow {
    /// Prompt id.
    pub id: String,
    /// Backing file.
    pub file_path: PathBuf,
    /// Stored hash of the file.
    pub content_hash: String,
}

pub(super) fn to_sql_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

pub(super) fn from_sql_time(secs: i64) -> u64 {
    u64::try_from(secs).unwrap_or(0)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Maps a row selected with [`PROMPT_COLUMNS`]. Tags are filled in separately.
fn map_prompt_row(row: &Row<'_>) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        content: row.get(3)?,
        tags: Vec::new(),
        is_template: row.get(4)?,
        is_favorite: row.get(5)?,
        is_pinned: row.get(6)?,
        favorite_order: row.get(7)?,
        pin_order: row.get(8)?,
        created_at: from_sql_time(row.get(9)?),
        updated_at: from_sql_time(row.get(10)?),
        version: row.get(11)?,
        branch: row.get(12)?,
        content_hash: row.get(13)?,
        file_path: PathBuf::from(row.get::<_, String>(14)?),
        archived: row.get(15)?,
    })
}

/// Maps a unique-constraint failure on `prompts.name` to [`Error::NameConflict`].
fn map_write_error(operation: &str, name: &str, err: &rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = err
        && failure.code == ErrorCode::ConstraintViolation
        && message.contains("prompts.name")
    {
        return Error::NameConflict {
            name: name.to_string(),
        };
    }
    Error::index(operation, err)
}

fn fetch_one(conn: &Connection, column: &str, key: &str) -> Result<Option<Prompt>> {
    let sql = format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE {column} = ?1");
    let prompt = conn
        .query_row(&sql, params![key], map_prompt_row)
        .optional()
        .map_err(|e| Error::index("get_prompt", e))?;

    prompt
        .map(|mut p| {
            p.tags = tags::tags_for(conn, &p.id)?;
            Ok(p)
        })
        .transpose()
}

/// Inserts a prompt row, or updates every column of the row with its id.
///
/// # Errors
///
/// Returns [`Error::NameConflict`] if another prompt holds the name, or
/// [`Error::Index`] for other failures.
pub fn upsert(conn: &Connection, prompt: &Prompt) -> Result<()> {
    conn.execute(
        "INSERT INTO prompts (id, name, description, content, is_template, is_favorite,
             is_pinned, favorite_order, pin_order, created_at, updated_at, version, branch,
             content_hash, file_path, archived)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             description = excluded.description,
             content = excluded.content,
             is_template = excluded.is_template,
             is_favorite = excluded.is_favorite,
             is_pinned = excluded.is_pinned,
             favorite_order = excluded.favorite_order,
             pin_order = excluded.pin_order,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             version = excluded.version,
             branch = excluded.branch,
             content_hash = excluded.content_hash,
             file_path = excluded.file_path,
             archived = excluded.archived",
        params![
            prompt.id,
            prompt.name,
            prompt.description,
            prompt.content,
            prompt.is_template,
            prompt.is_favorite,
            prompt.is_pinned,
            prompt.favorite_order,
            prompt.pin_order,
            to_sql_time(prompt.created_at),
            to_sql_time(prompt.updated_at),
            prompt.version,
            prompt.branch,
            prompt.content_hash,
            path_text(&prompt.file_path),
            prompt.archived,
        ],
    )
    .map_err(|e| map_write_error("upsert_prompt", &prompt.name, &e))?;
    Ok(())
}

/// Replaces the search entry of a prompt: delete, then insert.
///
/// # Errors
///
/// Returns [`Error::Index`] if either statement fails.
pub fn replace_fts(conn: &Connection, prompt: &Prompt) -> Result<()> {
    delete_fts(conn, &prompt.id)?;
    conn.execute(
        "INSERT INTO prompts_fts (prompt_id, name, content, tags) VALUES (?1, ?2, ?3, ?4)",
        params![prompt.id, prompt.name, prompt.content, prompt.tags.join(" ")],
    )
    .map_err(|e| Error::index("insert_fts", e))?;
    Ok(())
}

/// Removes the search entry of a prompt.
///
/// # Errors
///
/// Returns [`Error::Index`] if the delete fails.
pub fn delete_fts(conn: &Connection, prompt_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM prompts_fts WHERE prompt_id = ?1",
        params![prompt_id],
    )
    .map_err(|e| Error::index("delete_fts", e))?;
    Ok(())
}

/// Writes the row, search entry, and tag links of a live prompt.
///
/// # Errors
///
/// Propagates errors from [`upsert`], [`replace_fts`], and the tag relink.
pub fn save(conn: &Connection, prompt: &Prompt) -> Result<()> {
    upsert(conn, prompt)?;
    tags::replace_tags(conn, &prompt.id, &prompt.tags)?;
    if prompt.archived {
        delete_fts(conn, &prompt.id)
    } else {
        replace_fts(conn, prompt)
    }
}

/// Looks a prompt up by id.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Prompt>> {
    fetch_one(conn, "id", id)
}

/// Looks a prompt up by name.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Prompt>> {
    fetch_one(conn, "name", name)
}

/// Looks a prompt up by backing file.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn get_by_path(conn: &Connection, path: &Path) -> Result<Option<Prompt>> {
    fetch_one(conn, "file_path", &path_text(path))
}

/// Id of the prompt holding `name`, if any.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn name_owner(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM prompts WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::index("name_owner", e))
}

/// Returns `true` if some prompt row, archived or not, points at `path`.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn path_in_use(conn: &Connection, path: &Path) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM prompts WHERE file_path = ?1)",
        params![path_text(path)],
        |row| row.get(0),
    )
    .map_err(|e| Error::index("path_in_use", e))
}

/// Lists prompts matching a filter: pinned first, then by name.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<Prompt>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.include_archived {
        clauses.push("archived = 0".to_string());
    }
    if let Some(is_template) = filter.is_template {
        values.push(Value::from(is_template));
        clauses.push(format!("is_template = ?{}", values.len()));
    }
    if filter.favorites_only {
        clauses.push("is_favorite = 1".to_string());
    }

    let wanted = crate::models::normalize_tags(&filter.tags);
    if !wanted.is_empty() {
        let start = values.len() + 1;
        values.extend(wanted.iter().cloned().map(Value::from));
        values.push(Value::from(i64::try_from(wanted.len()).unwrap_or(i64::MAX)));
        clauses.push(format!(
            "id IN (SELECT pt.prompt_id FROM prompt_tags pt
                    JOIN tags t ON t.id = pt.tag_id
                    WHERE t.name IN ({})
                    GROUP BY pt.prompt_id
                    HAVING COUNT(*) = ?{})",
            placeholders(wanted.len(), start, false),
            values.len()
        ));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit_clause = filter.limit.map_or_else(String::new, |limit| {
        values.push(Value::from(i64::try_from(limit).unwrap_or(i64::MAX)));
        format!("LIMIT ?{}", values.len())
    });

    let sql = format!(
        "SELECT {PROMPT_COLUMNS} FROM prompts {where_clause}
         ORDER BY is_pinned DESC, pin_order IS NULL, pin_order, name
         {limit_clause}"
    );

    let mut prompts: Vec<Prompt> = {
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::index("prepare_list_prompts", e))?;
        stmt.query_map(params_from_iter(values), map_prompt_row)
            .map_err(|e| Error::index("list_prompts", e))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| Error::index("read_prompt_row", e))?
    };

    let ids: Vec<String> = prompts.iter().map(|p| p.id.clone()).collect();
    let mut by_prompt = tags::tags_for_many(conn, &ids)?;
    for prompt in &mut prompts {
        prompt.tags = by_prompt.remove(&prompt.id).unwrap_or_default();
    }
    Ok(prompts)
}

/// Quotes each whitespace-separated term so FTS5 operators in user input
/// (`-`, `*`, `:`, `NEAR`, quotes) are matched literally. Terms are OR-ed.
#[must_use]
pub fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Full-text search over live prompts, best match first.
///
/// Scores are the BM25 rank mapped into `(0, 1)`, higher is better.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let fts = fts_query(query);
    if fts.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare_cached(
            "SELECT f.prompt_id, p.name, bm25(prompts_fts) AS score,
                    snippet(prompts_fts, 2, '[', ']', '...', 12)
             FROM prompts_fts f
             JOIN prompts p ON p.id = f.prompt_id
             WHERE prompts_fts MATCH ?1 AND p.archived = 0
             ORDER BY score
             LIMIT ?2",
        )
        .map_err(|e| Error::index("prepare_search", e))?;

    stmt.query_map(
        params![fts, i64::try_from(limit).unwrap_or(i64::MAX)],
        |row| {
            let raw: f64 = row.get(2)?;
            // bm25() is negative and lower is better.
            let score = 1.0 / (1.0 + (0.5 * raw).exp());
            Ok(SearchHit {
                prompt_id: row.get(0)?,
                name: row.get(1)?,
                score: score.clamp(0.0, 1.0),
                snippet: row.get(3)?,
            })
        },
    )
    .map_err(|e| Error::index("search", e))?
    .collect::<rusqlite::Result<_>>()
    .map_err(|e| Error::index("read_search_row", e))
}

/// Minimal rows of live prompts for reconciliation, ordered by path.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn sync_rows(conn: &Connection) -> Result<Vec<SyncRow>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, file_path, content_hash FROM prompts
             WHERE archived = 0 ORDER BY file_path",
        )
        .map_err(|e| Error::index("prepare_sync_rows", e))?;
    stmt.query_map([], |row| {
        Ok(SyncRow {
            id: row.get(0)?,
            file_path: PathBuf::from(row.get::<_, String>(1)?),
            content_hash: row.get(2)?,
        })
    })
    .map_err(|e| Error::index("sync_rows", e))?
    .collect::<rusqlite::Result<_>>()
    .map_err(|e| Error::index("read_sync_row", e))
}

/// Flags a prompt archived or live and records its new file location.
///
/// Archiving drops the search entry; restoring is followed by
/// [`replace_fts`] by the caller once the row is reloaded.
///
/// # Errors
///
/// Returns [`Error::Index`] if the update fails.
pub fn set_archived(conn: &Connection, id: &str, archived: bool, file_path: &Path) -> Result<()> {
    conn.execute(
        "UPDATE prompts SET archived = ?2, file_path = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            id,
            archived,
            path_text(file_path),
            to_sql_time(crate::current_timestamp())
        ],
    )
    .map_err(|e| Error::index("set_archived", e))?;
    if archived {
        delete_fts(conn, id)?;
    }
    Ok(())
}

/// Deletes a prompt row with its search entry and tag links.
///
/// Version and branch rows are left in place. Returns `true` if a row was
/// deleted.
///
/// # Errors
///
/// Returns [`Error::Index`] if a delete fails.
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    delete_fts(conn, id)?;
    tags::unlink_all(conn, id)?;
    let deleted = conn
        .execute("DELETE FROM prompts WHERE id = ?1", params![id])
        .map_err(|e| Error::index("delete_prompt", e))?;
    Ok(deleted > 0)
}

/// Row counts across the index.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn stats(conn: &Connection) -> Result<IndexStats> {
    conn.query_row(
        "SELECT
             (SELECT COUNT(*) FROM prompts WHERE archived = 0),
             (SELECT COUNT(*) FROM prompts WHERE archived = 1),
             (SELECT COUNT(*) FROM prompt_versions),
             (SELECT COUNT(*) FROM branches),
             (SELECT COUNT(*) FROM tags)",
        [],
        |row| {
            let count = |i: usize| row.get::<_, i64>(i).map(|n| u64::try_from(n).unwrap_or(0));
            Ok(IndexStats {
                prompt_count: count(0)?,
                archived_count: count(1)?,
                version_count: count(2)?,
                branch_count: count(3)?,
                tag_count: count(4)?,
            })
        },
    )
    .map_err(|e| Error::index("stats", e))
}
