//! Tag dictionary and prompt tag links.
//!
//! Linking is batched: whatever the number of tags, a link costs three
//! statements (insert names, resolve ids, insert links).

use rusqlite::{Connection, params, params_from_iter};
use std::collections::HashMap;

use crate::models::{TagCount, normalize_tags};
use crate::{Error, Result};

/// Builds `?{start}, ?{start+1}, ...` for `count` parameters; with `row`
/// set each one is parenthesised as a single-column `VALUES` row.
pub(super) fn placeholders(count: usize, start: usize, row: bool) -> String {
    (start..start + count)
        .map(|i| if row { format!("(?{i})") } else { format!("?{i}") })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Links a prompt to tags, creating missing tags.
///
/// Duplicate and blank names are dropped first, so `["a", "a", "b"]`
/// yields two links. Existing links are left alone.
///
/// # Errors
///
/// Returns [`Error::Index`] if a statement fails.
pub fn link_tags(conn: &Connection, prompt_id: &str, tags: &[String]) -> Result<()> {
    let tags = normalize_tags(tags);
    if tags.is_empty() {
        return Ok(());
    }

    let insert_tags = format!(
        "INSERT OR IGNORE INTO tags (name) VALUES {}",
        placeholders(tags.len(), 1, true)
    );
    conn.execute(&insert_tags, params_from_iter(tags.iter()))
        .map_err(|e| Error::index("insert_tags", e))?;

    let select_ids = format!(
        "SELECT id FROM tags WHERE name IN ({})",
        placeholders(tags.len(), 1, false)
    );
    let tag_ids: Vec<i64> = {
        let mut stmt = conn
            .prepare(&select_ids)
            .map_err(|e| Error::index("prepare_select_tag_ids", e))?;
        stmt.query_map(params_from_iter(tags.iter()), |row| row.get(0))
            .map_err(|e| Error::index("select_tag_ids", e))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| Error::index("read_tag_id", e))?
    };

    let rows = (0..tag_ids.len())
        .map(|i| format!("(?1, ?{})", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_links = format!("INSERT OR IGNORE INTO prompt_tags (prompt_id, tag_id) VALUES {rows}");
    let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(tag_ids.len() + 1);
    values.push(prompt_id.to_string().into());
    values.extend(tag_ids.into_iter().map(rusqlite::types::Value::from));
    conn.execute(&insert_links, params_from_iter(values))
        .map_err(|e| Error::index("insert_prompt_tags", e))?;

    Ok(())
}

/// Removes every tag link of a prompt. Tags themselves stay in the dictionary.
///
/// # Errors
///
/// Returns [`Error::Index`] if the delete fails.
pub fn unlink_all(conn: &Connection, prompt_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM prompt_tags WHERE prompt_id = ?1",
        params![prompt_id],
    )
    .map_err(|e| Error::index("delete_prompt_tags", e))?;
    Ok(())
}

/// Replaces a prompt's tag links with exactly `tags`.
///
/// # Errors
///
/// Returns [`Error::Index`] if a statement fails.
pub fn replace_tags(conn: &Connection, prompt_id: &str, tags: &[String]) -> Result<()> {
    unlink_all(conn, prompt_id)?;
    link_tags(conn, prompt_id, tags)
}

/// Tags linked to a prompt, sorted.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn tags_for(conn: &Connection, prompt_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT t.name FROM prompt_tags pt
             JOIN tags t ON t.id = pt.tag_id
             WHERE pt.prompt_id = ?1
             ORDER BY t.name",
        )
        .map_err(|e| Error::index("prepare_tags_for", e))?;
    stmt.query_map(params![prompt_id], |row| row.get(0))
        .map_err(|e| Error::index("tags_for", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| Error::index("read_tag", e))
}

/// Tags for several prompts in one query, keyed by prompt id.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn tags_for_many(conn: &Connection, prompt_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut by_prompt: HashMap<String, Vec<String>> = HashMap::new();
    if prompt_ids.is_empty() {
        return Ok(by_prompt);
    }

    let sql = format!(
        "SELECT pt.prompt_id, t.name FROM prompt_tags pt
         JOIN tags t ON t.id = pt.tag_id
         WHERE pt.prompt_id IN ({})
         ORDER BY t.name",
        placeholders(prompt_ids.len(), 1, false)
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::index("prepare_tags_for_many", e))?;
    let rows = stmt
        .query_map(params_from_iter(prompt_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| Error::index("tags_for_many", e))?;

    for row in rows {
        let (prompt_id, tag) = row.map_err(|e| Error::index("read_tag", e))?;
        by_prompt.entry(prompt_id).or_default().push(tag);
    }
    Ok(by_prompt)
}

/// Tags in use by live prompts with their usage counts, most used first.
///
/// # Errors
///
/// Returns [`Error::Index`] if the query fails.
pub fn list_tags(conn: &Connection) -> Result<Vec<TagCount>> {
    let mut stmt = conn
        .prepare(
            "SELECT t.name, COUNT(*) AS uses FROM tags t
             JOIN prompt_tags pt ON pt.tag_id = t.id
             JOIN prompts p ON p.id = pt.prompt_id
             WHERE p.archived = 0
             GROUP BY t.id
             ORDER BY uses DESC, t.name",
        )
        .map_err(|e| Error::index("prepare_list_tags", e))?;
    stmt.query_map([], |row| {
        Ok(TagCount {
            name: row.get(0)?,
            count: row.get::<_, i64>(1).map(|n| u64::try_from(n).unwrap_or(0))?,
        })
    })
    .map_err(|e| Error::index("list_tags", e))?
    .collect::<rusqlite::Result<_>>()
    .map_err(|e| Error::index("read_tag_count", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{MIGRATIONS, MigrationRunner};
    use rusqlite::trace::{TraceEvent, TraceEventCodes};
    use std::cell::Cell;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        MigrationRunner::new(&conn).run(MIGRATIONS).unwrap();
        conn
    }

    fn link_count(conn: &Connection, prompt_id: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM prompt_tags WHERE prompt_id = ?1",
            params![prompt_id],
            |r| r.get(0),
        )
        .unwrap()
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3, 1, false), "?1, ?2, ?3");
        assert_eq!(placeholders(2, 4, true), "(?4), (?5)");
    }

    #[test]
    fn test_duplicate_tags_link_once() {
        let conn = conn();
        link_tags(&conn, "p1", &tags(&["a", "a", "b"])).unwrap();
        assert_eq!(link_count(&conn, "p1"), 2);
        assert_eq!(tags_for(&conn, "p1").unwrap(), tags(&["a", "b"]));
    }

    #[test]
    fn test_relinking_is_idempotent() {
        let conn = conn();
        link_tags(&conn, "p1", &tags(&["a", "b"])).unwrap();
        link_tags(&conn, "p1", &tags(&["b", "a"])).unwrap();
        assert_eq!(link_count(&conn, "p1"), 2);

        let dictionary: i64 = conn
            .query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(dictionary, 2);
    }

    #[test]
    fn test_replace_tags_drops_old_links() {
        let conn = conn();
        link_tags(&conn, "p1", &tags(&["a", "b"])).unwrap();
        replace_tags(&conn, "p1", &tags(&["c"])).unwrap();
        assert_eq!(tags_for(&conn, "p1").unwrap(), tags(&["c"]));

        replace_tags(&conn, "p1", &[]).unwrap();
        assert_eq!(link_count(&conn, "p1"), 0);
    }

    thread_local! {
        static STATEMENTS: Cell<usize> = const { Cell::new(0) };
    }

    fn count_statement(event: TraceEvent<'_>) {
        if matches!(event, TraceEvent::Stmt(..)) {
            STATEMENTS.with(|n| n.set(n.get() + 1));
        }
    }

    #[test]
    fn test_link_cost_does_not_grow_with_tag_count() {
        let conn = conn();
        let many: Vec<String> = (0..50).map(|i| format!("tag-{i}")).collect();

        conn.trace_v2(TraceEventCodes::SQLITE_TRACE_STMT, Some(count_statement));
        STATEMENTS.with(|n| n.set(0));
        link_tags(&conn, "p1", &many).unwrap();
        let linked = STATEMENTS.with(|n| n.replace(0));
        replace_tags(&conn, "p1", &many[..25]).unwrap();
        let replaced = STATEMENTS.with(|n| n.replace(0));
        conn.trace_v2(TraceEventCodes::empty(), None);

        assert!(linked <= 3, "linking 50 tags ran {linked} statements");
        assert!(replaced <= 4, "replacing with 25 tags ran {replaced} statements");
        assert_eq!(link_count(&conn, "p1"), 25);
    }

    #[test]
    fn test_tags_for_many() {
        let conn = conn();
        link_tags(&conn, "p1", &tags(&["x"])).unwrap();
        link_tags(&conn, "p2", &tags(&["x", "y"])).unwrap();

        let by_prompt = tags_for_many(&conn, &tags(&["p1", "p2", "p3"])).unwrap();
        assert_eq!(by_prompt["p1"], tags(&["x"]));
        assert_eq!(by_prompt["p2"], tags(&["x", "y"]));
        assert!(!by_prompt.contains_key("p3"));
    }
}
