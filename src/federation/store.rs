//! Synchronous SQL for project stores and the shared params record.
//!
//! Every function takes a plain [`Connection`]; callers that need atomicity pass
//! a `Transaction` (which derefs to one). The async [`Federation`] wraps these in
//! `spawn_blocking`.
//!
//! [`Federation`]: super::Federation

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{NewNode, Node, Project, ProjectStats};
use crate::db::migrations::{get_meta, set_meta};
use crate::error::{Error, Result};
use crate::quant::{compute_morton_key_from_embedding, StoredQuantParams};

const QUANT_PARAMS_KEY: &str = "quant_params";

const NODE_COLUMNS: &str = "id, title, text, embedding, morton_key, quant_version, \
                            children, parent_id, meta, created_at, updated_at";

/// How an upsert treats fields absent from the incoming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Overwrite the whole row; no embedding means no key.
    Replace,
    /// Keep the stored embedding and key unless a new embedding is supplied.
    Merge,
}

/// A computed key in its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub hex: String,
    pub version: u64,
}

// ── Params record ─────────────────────────────────────────────────────────────

pub fn load_quant_params(conn: &Connection) -> Result<Option<StoredQuantParams>> {
    get_meta(conn, QUANT_PARAMS_KEY)?
        .map(|json| serde_json::from_str(&json).map_err(Error::from))
        .transpose()
}

pub fn save_quant_params(conn: &Connection, stored: &StoredQuantParams) -> Result<()> {
    set_meta(conn, QUANT_PARAMS_KEY, &serde_json::to_string(stored)?)?;
    Ok(())
}

pub fn clear_quant_params(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM federation_meta WHERE key = ?1",
        params![QUANT_PARAMS_KEY],
    )?;
    Ok(())
}

// ── Projects ──────────────────────────────────────────────────────────────────

/// Register a project if unknown; update name/weight only when given. Idempotent.
pub fn ensure_project(
    conn: &Connection,
    project_id: &str,
    name: Option<&str>,
    weight: Option<f64>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO projects (id, name, weight, created_at, updated_at) \
         VALUES (?1, COALESCE(?2, ?1), COALESCE(?3, 1.0), ?4, ?4) \
         ON CONFLICT(id) DO UPDATE SET \
            name = COALESCE(?2, projects.name), \
            weight = COALESCE(?3, projects.weight), \
            updated_at = ?4",
        params![project_id, name, weight, now],
    )?;
    Ok(())
}

pub fn get_project(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    Ok(conn
        .query_row(
            "SELECT id, name, weight, created_at, updated_at FROM projects WHERE id = ?1",
            params![project_id],
            row_to_project,
        )
        .optional()?)
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>> {
    let mut stmt = conn
        .prepare("SELECT id, name, weight, created_at, updated_at FROM projects ORDER BY id")?;
    let rows = stmt
        .query_map([], row_to_project)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a project and (via cascade) its nodes. Returns the node count removed.
pub fn delete_project(conn: &Connection, project_id: &str) -> Result<u64> {
    let nodes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
    Ok(nodes as u64)
}

pub fn delete_all(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM nodes", [])?;
    conn.execute("DELETE FROM projects", [])?;
    clear_quant_params(conn)
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        weight: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Key `embedding` under the stored params.
///
/// Failures are isolated to the node: they are logged and yield `None`.
pub fn derive_key(
    node_id: &str,
    embedding: &[f32],
    stored: &StoredQuantParams,
) -> Option<StoredKey> {
    match compute_morton_key_from_embedding(embedding, &stored.params) {
        Ok(key) => Some(StoredKey {
            hex: key.to_hex(),
            version: stored.version,
        }),
        Err(e) => {
            tracing::warn!(node_id, error = %e, "cannot key node; storing without morton key");
            None
        }
    }
}

pub fn upsert_node(
    conn: &Connection,
    project_id: &str,
    node: &NewNode,
    key: Option<&StoredKey>,
    mode: UpsertMode,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let embedding = node.embedding.as_deref().map(embedding_to_bytes);
    let children = serde_json::to_string(&node.children)?;
    let meta = node.meta.as_ref().map(serde_json::to_string).transpose()?;

    let on_conflict = match mode {
        UpsertMode::Replace => {
            "embedding = excluded.embedding, \
             morton_key = excluded.morton_key, \
             quant_version = excluded.quant_version"
        }
        UpsertMode::Merge => {
            "embedding = COALESCE(excluded.embedding, nodes.embedding), \
             morton_key = CASE WHEN excluded.embedding IS NULL THEN nodes.morton_key ELSE excluded.morton_key END, \
             quant_version = CASE WHEN excluded.embedding IS NULL THEN nodes.quant_version ELSE excluded.quant_version END"
        }
    };

    conn.execute(
        &format!(
            "INSERT INTO nodes (project_id, id, title, text, embedding, morton_key, quant_version, \
                                children, parent_id, meta, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11) \
             ON CONFLICT(project_id, id) DO UPDATE SET \
                title = excluded.title, \
                text = excluded.text, \
                children = excluded.children, \
                parent_id = excluded.parent_id, \
                meta = excluded.meta, \
                updated_at = excluded.updated_at, \
                {on_conflict}"
        ),
        params![
            project_id,
            node.id,
            node.title,
            node.text,
            embedding,
            key.map(|k| k.hex.as_str()),
            key.map(|k| k.version as i64),
            children,
            node.parent,
            meta,
            now,
        ],
    )?;
    Ok(())
}

pub fn get_node(conn: &Connection, project_id: &str, node_id: &str) -> Result<Option<Node>> {
    Ok(conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE project_id = ?1 AND id = ?2"),
            params![project_id, node_id],
            row_to_node,
        )
        .optional()?)
}

/// One page of a project's nodes in id order.
pub fn get_nodes(
    conn: &Connection,
    project_id: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE project_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt
        .query_map(
            params![project_id, to_sql_count(limit), to_sql_count(offset)],
            row_to_node,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Nodes whose current-version key lies in `[lo_hex, hi_hex]`, in key order.
///
/// Keys are fixed-width lowercase hex, so the string comparison is numeric.
pub fn search_by_morton(
    conn: &Connection,
    project_id: &str,
    lo_hex: &str,
    hi_hex: &str,
    quant_version: u64,
    limit: usize,
) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes \
         WHERE project_id = ?1 AND quant_version = ?2 AND morton_key BETWEEN ?3 AND ?4 \
         ORDER BY morton_key, id LIMIT ?5"
    ))?;
    let rows = stmt
        .query_map(
            params![
                project_id,
                quant_version as i64,
                lo_hex,
                hi_hex,
                to_sql_count(limit)
            ],
            row_to_node,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All stored embeddings of the given projects (or every project), in a stable order.
pub fn collect_embeddings(conn: &Connection, project_ids: Option<&[String]>) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match project_ids {
        Some(ids) => {
            let mut stmt = conn.prepare(
                "SELECT embedding FROM nodes WHERE project_id = ?1 AND embedding IS NOT NULL ORDER BY id",
            )?;
            for id in ids {
                let rows = stmt
                    .query_map(params![id], |row| row.get::<_, Vec<u8>>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.extend(rows.iter().map(|b| bytes_to_embedding(b)));
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT embedding FROM nodes WHERE embedding IS NOT NULL ORDER BY project_id, id",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows.iter().map(|b| bytes_to_embedding(b)));
        }
    }
    Ok(out)
}

/// Recompute keys under `stored` for every node with an embedding, optionally
/// limited to one project. Returns the number of nodes visited.
pub fn rekey_nodes(
    conn: &Connection,
    project_id: Option<&str>,
    stored: &StoredQuantParams,
) -> Result<usize> {
    let targets: Vec<(String, String, Vec<u8>)> = {
        let mut stmt = conn.prepare(
            "SELECT project_id, id, embedding FROM nodes \
             WHERE embedding IS NOT NULL AND (?1 IS NULL OR project_id = ?1)",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut update = conn.prepare(
        "UPDATE nodes SET morton_key = ?1, quant_version = ?2 WHERE project_id = ?3 AND id = ?4",
    )?;
    for (pid, id, bytes) in &targets {
        let key = derive_key(id, &bytes_to_embedding(bytes), stored);
        update.execute(params![
            key.as_ref().map(|k| k.hex.as_str()),
            key.as_ref().map(|k| k.version as i64),
            pid,
            id
        ])?;
    }
    Ok(targets.len())
}

/// Per-project node, keyed and stale counts in id order.
pub fn project_stats(conn: &Connection, current_version: Option<u64>) -> Result<Vec<ProjectStats>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, COUNT(n.id), COUNT(n.morton_key), \
                COALESCE(SUM(CASE WHEN n.morton_key IS NOT NULL AND n.quant_version IS NOT ?1 \
                                  THEN 1 ELSE 0 END), 0) \
         FROM projects p LEFT JOIN nodes n ON n.project_id = p.id \
         GROUP BY p.id, p.name ORDER BY p.id",
    )?;
    let rows = stmt
        .query_map(params![current_version.map(|v| v as i64)], |row| {
            Ok(ProjectStats {
                id: row.get(0)?,
                name: row.get(1)?,
                node_count: row.get::<_, i64>(2)? as u64,
                keyed_nodes: row.get::<_, i64>(3)? as u64,
                stale_nodes: row.get::<_, i64>(4)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let embedding: Option<Vec<u8>> = row.get(3)?;
    let quant_version: Option<i64> = row.get(5)?;
    let children: String = row.get(6)?;
    let meta: Option<String> = row.get(8)?;
    Ok(Node {
        id: row.get(0)?,
        title: row.get(1)?,
        text: row.get(2)?,
        embedding: embedding.as_deref().map(bytes_to_embedding),
        morton_key: row.get(4)?,
        quant_version: quant_version.map(|v| v as u64),
        children: serde_json::from_str(&children).unwrap_or_default(),
        parent: row.get(7)?,
        meta: meta.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Little-endian f32 encoding used for the `embedding` column.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::quant::{compute_quantization_params, QuantOptions, ReductionPolicy};

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn stored_params() -> StoredQuantParams {
        let corpus = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        StoredQuantParams {
            params: compute_quantization_params(
                &corpus,
                QuantOptions {
                    reduced_dims: 2,
                    bits: 4,
                    policy: ReductionPolicy::First,
                },
            )
            .unwrap(),
            version: 1,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&v)), v);
    }

    #[test]
    fn ensure_project_is_idempotent_and_keeps_name() {
        let conn = test_db();
        ensure_project(&conn, "alpha", Some("Alpha"), Some(2.0)).unwrap();
        ensure_project(&conn, "alpha", None, None).unwrap();

        let p = get_project(&conn, "alpha").unwrap().unwrap();
        assert_eq!(p.name, "Alpha");
        assert_eq!(p.weight, 2.0);
        assert_eq!(list_projects(&conn).unwrap().len(), 1);
    }

    #[test]
    fn unnamed_project_defaults_name_to_id() {
        let conn = test_db();
        ensure_project(&conn, "beta", None, None).unwrap();
        let p = get_project(&conn, "beta").unwrap().unwrap();
        assert_eq!(p.name, "beta");
        assert_eq!(p.weight, 1.0);
    }

    #[test]
    fn merge_upsert_keeps_key_without_new_embedding() {
        let conn = test_db();
        let stored = stored_params();
        ensure_project(&conn, "p", None, None).unwrap();

        let node = NewNode::new("n1", "Title", "body").with_embedding(vec![1.0, 1.0]);
        let key = derive_key("n1", node.embedding.as_deref().unwrap(), &stored);
        upsert_node(&conn, "p", &node, key.as_ref(), UpsertMode::Replace).unwrap();

        let patch = NewNode::new("n1", "Renamed", "new body");
        upsert_node(&conn, "p", &patch, None, UpsertMode::Merge).unwrap();

        let got = get_node(&conn, "p", "n1").unwrap().unwrap();
        assert_eq!(got.title, "Renamed");
        assert_eq!(got.morton_key.as_deref(), Some("ff"));
        assert_eq!(got.embedding, Some(vec![1.0, 1.0]));

        upsert_node(&conn, "p", &patch, None, UpsertMode::Replace).unwrap();
        let got = get_node(&conn, "p", "n1").unwrap().unwrap();
        assert!(got.morton_key.is_none());
        assert!(got.embedding.is_none());
    }

    #[test]
    fn derive_key_isolates_bad_embeddings() {
        let stored = stored_params();
        assert!(derive_key("short", &[0.5], &stored).is_none());
        assert!(derive_key("nan", &[f32::NAN, 0.0], &stored).is_none());
        assert!(derive_key("ok", &[0.0, 0.0], &stored).is_some());
    }

    #[test]
    fn delete_project_cascades_to_nodes() {
        let conn = test_db();
        ensure_project(&conn, "p", None, None).unwrap();
        upsert_node(&conn, "p", &NewNode::new("a", "", "x"), None, UpsertMode::Replace).unwrap();
        upsert_node(&conn, "p", &NewNode::new("b", "", "y"), None, UpsertMode::Replace).unwrap();

        assert_eq!(delete_project(&conn, "p").unwrap(), 2);
        assert!(get_node(&conn, "p", "a").unwrap().is_none());
        assert_eq!(delete_project(&conn, "p").unwrap(), 0);
    }

    #[test]
    fn quant_params_round_trip_through_meta() {
        let conn = test_db();
        assert!(load_quant_params(&conn).unwrap().is_none());
        let stored = stored_params();
        save_quant_params(&conn, &stored).unwrap();
        assert_eq!(load_quant_params(&conn).unwrap(), Some(stored));
        clear_quant_params(&conn).unwrap();
        assert!(load_quant_params(&conn).unwrap().is_none());
    }
}
