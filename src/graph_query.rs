//! `GraphQuery` (spec §4.4): read-only code-graph queries. Every parameter
//! is bound, never string-interpolated; `blastRadius` is one recursive CTE
//! with a `UNION` (not `UNION ALL`) so a cyclic import graph still yields
//! each entity once, matching the REDESIGN FLAGS note carried into
//! SPEC_FULL.md.

use crate::store::Store;
use crate::types::{CodeEntityKind, ValidatedDepth, ValidatedLimit};
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CodeEntityRow {
    pub id: String,
    pub package: String,
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub line: Option<i64>,
    pub exported: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyRow {
    pub entity: CodeEntityRow,
    pub rel_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlastRadiusRow {
    pub entity: CodeEntityRow,
    pub depth: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphSummary {
    pub total_entities: i64,
    pub total_relationships: i64,
    pub entities_by_kind: Vec<(String, i64)>,
    pub relationships_by_type: Vec<(String, i64)>,
    pub entities_by_package: Vec<(String, i64)>,
}

pub struct GraphQuery {
    store: Store,
}

impl GraphQuery {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Distinct callers of any entity whose name matches `pattern`
    /// (case-sensitive `LIKE '%pattern%'`), ordered by file path then line.
    pub async fn what_calls(&self, name_pattern: &str) -> Result<Vec<CodeEntityRow>> {
        let pattern = format!("%{}%", crate::validation::query::escape_like(name_pattern));
        self.store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT caller.id, caller.package, caller.file_path, caller.kind, caller.name, caller.line, caller.exported
                     FROM code_relationships r
                     JOIN code_entities caller ON caller.id = r.from_id
                     JOIN code_entities callee ON callee.id = r.to_id
                     WHERE r.rel_type = 'calls' AND callee.name LIKE ?1 ESCAPE '\\'
                     ORDER BY caller.file_path, caller.line",
                )?;
                let rows = stmt.query_map([&pattern], row_to_entity)?;
                collect(rows)
            })
            .await
    }

    /// Entities linked to the target by `imports`, `extends`, `implements`,
    /// or `calls`, with the relationship type alongside each result. An
    /// `imports` edge to an unresolved module surfaces as the `external:`
    /// sentinel entity rather than being dropped by the join.
    pub async fn what_depends_on(&self, name_pattern: &str) -> Result<Vec<DependencyRow>> {
        let pattern = format!("%{}%", crate::validation::query::escape_like(name_pattern));
        self.store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT r.to_id, dep.package, dep.file_path, dep.kind, dep.name, dep.line, dep.exported, r.rel_type
                     FROM code_relationships r
                     JOIN code_entities target ON target.id = r.from_id
                     LEFT JOIN code_entities dep ON dep.id = r.to_id
                     WHERE target.name LIKE ?1 ESCAPE '\\'
                       AND r.rel_type IN ('imports', 'extends', 'implements', 'calls')
                     ORDER BY dep.file_path, dep.line",
                )?;
                let rows = stmt.query_map([&pattern], |row| {
                    Ok(DependencyRow {
                        entity: row_to_entity_or_external(row)?,
                        rel_type: row.get(7)?,
                    })
                })?;
                collect(rows)
            })
            .await
    }

    /// Recursive closure from every entity whose `filePath` matches
    /// `file_pattern`, expanding along inverse `imports`/`calls`/`extends`/
    /// `implements` edges up to `max_depth` hops (spec §4.4).
    pub async fn blast_radius(&self, file_pattern: &str, max_depth: ValidatedDepth) -> Result<Vec<BlastRadiusRow>> {
        let pattern = format!("%{}%", crate::validation::query::escape_like(file_pattern));
        let depth = max_depth.get() as i64;
        self.store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "WITH RECURSIVE closure(id, depth) AS (
                        SELECT id, 0 FROM code_entities WHERE file_path LIKE ?1 ESCAPE '\\'
                        UNION
                        SELECT e.id, c.depth + 1
                        FROM closure c
                        JOIN code_relationships r ON r.to_id = c.id
                        JOIN code_entities e ON e.id = r.from_id
                        WHERE r.rel_type IN ('imports', 'calls', 'extends', 'implements')
                          AND c.depth < ?2
                     )
                     SELECT e.id, e.package, e.file_path, e.kind, e.name, e.line, e.exported, MIN(c.depth) AS depth
                     FROM closure c
                     JOIN code_entities e ON e.id = c.id
                     GROUP BY e.id
                     ORDER BY depth, e.file_path, e.line",
                )?;
                let rows = stmt.query_map(rusqlite::params![pattern, depth], |row| {
                    Ok(BlastRadiusRow {
                        entity: row_to_entity(row)?,
                        depth: row.get::<_, i64>(7)? as u32,
                    })
                })?;
                collect(rows)
            })
            .await
    }

    /// Symbol search with an optional kind filter (validated against the
    /// closed `CodeEntityKind` enum).
    pub async fn find_entities(
        &self,
        name_pattern: &str,
        kind: Option<&str>,
        limit: ValidatedLimit,
    ) -> Result<Vec<CodeEntityRow>> {
        let kind = kind.map(CodeEntityKind::parse).transpose()?;
        let pattern = format!("%{}%", crate::validation::query::escape_like(name_pattern));
        let limit = limit.get() as i64;
        self.store
            .with_connection(move |conn| {
                let mut sql = String::from(
                    "SELECT id, package, file_path, kind, name, line, exported FROM code_entities WHERE name LIKE ?1 ESCAPE '\\'",
                );
                if kind.is_some() {
                    sql.push_str(" AND kind = ?2 ORDER BY file_path, line LIMIT ?3");
                } else {
                    sql.push_str(" ORDER BY file_path, line LIMIT ?2");
                }
                let mut stmt = conn.prepare(&sql)?;
                let rows = if let Some(kind) = &kind {
                    stmt.query_map(rusqlite::params![pattern, kind.as_str(), limit], row_to_entity)?
                } else {
                    stmt.query_map(rusqlite::params![pattern, limit], row_to_entity)?
                };
                collect(rows)
            })
            .await
    }

    /// All `exported = true` entities, optionally restricted to one package.
    pub async fn get_exports(&self, package: Option<&str>) -> Result<Vec<CodeEntityRow>> {
        let package = package.map(|p| p.to_string());
        self.store
            .with_connection(move |conn| {
                let rows = if let Some(package) = &package {
                    let mut stmt = conn.prepare(
                        "SELECT id, package, file_path, kind, name, line, exported FROM code_entities
                         WHERE exported = 1 AND package = ?1 ORDER BY file_path, line",
                    )?;
                    stmt.query_map([package], row_to_entity)?.collect::<rusqlite::Result<Vec<_>>>()?
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT id, package, file_path, kind, name, line, exported FROM code_entities
                         WHERE exported = 1 ORDER BY file_path, line",
                    )?;
                    stmt.query_map([], row_to_entity)?.collect::<rusqlite::Result<Vec<_>>>()?
                };
                Ok(rows)
            })
            .await
    }

    /// Exact-match variant of `what_calls`, restricted to `function` targets.
    pub async fn get_callers(&self, exact_name: &str) -> Result<Vec<CodeEntityRow>> {
        let name = exact_name.to_string();
        self.store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT caller.id, caller.package, caller.file_path, caller.kind, caller.name, caller.line, caller.exported
                     FROM code_relationships r
                     JOIN code_entities caller ON caller.id = r.from_id
                     JOIN code_entities callee ON callee.id = r.to_id
                     WHERE r.rel_type = 'calls' AND callee.name = ?1 AND callee.kind = 'function'
                     ORDER BY caller.file_path, caller.line",
                )?;
                let rows = stmt.query_map([&name], row_to_entity)?;
                collect(rows)
            })
            .await
    }

    /// Totals, per-kind entity/relationship counts, and per-package entity
    /// counts, optionally restricted to one package.
    pub async fn get_summary(&self, package: Option<&str>) -> Result<GraphSummary> {
        let package = package.map(|p| p.to_string());
        self.store
            .with_connection(move |conn| {
                let entity_filter = package.as_deref();
                let total_entities: i64 = match entity_filter {
                    Some(pkg) => conn.query_row(
                        "SELECT COUNT(*) FROM code_entities WHERE package = ?1",
                        [pkg],
                        |r| r.get(0),
                    )?,
                    None => conn.query_row("SELECT COUNT(*) FROM code_entities", [], |r| r.get(0))?,
                };

                let total_relationships: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM code_relationships",
                    [],
                    |r| r.get(0),
                )?;

                let entities_by_kind = query_pairs(
                    conn,
                    match entity_filter {
                        Some(_) => "SELECT kind, COUNT(*) FROM code_entities WHERE package = ?1 GROUP BY kind",
                        None => "SELECT kind, COUNT(*) FROM code_entities GROUP BY kind",
                    },
                    entity_filter,
                )?;

                let relationships_by_type =
                    query_pairs(conn, "SELECT rel_type, COUNT(*) FROM code_relationships GROUP BY rel_type", None)?;

                let entities_by_package =
                    query_pairs(conn, "SELECT package, COUNT(*) FROM code_entities GROUP BY package", None)?;

                Ok(GraphSummary {
                    total_entities,
                    total_relationships,
                    entities_by_kind,
                    relationships_by_type,
                    entities_by_package,
                })
            })
            .await
    }
}

fn query_pairs(conn: &rusqlite::Connection, sql: &str, param: Option<&str>) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = if let Some(param) = param {
        stmt.query_map([param], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    Ok(rows)
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<CodeEntityRow> {
    Ok(CodeEntityRow {
        id: row.get(0)?,
        package: row.get(1)?,
        file_path: row.get(2)?,
        kind: row.get(3)?,
        name: row.get(4)?,
        line: row.get(5)?,
        exported: row.get::<_, i64>(6)? != 0,
    })
}

/// Same column layout as `row_to_entity`, but column 0 is the relationship's
/// raw `to_id` and the `dep.*` columns may be null (an unresolved `imports`
/// target, stored as an `external:{module}` sentinel with no entity row).
fn row_to_entity_or_external(row: &rusqlite::Row) -> rusqlite::Result<CodeEntityRow> {
    let to_id: String = row.get(0)?;
    let package: Option<String> = row.get(1)?;
    match package {
        Some(package) => Ok(CodeEntityRow {
            id: to_id,
            package,
            file_path: row.get(2)?,
            kind: row.get(3)?,
            name: row.get(4)?,
            line: row.get(5)?,
            exported: row.get::<_, i64>(6)? != 0,
        }),
        None => {
            let name = to_id.strip_prefix("external:").unwrap_or(&to_id).to_string();
            Ok(CodeEntityRow {
                id: to_id,
                package: String::new(),
                file_path: String::new(),
                kind: "external".to_string(),
                name,
                line: None,
                exported: false,
            })
        }
    }
}

fn collect<T>(rows: rusqlite::MappedRows<impl FnMut(&rusqlite::Row) -> rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO code_entities (id, package, file_path, kind, name, line, exported) VALUES
                     ('pkg:a.ts:function:a', 'pkg', 'a.ts', 'function', 'a', 1, 1),
                     ('pkg:b.ts:function:b', 'pkg', 'b.ts', 'function', 'b', 1, 1),
                     ('pkg:c.ts:function:c', 'pkg', 'c.ts', 'function', 'c', 1, 0)",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO code_relationships (from_id, to_id, rel_type) VALUES
                     ('pkg:a.ts:function:a', 'pkg:b.ts:function:b', 'calls'),
                     ('pkg:b.ts:function:b', 'pkg:c.ts:function:c', 'calls'),
                     ('pkg:c.ts:function:c', 'pkg:a.ts:function:a', 'calls')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn what_calls_finds_direct_callers() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let callers = query.what_calls("b").await.unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].name, "a");
    }

    #[tokio::test]
    async fn blast_radius_is_cycle_safe() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let rows = query
            .blast_radius("a.ts", ValidatedDepth::new(5).unwrap())
            .await
            .unwrap();
        let ids: std::collections::HashSet<_> = rows.iter().map(|r| r.entity.id.clone()).collect();
        assert_eq!(ids.len(), rows.len(), "cycle must not duplicate an entity");
        assert!(ids.contains("pkg:c.ts:function:c"));
    }

    #[tokio::test]
    async fn what_depends_on_surfaces_external_import_sentinel() {
        let store = seeded_store().await;
        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO code_relationships (from_id, to_id, rel_type) VALUES
                     ('pkg:a.ts:function:a', 'external:lodash', 'imports')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let query = GraphQuery::new(store);
        let deps = query.what_depends_on("a").await.unwrap();
        let external = deps
            .iter()
            .find(|d| d.entity.id == "external:lodash")
            .expect("unresolved import must surface, not be dropped");
        assert_eq!(external.rel_type, "imports");
        assert_eq!(external.entity.name, "lodash");
        assert_eq!(external.entity.kind, "external");
    }

    #[tokio::test]
    async fn get_summary_counts_totals() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let summary = query.get_summary(None).await.unwrap();
        assert_eq!(summary.total_entities, 3);
        assert_eq!(summary.total_relationships, 3);
    }
}

// Property: on a cyclic import graph, `blast_radius` never reports an entity
// twice and never reports a depth past the requested `max_depth`, for any
// depth bound (spec §8: "blast radius dedupes a cyclic import graph").
#[cfg(test)]
mod blast_radius_properties {
    use super::*;
    use proptest::prelude::*;
    use tokio::runtime::Runtime;

    proptest! {
        #[test]
        fn blast_radius_has_no_duplicates_and_respects_max_depth(depth in 1u32..8) {
            let rt = Runtime::new().unwrap();
            let rows = rt.block_on(async {
                let store = super::tests::seeded_store().await;
                let query = GraphQuery::new(store);
                query
                    .blast_radius("a.ts", ValidatedDepth::new(depth).unwrap())
                    .await
                    .unwrap()
            });

            let ids: std::collections::HashSet<_> = rows.iter().map(|r| r.entity.id.clone()).collect();
            prop_assert_eq!(ids.len(), rows.len());
            prop_assert!(rows.iter().all(|r| r.depth <= depth));
        }
    }
}
