//! `GraphStore` (spec §4.3): transactional full and incremental writers for
//! the code graph, plus the post-commit CodeDoc side effect. Grounded on the
//! teacher's `symbol_storage.rs` write-path shape (delete-then-bulk-insert
//! for full reindex, per-file delete for incremental).

use crate::embedder::{encode_vector, normalize_l2};
use crate::interfaces::{Clock, Embedder};
use crate::parser::FileOutcome;
use crate::store::Store;
use anyhow::Result;
use rusqlite::params;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

pub struct GraphStore {
    store: Store,
    embedder: Arc<dyn Embedder>,
}

impl GraphStore {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Full-mode write (spec §4.3): delete everything belonging to
    /// `package`, then bulk-insert the parser's output.
    #[instrument(skip(self, outcome, clock))]
    pub async fn write_full(&self, package: &str, outcome: FileOutcome, clock: &dyn Clock) -> Result<()> {
        let ctx = crate::observability::OperationContext::new("graph_store.write_full");
        let package_name = package.to_string();
        let entity_count = outcome.entities.len();
        let result = self.write_full_inner(package, outcome, clock).await;
        crate::observability::log_operation(
            &ctx,
            &crate::observability::Operation::GraphStoreWrite {
                package: package_name,
                incremental: false,
                entities: entity_count,
            },
            &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        crate::observability::record_metric(crate::observability::MetricType::Counter {
            name: "graph_store.entities_written",
            value: entity_count as u64,
        });
        result
    }

    async fn write_full_inner(&self, package: &str, outcome: FileOutcome, clock: &dyn Clock) -> Result<()> {
        let package = package.to_string();
        let now = clock.now_millis();
        let new_jsdocs = self
            .store
            .transaction(move |tx| {
                tx.execute(
                    "DELETE FROM code_relationships WHERE from_id IN (SELECT id FROM code_entities WHERE package = ?1)",
                    params![package],
                )?;
                tx.execute(
                    "DELETE FROM code_relationships WHERE to_id IN (SELECT id FROM code_entities WHERE package = ?1)",
                    params![package],
                )?;
                tx.execute("DELETE FROM code_entities WHERE package = ?1", params![package])?;
                tx.execute("DELETE FROM code_file_metadata WHERE package = ?1", params![package])?;

                write_entities(tx, &package, &outcome.entities)?;
                write_relationships(tx, &outcome.relationships)?;
                upsert_file_metadata(tx, &package, &outcome.entities, now)?;

                Ok(jsdoc_entities(&package, &outcome.entities))
            })
            .await?;

        self.index_code_docs(new_jsdocs).await?;
        Ok(())
    }

    /// Incremental-mode write (spec §4.3): delete only entities/edges for
    /// `changed ∪ deleted` files, insert the parser's output, and upsert or
    /// drop per-file metadata accordingly.
    #[instrument(skip(self, outcome, clock))]
    pub async fn write_incremental(
        &self,
        package: &str,
        outcome: FileOutcome,
        deleted_files: Vec<String>,
        clock: &dyn Clock,
    ) -> Result<()> {
        let ctx = crate::observability::OperationContext::new("graph_store.write_incremental");
        let package_name = package.to_string();
        let entity_count = outcome.entities.len();
        let result = self
            .write_incremental_inner(package, outcome, deleted_files, clock)
            .await;
        crate::observability::log_operation(
            &ctx,
            &crate::observability::Operation::GraphStoreWrite {
                package: package_name,
                incremental: true,
                entities: entity_count,
            },
            &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        result
    }

    async fn write_incremental_inner(
        &self,
        package: &str,
        outcome: FileOutcome,
        deleted_files: Vec<String>,
        clock: &dyn Clock,
    ) -> Result<()> {
        let package = package.to_string();
        let now = clock.now_millis();
        let changed_files: HashSet<String> = outcome.entities.iter().map(|e| e.file_path.clone()).collect();
        let mut affected: HashSet<String> = changed_files.clone();
        affected.extend(deleted_files.iter().cloned());

        let new_jsdocs = self
            .store
            .transaction(move |tx| {
                for file_path in &affected {
                    tx.execute(
                        "DELETE FROM code_relationships
                         WHERE from_id IN (SELECT id FROM code_entities WHERE package = ?1 AND file_path = ?2)",
                        params![package, file_path],
                    )?;
                    tx.execute(
                        "DELETE FROM code_relationships
                         WHERE to_id IN (SELECT id FROM code_entities WHERE package = ?1 AND file_path = ?2)",
                        params![package, file_path],
                    )?;
                    tx.execute(
                        "DELETE FROM code_entities WHERE package = ?1 AND file_path = ?2",
                        params![package, file_path],
                    )?;
                }

                write_entities(tx, &package, &outcome.entities)?;
                write_relationships(tx, &outcome.relationships)?;
                upsert_file_metadata(tx, &package, &outcome.entities, now)?;

                for file_path in &deleted_files {
                    tx.execute(
                        "DELETE FROM code_file_metadata WHERE package = ?1 AND file_path = ?2",
                        params![package, file_path],
                    )?;
                }

                Ok(jsdoc_entities(&package, &outcome.entities))
            })
            .await?;

        self.index_code_docs(new_jsdocs).await?;
        Ok(())
    }

    /// Create/replace a CodeDoc entity and its embedding for every
    /// newly-written entity with a non-empty JSDoc block. Runs after the
    /// write transaction commits, never inside it (spec §4.3, §5).
    async fn index_code_docs(&self, jsdocs: Vec<(String, String, String)>) -> Result<()> {
        for (entity_id, code_area, jsdoc) in jsdocs {
            let mut vector = self.embedder.embed(&jsdoc).await?;
            normalize_l2(&mut vector);
            let blob = encode_vector(&vector);
            let model_id = self.embedder.model_id().to_string();
            let dimension = self.embedder.dimension() as i64;
            let doc_id = format!("code_doc:{entity_id}");

            self.store
                .transaction(move |tx| {
                    tx.execute(
                        "INSERT INTO knowledge_entities (id, entity_type, content, code_area, code_entity_id, created_at)
                         VALUES (?1, 'code_doc', ?2, ?3, ?4, 0)
                         ON CONFLICT(id) DO UPDATE SET content=excluded.content, code_area=excluded.code_area",
                        params![doc_id, jsdoc, code_area, entity_id],
                    )?;
                    tx.execute(
                        "INSERT INTO knowledge_embeddings (entity_id, model_id, dimension, vector)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(entity_id) DO UPDATE SET model_id=excluded.model_id, dimension=excluded.dimension, vector=excluded.vector",
                        params![doc_id, model_id, dimension, blob],
                    )?;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }
}

fn write_entities(tx: &rusqlite::Transaction, package: &str, entities: &[crate::parser::entities::RawEntity]) -> Result<()> {
    for entity in entities {
        let id = entity_id(package, entity);
        tx.execute(
            "INSERT INTO code_entities (id, package, file_path, kind, name, line, exported, metadata, jsdoc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET line=excluded.line, exported=excluded.exported, metadata=excluded.metadata, jsdoc=excluded.jsdoc",
            params![
                id,
                package,
                entity.file_path,
                entity.kind,
                entity.name,
                entity.line,
                entity.exported as i64,
                entity.metadata.to_string(),
                entity.jsdoc,
            ],
        )?;
    }
    Ok(())
}

fn write_relationships(tx: &rusqlite::Transaction, relationships: &[crate::parser::entities::RawRelationship]) -> Result<()> {
    for rel in relationships {
        tx.execute(
            "INSERT INTO code_relationships (from_id, to_id, rel_type, metadata)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(from_id, to_id, rel_type) DO NOTHING",
            params![rel.from_id, rel.to_id, rel.rel_type, rel.metadata.as_ref().map(|m| m.to_string())],
        )?;
    }
    Ok(())
}

fn upsert_file_metadata(
    tx: &rusqlite::Transaction,
    package: &str,
    entities: &[crate::parser::entities::RawEntity],
    now: i64,
) -> Result<()> {
    let mut per_file: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for entity in entities {
        *per_file.entry(entity.file_path.as_str()).or_insert(0) += 1;
    }
    for (file_path, entity_count) in per_file {
        tx.execute(
            "INSERT INTO code_file_metadata (package, file_path, mtime_ms, last_parsed_at, entity_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(package, file_path) DO UPDATE SET mtime_ms=excluded.mtime_ms, last_parsed_at=excluded.last_parsed_at, entity_count=excluded.entity_count",
            params![package, file_path, now, now, entity_count as i64],
        )?;
    }
    Ok(())
}

fn entity_id(package: &str, entity: &crate::parser::entities::RawEntity) -> String {
    if entity.kind == "file" {
        format!("{package}:file:{}", entity.file_path)
    } else {
        format!("{package}:{}:{}:{}", entity.file_path, entity.kind, entity.name)
    }
}

/// (entity_id, code_area, jsdoc) tuples for every entity in this write whose
/// JSDoc block is non-empty. `code_area` defaults to the package name.
fn jsdoc_entities(package: &str, entities: &[crate::parser::entities::RawEntity]) -> Vec<(String, String, String)> {
    entities
        .iter()
        .filter_map(|e| {
            let jsdoc = e.jsdoc.as_ref()?;
            if jsdoc.trim().is_empty() {
                return None;
            }
            Some((entity_id(package, e), package.to_string(), jsdoc.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use crate::interfaces::FixedClock;
    use crate::parser::entities::RawEntity;

    fn sample_outcome() -> FileOutcome {
        FileOutcome {
            entities: vec![
                RawEntity {
                    file_path: "util.ts".into(),
                    kind: "file".into(),
                    name: "util.ts".into(),
                    line: 0,
                    exported: false,
                    metadata: serde_json::Value::Null,
                    jsdoc: None,
                },
                RawEntity {
                    file_path: "util.ts".into(),
                    kind: "function".into(),
                    name: "helper".into(),
                    line: 1,
                    exported: true,
                    metadata: serde_json::json!({}),
                    jsdoc: Some("/** Helps. */".into()),
                },
            ],
            relationships: vec![],
            stats: Default::default(),
        }
    }

    #[tokio::test]
    async fn full_write_then_rewrite_replaces_entities() {
        let store = Store::open_in_memory().await.unwrap();
        let graph = GraphStore::new(store.clone(), Arc::new(HashingEmbedder::default_model()));
        let clock = FixedClock(1000);

        graph.write_full("pkg", sample_outcome(), &clock).await.unwrap();
        let count: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM code_entities", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 2);

        graph.write_full("pkg", sample_outcome(), &clock).await.unwrap();
        let count_after: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM code_entities", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count_after, 2);
    }

    #[tokio::test]
    async fn jsdoc_entity_produces_code_doc() {
        let store = Store::open_in_memory().await.unwrap();
        let graph = GraphStore::new(store.clone(), Arc::new(HashingEmbedder::default_model()));
        let clock = FixedClock(1000);

        graph.write_full("pkg", sample_outcome(), &clock).await.unwrap();
        let count: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM knowledge_entities WHERE entity_type = 'code_doc'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn incremental_write_deletes_only_affected_files() {
        let store = Store::open_in_memory().await.unwrap();
        let graph = GraphStore::new(store.clone(), Arc::new(HashingEmbedder::default_model()));
        let clock = FixedClock(1000);

        graph.write_full("pkg", sample_outcome(), &clock).await.unwrap();

        let incremental = FileOutcome {
            entities: vec![RawEntity {
                file_path: "util.ts".into(),
                kind: "file".into(),
                name: "util.ts".into(),
                line: 0,
                exported: false,
                metadata: serde_json::Value::Null,
                jsdoc: None,
            }],
            relationships: vec![],
            stats: Default::default(),
        };
        graph
            .write_incremental("pkg", incremental, vec![], &clock)
            .await
            .unwrap();

        let count: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM code_entities WHERE file_path = 'util.ts'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reparsing_removes_edges_pointing_at_the_removed_callee() {
        let store = Store::open_in_memory().await.unwrap();
        let graph = GraphStore::new(store.clone(), Arc::new(HashingEmbedder::default_model()));
        let clock = FixedClock(1000);

        let initial = FileOutcome {
            entities: vec![
                RawEntity {
                    file_path: "a.ts".into(),
                    kind: "file".into(),
                    name: "a.ts".into(),
                    line: 0,
                    exported: false,
                    metadata: serde_json::Value::Null,
                    jsdoc: None,
                },
                RawEntity {
                    file_path: "a.ts".into(),
                    kind: "function".into(),
                    name: "caller".into(),
                    line: 1,
                    exported: true,
                    metadata: serde_json::json!({}),
                    jsdoc: None,
                },
                RawEntity {
                    file_path: "b.ts".into(),
                    kind: "file".into(),
                    name: "b.ts".into(),
                    line: 0,
                    exported: false,
                    metadata: serde_json::Value::Null,
                    jsdoc: None,
                },
                RawEntity {
                    file_path: "b.ts".into(),
                    kind: "function".into(),
                    name: "callee".into(),
                    line: 1,
                    exported: true,
                    metadata: serde_json::json!({}),
                    jsdoc: None,
                },
            ],
            relationships: vec![crate::parser::entities::RawRelationship {
                from_id: "pkg:a.ts:function:caller".into(),
                to_id: "pkg:b.ts:function:callee".into(),
                rel_type: "calls".into(),
                metadata: None,
            }],
            stats: Default::default(),
        };
        graph.write_full("pkg", initial, &clock).await.unwrap();

        // b.ts is reparsed without `callee` (e.g. the function was removed or renamed).
        let reparsed_b = FileOutcome {
            entities: vec![RawEntity {
                file_path: "b.ts".into(),
                kind: "file".into(),
                name: "b.ts".into(),
                line: 0,
                exported: false,
                metadata: serde_json::Value::Null,
                jsdoc: None,
            }],
            relationships: vec![],
            stats: Default::default(),
        };
        graph
            .write_incremental("pkg", reparsed_b, vec![], &clock)
            .await
            .unwrap();

        let count: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM code_relationships", [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0, "dangling edge to the removed callee must not survive reparse");
    }
}
