//! `Docs` (spec §4.7): Markdown/spec indexing with content-hash gating,
//! heading-boundary splitting, `IN_DOC` linking, search, and cleanup of
//! stale index rows. Grounded on the teacher's `builders.rs` `DocumentBuilder`
//! for the section-splitting shape and on `store/schema.rs`'s `doc_index`
//! table for the hash-gate itself.

use crate::embedder::{decode_vector, dot, encode_vector, normalize_l2};
use crate::interfaces::Embedder;
use crate::knowledge::{ensure_file, upsert_edge};
use crate::store::Store;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSectionSplit {
    pub heading: String,
    pub content: String,
    pub start_line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub enum IndexStatus {
    Unchanged,
    Indexed { sections: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocSearchHit {
    pub id: String,
    pub entity_type: String,
    pub heading: Option<String>,
    pub content: String,
    pub score: f32,
}

/// Split `text` into `(heading, content, startLine)` sections along ATX
/// heading boundaries. A leading preamble before the first heading becomes
/// its own section with `heading = ""`.
pub fn split_sections(text: &str) -> Vec<DocSectionSplit> {
    let mut sections = Vec::new();
    let mut current_heading = String::new();
    let mut current_start = 1u32;
    let mut current_lines: Vec<&str> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if is_atx_heading(line) {
            if !current_lines.is_empty() || !current_heading.is_empty() || line_no > 1 {
                sections.push(DocSectionSplit {
                    heading: current_heading.clone(),
                    content: current_lines.join("\n"),
                    start_line: current_start,
                });
            }
            current_heading = line.trim_start_matches('#').trim().to_string();
            current_start = line_no;
            current_lines = vec![line];
        } else {
            current_lines.push(line);
        }
    }
    sections.push(DocSectionSplit {
        heading: current_heading,
        content: current_lines.join("\n"),
        start_line: current_start,
    });

    sections.into_iter().filter(|s| !s.content.trim().is_empty()).collect()
}

fn is_atx_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return false;
    }
    match trimmed.as_bytes().get(hashes) {
        Some(b) => b.is_ascii_whitespace(),
        None => true,
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Docs {
    store: Store,
    embedder: Arc<dyn Embedder>,
}

impl Docs {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Index one file: hash-gate unless `force`, split into sections,
    /// replace old DocSection rows, embed each section, link to the File
    /// shadow entity.
    #[instrument(skip(self, content, now))]
    pub async fn index_file(&self, file_path: &str, content: &str, spec_version: Option<String>, force: bool, now: i64) -> Result<IndexStatus> {
        let hash = content_hash(content);
        let file_path_owned = file_path.to_string();

        if !force {
            let existing: Option<String> = self
                .store
                .with_connection({
                    let file_path = file_path_owned.clone();
                    move |conn| {
                        Ok(conn
                            .query_row("SELECT content_hash FROM doc_index WHERE file_path = ?1", [&file_path], |r| r.get(0))
                            .optional()?)
                    }
                })
                .await?;
            if existing.as_deref() == Some(hash.as_str()) {
                return Ok(IndexStatus::Unchanged);
            }
        }

        let sections = split_sections(content);

        let file_path_for_tx = file_path_owned.clone();
        let hash_for_tx = hash.clone();
        let section_ids: Vec<(String, String)> = self
            .store
            .transaction(move |tx| {
                tx.execute(
                    "DELETE FROM knowledge_entities WHERE entity_type = 'doc_section' AND file_path = ?1",
                    params![file_path_for_tx],
                )?;

                let file_id = ensure_file(tx, &file_path_for_tx, now)?;
                let mut ids = Vec::new();
                for (idx, section) in sections.iter().enumerate() {
                    let id = format!("doc_section:{file_path_for_tx}:{idx}");
                    tx.execute(
                        "INSERT INTO knowledge_entities (id, entity_type, heading, content, location, file_path, spec_version, created_at)
                         VALUES (?1, 'doc_section', ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            section.heading,
                            section.content,
                            section.start_line,
                            file_path_for_tx,
                            spec_version,
                            now,
                        ],
                    )?;
                    upsert_edge(tx, &id, &file_id, "IN_DOC")?;
                    ids.push((id, section.content.clone()));
                }

                tx.execute(
                    "INSERT INTO doc_index (file_path, content_hash) VALUES (?1, ?2)
                     ON CONFLICT(file_path) DO UPDATE SET content_hash = excluded.content_hash",
                    params![file_path_for_tx, hash_for_tx],
                )?;

                Ok(ids)
            })
            .await?;

        for (id, content) in &section_ids {
            self.embed_section(id, content).await?;
        }

        Ok(IndexStatus::Indexed { sections: section_ids.len() })
    }

    async fn embed_section(&self, id: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let mut vector = self.embedder.embed(content).await?;
        normalize_l2(&mut vector);
        let model_id = self.embedder.model_id().to_string();
        let dimension = self.embedder.dimension() as i64;
        let blob = encode_vector(&vector);
        let id = id.to_string();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO knowledge_embeddings (entity_id, model_id, dimension, vector)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(entity_id) DO UPDATE SET model_id=excluded.model_id, dimension=excluded.dimension, vector=excluded.vector",
                    params![id, model_id, dimension, blob],
                )?;
                Ok(())
            })
            .await
    }

    /// Rank DocSection and CodeDoc rows by cosine similarity to `query`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<DocSearchHit>> {
        crate::validation::query::validate_search_query(query)?;
        crate::validation::numeric::validate_limit(limit)?;

        let mut query_vector = self.embedder.embed(query).await?;
        normalize_l2(&mut query_vector);
        let model_id = self.embedder.model_id().to_string();

        let mut scored: Vec<(DocSearchHit, Vec<u8>)> = self
            .store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.entity_type, e.heading, e.content, v.vector
                     FROM knowledge_entities e
                     JOIN knowledge_embeddings v ON v.entity_id = e.id
                     WHERE e.entity_type IN ('doc_section', 'code_doc') AND v.model_id = ?1",
                )?;
                let rows = stmt.query_map([&model_id], |row| {
                    Ok((
                        DocSearchHit {
                            id: row.get(0)?,
                            entity_type: row.get(1)?,
                            heading: row.get(2)?,
                            content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                            score: 0.0,
                        },
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        for (hit, blob) in scored.iter_mut() {
            let vector = decode_vector(blob);
            hit.score = dot(&query_vector, &vector);
        }
        let mut hits: Vec<DocSearchHit> = scored.into_iter().map(|(hit, _)| hit).collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// DocSections and CodeDocs linked to `entity_id` through `code_entity_id`.
    pub async fn for_code(&self, entity_id: &str) -> Result<Vec<DocSearchHit>> {
        let entity_id = entity_id.to_string();
        self.store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, entity_type, heading, content FROM knowledge_entities
                     WHERE entity_type = 'code_doc' AND code_entity_id = ?1",
                )?;
                let rows = stmt.query_map([&entity_id], |row| {
                    Ok(DocSearchHit {
                        id: row.get(0)?,
                        entity_type: row.get(1)?,
                        heading: row.get(2)?,
                        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        score: 0.0,
                    })
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Remove DocSection rows and `doc_index` entries whose source file no
    /// longer exists. Existence checks happen outside the transaction,
    /// deletions inside (spec §4.7).
    pub async fn clean(&self) -> Result<usize> {
        let paths: Vec<String> = self
            .store
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT file_path FROM doc_index")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let mut missing = Vec::new();
        for path in paths {
            if tokio::fs::metadata(&path).await.is_err() {
                missing.push(path);
            }
        }

        let removed = missing.len();
        if missing.is_empty() {
            return Ok(0);
        }

        self.store
            .transaction(move |tx| {
                for path in &missing {
                    tx.execute(
                        "DELETE FROM knowledge_entities WHERE entity_type = 'doc_section' AND file_path = ?1",
                        params![path],
                    )?;
                    tx.execute("DELETE FROM doc_index WHERE file_path = ?1", params![path])?;
                }
                Ok(())
            })
            .await?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;

    #[test]
    fn splits_on_atx_headings_with_preamble() {
        let text = "intro line\n# Heading One\nbody one\n## Heading Two\nbody two\n";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, "");
        assert_eq!(sections[1].heading, "Heading One");
        assert_eq!(sections[2].heading, "Heading Two");
    }

    #[tokio::test]
    async fn unchanged_content_is_skipped_without_force() {
        let store = Store::open_in_memory().await.unwrap();
        let docs = Docs::new(store, Arc::new(HashingEmbedder::default_model()));
        let content = "# Title\nbody";

        let first = docs.index_file("doc.md", content, None, false, 100).await.unwrap();
        assert!(matches!(first, IndexStatus::Indexed { sections: 1 }));

        let second = docs.index_file("doc.md", content, None, false, 200).await.unwrap();
        assert!(matches!(second, IndexStatus::Unchanged));
    }

    #[tokio::test]
    async fn changed_content_reindexes() {
        let store = Store::open_in_memory().await.unwrap();
        let docs = Docs::new(store, Arc::new(HashingEmbedder::default_model()));

        docs.index_file("doc.md", "# Title\nbody one", None, false, 100).await.unwrap();
        let status = docs.index_file("doc.md", "# Title\nbody two", None, false, 200).await.unwrap();
        assert!(matches!(status, IndexStatus::Indexed { sections: 1 }));
    }
}
