//! The `Knowledge` component (spec §4.6): Learning/Pattern/Mistake storage,
//! structured filter queries, and top-k semantic search with optional
//! filter conjunction — plus the CodeArea/File/Topic shadow entities those
//! records reference.

use crate::embedder::{decode_vector, dot, encode_vector, normalize_l2};
use crate::error::KnowledgeError;
use crate::interfaces::{Clock, Embedder};
use crate::store::Store;
use crate::types::ValidatedConfidence;
use crate::validation::numeric::validate_limit;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub content: String,
    pub source_issue: Option<String>,
    pub code_area: Option<String>,
    pub file_path: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub description: String,
    pub code_area: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mistake {
    pub id: String,
    pub description: String,
    pub how_fixed: String,
    pub file_path: Option<String>,
    pub created_at: i64,
}

/// Structured filter for `Knowledge::query` (spec §4.6). `keywords` is a
/// conjunction: every substring must match, case-insensitively, against
/// `content`.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilter {
    pub code_area: Option<String>,
    pub file_path: Option<String>,
    pub keywords: Vec<String>,
    pub issue_number: Option<String>,
    pub limit: Option<usize>,
}

/// Options for `Knowledge::search_similar`.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    pub include_related: bool,
    pub code_area: Option<String>,
    pub file_path: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.0,
            include_related: false,
            code_area: None,
            file_path: None,
        }
    }
}

/// A search hit: the matching learning, its cosine-similarity relevance
/// score, and (when requested) related patterns/mistakes.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarLearning {
    pub learning: Learning,
    pub score: f32,
    pub related_patterns: Vec<Pattern>,
    pub related_mistakes: Vec<Mistake>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub learnings: i64,
    pub patterns: i64,
    pub mistakes: i64,
    pub code_areas: i64,
    pub files: i64,
}

pub struct Knowledge {
    store: Store,
    embedder: Arc<dyn Embedder>,
}

impl Knowledge {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Upsert learnings within one transaction, creating/merging the
    /// CodeArea and File shadow entities each one references and emitting
    /// `ABOUT` / `IN_FILE` edges. Learnings are immutable after creation
    /// (spec §3.1), so this is an insert-or-replace keyed by id, not a
    /// partial update.
    #[instrument(skip(self, learnings, clock))]
    pub async fn store_learnings(&self, learnings: Vec<Learning>, clock: &dyn Clock) -> Result<()> {
        for learning in &learnings {
            if let Some(confidence) = learning.confidence {
                ValidatedConfidence::new(confidence)?;
            }
            if learning.content.trim().is_empty() {
                return Err(anyhow::anyhow!(KnowledgeError::invalid_input(
                    "learning content cannot be empty"
                )));
            }
        }
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                for learning in &learnings {
                    tx.execute(
                        "INSERT INTO knowledge_entities
                            (id, entity_type, content, source_issue, code_area, file_path, confidence, created_at)
                         VALUES (?1, 'learning', ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(id) DO UPDATE SET
                            content=excluded.content,
                            source_issue=excluded.source_issue,
                            code_area=excluded.code_area,
                            file_path=excluded.file_path,
                            confidence=excluded.confidence",
                        params![
                            learning.id,
                            learning.content,
                            learning.source_issue,
                            learning.code_area,
                            learning.file_path,
                            learning.confidence,
                            now,
                        ],
                    )?;

                    if let Some(area) = &learning.code_area {
                        let area_id = ensure_code_area(tx, area, now)?;
                        upsert_edge(tx, &learning.id, &area_id, "ABOUT")?;
                    }
                    if let Some(path) = &learning.file_path {
                        let file_id = ensure_file(tx, path, now)?;
                        upsert_edge(tx, &learning.id, &file_id, "IN_FILE")?;
                    }
                }
                Ok(())
            })
            .await
    }

    pub async fn store_pattern(&self, pattern: Pattern, clock: &dyn Clock) -> Result<()> {
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO knowledge_entities (id, entity_type, name, description, code_area, created_at)
                     VALUES (?1, 'pattern', ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET name=excluded.name, description=excluded.description, code_area=excluded.code_area",
                    params![pattern.id, pattern.name, pattern.description, pattern.code_area, now],
                )?;
                if let Some(area) = &pattern.code_area {
                    let area_id = ensure_code_area(tx, area, now)?;
                    upsert_edge(tx, &pattern.id, &area_id, "APPLIES_TO")?;
                }
                Ok(())
            })
            .await
    }

    pub async fn store_mistake(&self, mistake: Mistake, clock: &dyn Clock) -> Result<()> {
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO knowledge_entities (id, entity_type, description, how_fixed, file_path, created_at)
                     VALUES (?1, 'mistake', ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET description=excluded.description, how_fixed=excluded.how_fixed, file_path=excluded.file_path",
                    params![mistake.id, mistake.description, mistake.how_fixed, mistake.file_path, now],
                )?;
                if let Some(path) = &mistake.file_path {
                    let file_id = ensure_file(tx, path, now)?;
                    upsert_edge(tx, &mistake.id, &file_id, "IN_FILE")?;
                }
                Ok(())
            })
            .await
    }

    /// Structured filter query (spec §4.6). All `keywords` must match.
    pub async fn query(&self, filter: KnowledgeFilter) -> Result<Vec<Learning>> {
        let limit = filter.limit.unwrap_or(50);
        validate_limit(limit)?;
        self.store
            .with_connection(move |conn| {
                let mut sql = String::from(
                    "SELECT id, content, source_issue, code_area, file_path, confidence, created_at
                     FROM knowledge_entities WHERE entity_type = 'learning'",
                );
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(area) = &filter.code_area {
                    sql.push_str(" AND code_area = ?");
                    bound.push(Box::new(area.clone()));
                }
                if let Some(path) = &filter.file_path {
                    sql.push_str(" AND file_path = ?");
                    bound.push(Box::new(path.clone()));
                }
                if let Some(issue) = &filter.issue_number {
                    sql.push_str(" AND source_issue = ?");
                    bound.push(Box::new(issue.clone()));
                }
                for keyword in &filter.keywords {
                    sql.push_str(" AND LOWER(content) LIKE ? ESCAPE '\\'");
                    let pattern = format!(
                        "%{}%",
                        crate::validation::query::escape_like(&keyword.to_lowercase())
                    );
                    bound.push(Box::new(pattern));
                }
                sql.push_str(" ORDER BY created_at DESC LIMIT ?");
                bound.push(Box::new(limit as i64));

                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params.as_slice(), row_to_learning)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Top-k similarity search (spec §4.6, §4.5): embed `text`, return
    /// Learning rows with cosine similarity >= `threshold`, sorted
    /// descending by score, optionally joined with related Patterns (same
    /// CodeArea) and Mistakes (same File).
    pub async fn search_similar(&self, text: &str, options: SearchOptions) -> Result<Vec<SimilarLearning>> {
        crate::validation::query::validate_search_query(text)?;
        validate_limit(options.limit)?;

        let mut query_vector = self.embedder.embed(text).await?;
        normalize_l2(&mut query_vector);
        let model_id = self.embedder.model_id().to_string();
        let dimension = self.embedder.dimension() as i64;

        let code_area = options.code_area.clone();
        let file_path = options.file_path.clone();
        let limit = options.limit;
        let threshold = options.threshold;
        let include_related = options.include_related;

        let mut scored = self
            .store
            .with_connection(move |conn| {
                let mut sql = String::from(
                    "SELECT e.id, e.content, e.source_issue, e.code_area, e.file_path, e.confidence, e.created_at, v.vector
                     FROM knowledge_entities e
                     JOIN knowledge_embeddings v ON v.entity_id = e.id
                     WHERE e.entity_type = 'learning' AND v.model_id = ?1 AND v.dimension = ?2",
                );
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> =
                    vec![Box::new(model_id.clone()), Box::new(dimension)];
                if let Some(area) = &code_area {
                    sql.push_str(" AND e.code_area = ?");
                    bound.push(Box::new(area.clone()));
                }
                if let Some(path) = &file_path {
                    sql.push_str(" AND e.file_path = ?");
                    bound.push(Box::new(path.clone()));
                }

                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params.as_slice(), |row| {
                    let learning = row_to_learning(row)?;
                    let blob: Vec<u8> = row.get(7)?;
                    Ok((learning, blob))
                })?;

                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?
            .into_iter()
            .map(|(learning, blob)| {
                let vector = decode_vector(&blob);
                let score = dot(&query_vector, &vector);
                (learning, score)
            })
            .filter(|(_, score)| *score >= threshold)
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (learning, score) in scored {
            let (related_patterns, related_mistakes) = if include_related {
                self.related(&learning).await?
            } else {
                (Vec::new(), Vec::new())
            };
            results.push(SimilarLearning {
                learning,
                score,
                related_patterns,
                related_mistakes,
            });
        }
        Ok(results)
    }

    async fn related(&self, learning: &Learning) -> Result<(Vec<Pattern>, Vec<Mistake>)> {
        let code_area = learning.code_area.clone();
        let file_path = learning.file_path.clone();
        self.store
            .with_connection(move |conn| {
                let mut patterns = Vec::new();
                if let Some(area) = &code_area {
                    let mut stmt = conn.prepare(
                        "SELECT id, name, description, code_area, created_at
                         FROM knowledge_entities WHERE entity_type = 'pattern' AND code_area = ?1",
                    )?;
                    let rows = stmt.query_map([area], |row| {
                        Ok(Pattern {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            code_area: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?;
                    for row in rows {
                        patterns.push(row?);
                    }
                }

                let mut mistakes = Vec::new();
                if let Some(path) = &file_path {
                    let mut stmt = conn.prepare(
                        "SELECT id, description, how_fixed, file_path, created_at
                         FROM knowledge_entities WHERE entity_type = 'mistake' AND file_path = ?1",
                    )?;
                    let rows = stmt.query_map([path], |row| {
                        Ok(Mistake {
                            id: row.get(0)?,
                            description: row.get(1)?,
                            how_fixed: row.get(2)?,
                            file_path: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?;
                    for row in rows {
                        mistakes.push(row?);
                    }
                }
                Ok((patterns, mistakes))
            })
            .await
    }

    pub async fn list_areas(&self) -> Result<Vec<String>> {
        self.store
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT name FROM knowledge_entities WHERE entity_type = 'code_area' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        self.store
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT name FROM knowledge_entities WHERE entity_type = 'file' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn stats(&self) -> Result<KnowledgeStats> {
        self.store
            .with_connection(|conn| {
                let count = |entity_type: &str| -> rusqlite::Result<i64> {
                    conn.query_row(
                        "SELECT COUNT(*) FROM knowledge_entities WHERE entity_type = ?1",
                        [entity_type],
                        |row| row.get(0),
                    )
                };
                Ok(KnowledgeStats {
                    learnings: count("learning")?,
                    patterns: count("pattern")?,
                    mistakes: count("mistake")?,
                    code_areas: count("code_area")?,
                    files: count("file")?,
                })
            })
            .await
    }

    /// Compute and persist the embedding for a freshly-stored entity. Split
    /// out from `store_learnings` so callers control when the (potentially
    /// slow) embedder is invoked, per spec §5: never inside a write
    /// transaction.
    pub async fn embed_entity(&self, entity_id: &str, content: &str) -> Result<()> {
        let mut vector = self.embedder.embed(content).await?;
        normalize_l2(&mut vector);
        let model_id = self.embedder.model_id().to_string();
        let dimension = self.embedder.dimension() as i64;
        let entity_id = entity_id.to_string();
        let blob = encode_vector(&vector);
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO knowledge_embeddings (entity_id, model_id, dimension, vector)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(entity_id) DO UPDATE SET model_id=excluded.model_id, dimension=excluded.dimension, vector=excluded.vector",
                    params![entity_id, model_id, dimension, blob],
                )?;
                Ok(())
            })
            .await
    }
}

fn row_to_learning(row: &rusqlite::Row) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: row.get(0)?,
        content: row.get(1)?,
        source_issue: row.get(2)?,
        code_area: row.get(3)?,
        file_path: row.get(4)?,
        confidence: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Create-or-merge the CodeArea shadow entity for `name`, returning its id.
pub(crate) fn ensure_code_area(tx: &rusqlite::Transaction, name: &str, now: i64) -> Result<String> {
    let id = format!("code_area:{}", slugify(name));
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM knowledge_entities WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_none() {
        tx.execute(
            "INSERT INTO knowledge_entities (id, entity_type, name, created_at) VALUES (?1, 'code_area', ?2, ?3)",
            params![id, name, now],
        )?;
    }
    Ok(id)
}

/// Create-or-merge the File shadow entity for `path`, returning its id.
pub(crate) fn ensure_file(tx: &rusqlite::Transaction, path: &str, now: i64) -> Result<String> {
    let id = format!("file:{path}");
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM knowledge_entities WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_none() {
        tx.execute(
            "INSERT INTO knowledge_entities (id, entity_type, name, created_at) VALUES (?1, 'file', ?2, ?3)",
            params![id, path, now],
        )?;
    }
    Ok(id)
}

/// Create-or-merge the Topic shadow entity for `name`, returning its id.
pub(crate) fn ensure_topic(tx: &rusqlite::Transaction, name: &str, now: i64) -> Result<String> {
    let id = format!("topic:{}", slugify(name));
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM knowledge_entities WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_none() {
        tx.execute(
            "INSERT INTO knowledge_entities (id, entity_type, name, created_at) VALUES (?1, 'topic', ?2, ?3)",
            params![id, name, now],
        )?;
    }
    Ok(id)
}

pub(crate) fn upsert_edge(tx: &rusqlite::Transaction, from_id: &str, to_id: &str, rel_type: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO knowledge_relationships (from_id, to_id, rel_type) VALUES (?1, ?2, ?3)
         ON CONFLICT(from_id, to_id, rel_type) DO NOTHING",
        params![from_id, to_id, rel_type],
    )?;
    Ok(())
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use crate::interfaces::FixedClock;

    async fn test_knowledge() -> Knowledge {
        let store = Store::open_in_memory().await.unwrap();
        Knowledge::new(store, Arc::new(HashingEmbedder::default_model()))
    }

    #[tokio::test]
    async fn store_and_query_round_trip() {
        let knowledge = test_knowledge().await;
        let clock = FixedClock(1000);
        let learning = Learning {
            id: "L1".into(),
            content: "cache eviction policy".into(),
            source_issue: None,
            code_area: Some("cache".into()),
            file_path: Some("src/cache.rs".into()),
            confidence: Some(0.9),
            created_at: 0,
        };
        knowledge.store_learnings(vec![learning.clone()], &clock).await.unwrap();

        let results = knowledge
            .query(KnowledgeFilter {
                file_path: Some("src/cache.rs".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "L1");
    }

    #[tokio::test]
    async fn search_similar_filters_by_code_area() {
        let knowledge = test_knowledge().await;
        let clock = FixedClock(1000);

        let l1 = Learning {
            id: "L1".into(),
            content: "cache eviction policy".into(),
            source_issue: None,
            code_area: Some("cache".into()),
            file_path: None,
            confidence: None,
            created_at: 0,
        };
        let l2 = Learning {
            id: "L2".into(),
            content: "cache eviction policy".into(),
            source_issue: None,
            code_area: Some("parser".into()),
            file_path: None,
            confidence: None,
            created_at: 0,
        };
        knowledge.store_learnings(vec![l1.clone(), l2.clone()], &clock).await.unwrap();
        knowledge.embed_entity(&l1.id, &l1.content).await.unwrap();
        knowledge.embed_entity(&l2.id, &l2.content).await.unwrap();

        let results = knowledge
            .search_similar(
                "eviction",
                SearchOptions {
                    limit: 10,
                    threshold: -1.0,
                    include_related: false,
                    code_area: Some("cache".into()),
                    file_path: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].learning.id, "L1");
    }

    #[tokio::test]
    async fn search_similar_orders_by_score_descending() {
        let knowledge = test_knowledge().await;
        let clock = FixedClock(1000);
        let learnings = vec![
            Learning {
                id: "L1".into(),
                content: "cache eviction policy for LRU".into(),
                source_issue: None,
                code_area: None,
                file_path: None,
                confidence: None,
                created_at: 0,
            },
            Learning {
                id: "L2".into(),
                content: "unrelated parser token stream".into(),
                source_issue: None,
                code_area: None,
                file_path: None,
                confidence: None,
                created_at: 0,
            },
        ];
        knowledge.store_learnings(learnings.clone(), &clock).await.unwrap();
        for l in &learnings {
            knowledge.embed_entity(&l.id, &l.content).await.unwrap();
        }

        let results = knowledge
            .search_similar(
                "cache eviction policy",
                SearchOptions {
                    limit: 10,
                    threshold: -1.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].learning.id, "L1");
    }
}
