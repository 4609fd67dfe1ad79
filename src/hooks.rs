//! `Hooks` (spec §4.9): session-start context injection and session-end
//! learning extraction, wired on top of the other seven components. Grounded
//! on the teacher's `http_codebase_intelligence.rs` request-orchestration
//! shape (compose several read paths into one response struct) and
//! `observability.rs`'s "log, don't raise" treatment of best-effort steps.

use crate::checkpoint::{Checkpoint, SessionMetadata};
use crate::docs::Docs;
use crate::graph_query::GraphQuery;
use crate::interfaces::{Clock, CommitRef, LearningExtractor};
use crate::knowledge::{Knowledge, KnowledgeFilter, Learning, Mistake, Pattern, SearchOptions};
use crate::types::ValidatedDepth;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const SKIP_DIR_NAMES: &[&str] = &["node_modules", ".git", "dist", "target"];
const RESUME_PROMPT_MAX_WORKFLOWS: usize = 5;
const BLAST_RADIUS_FILE_CAP: usize = 5;
const BLAST_RADIUS_ROW_CAP: usize = 50;
const RELEVANT_LEARNINGS_CAP: usize = 5;
const RECENT_PLANNING_CAP: usize = 5;
const TRANSCRIPT_FALLBACK_WINDOW_HOURS: i64 = 2;

pub struct SessionStartInput {
    pub session_id: String,
    pub working_dir: std::path::PathBuf,
    pub branch: Option<String>,
    pub modified_files: Vec<String>,
    pub issue_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStartReport {
    pub resume_prompt: Option<String>,
    pub context_block: String,
    pub session_metadata_marker: String,
    pub stale_workflows_swept: usize,
}

pub struct SessionEndInput {
    pub workflow_id: Option<String>,
    pub session_id: Option<String>,
    pub start_time: Option<i64>,
    pub modified_files: Vec<String>,
    pub commits: Vec<CommitRef>,
    pub transcripts_dir: std::path::PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionEndReport {
    pub transcripts_found: usize,
    pub learnings_captured: usize,
    pub patterns_captured: usize,
    pub mistakes_captured: usize,
    pub diagnostic: Option<String>,
}

pub struct Hooks {
    checkpoint: Checkpoint,
    graph_query: GraphQuery,
    knowledge: Knowledge,
    docs: Docs,
    extractor: Option<Arc<dyn LearningExtractor>>,
}

impl Hooks {
    pub fn new(
        checkpoint: Checkpoint,
        graph_query: GraphQuery,
        knowledge: Knowledge,
        docs: Docs,
        extractor: Option<Arc<dyn LearningExtractor>>,
    ) -> Self {
        Self { checkpoint, graph_query, knowledge, docs, extractor }
    }

    #[instrument(skip(self, input, clock))]
    pub async fn on_session_start(&self, input: SessionStartInput, clock: &dyn Clock) -> Result<SessionStartReport> {
        let session_id = input.session_id.clone();
        let ctx = crate::observability::OperationContext::new("hooks.on_session_start");
        let result = crate::observability::with_trace_id(
            "hooks.on_session_start",
            self.on_session_start_inner(input, clock),
        )
        .await;
        crate::observability::log_operation(
            &ctx,
            &crate::observability::Operation::HookSessionStart { session_id },
            &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        result
    }

    async fn on_session_start_inner(&self, input: SessionStartInput, clock: &dyn Clock) -> Result<SessionStartReport> {
        let now = clock.now_millis();

        if let Err(e) = self.reindex_docs(&input.working_dir, now).await {
            warn!(error = %e, "incremental doc indexing failed during session start");
        }

        let swept = match self.checkpoint.cleanup_stale_workflows(self.checkpoint.stale_workflow_hours(), clock).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "stale workflow sweep failed");
                0
            }
        };

        let active = self.checkpoint.active_workflows().await.unwrap_or_default();
        let resume_prompt = if active.is_empty() {
            None
        } else {
            Some(render_resume_prompt(&active))
        };

        let context_block = self.build_context_block(&input).await?;

        let metadata = SessionMetadata {
            session_id: input.session_id.clone(),
            start_time: now,
            learnings_injected: 0,
            issue_number: input.issue_number,
        };
        self.checkpoint.write_session_metadata(&metadata).await?;
        let marker = render_session_metadata_marker(&metadata);

        Ok(SessionStartReport {
            resume_prompt,
            context_block,
            session_metadata_marker: marker,
            stale_workflows_swept: swept,
        })
    }

    async fn reindex_docs(&self, working_dir: &Path, now: i64) -> Result<()> {
        let files = collect_markdown_files(working_dir).await?;
        for path in files {
            let relative = crate::path_utils::normalize_path_relative(&path, working_dir);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    if let Err(e) = self.docs.index_file(&relative, &content, None, false, now).await {
                        warn!(path = %relative, error = %e, "doc index failed for file");
                    }
                }
                Err(e) => warn!(path = %relative, error = %e, "unreadable doc file"),
            }
        }
        Ok(())
    }

    async fn build_context_block(&self, input: &SessionStartInput) -> Result<String> {
        let mut block = String::new();

        let planning_notes = self
            .knowledge
            .query(KnowledgeFilter {
                keywords: vec!["plan".to_string()],
                limit: Some(RECENT_PLANNING_CAP),
                ..Default::default()
            })
            .await
            .unwrap_or_default();
        if !planning_notes.is_empty() {
            block.push_str("## Recent planning notes\n");
            for note in &planning_notes {
                block.push_str(&format!("- {}\n", note.content));
            }
            block.push('\n');
        }

        let mut blast_rows = Vec::new();
        for file in input.modified_files.iter().take(BLAST_RADIUS_FILE_CAP) {
            match self.graph_query.blast_radius(file, ValidatedDepth::new(2)?).await {
                Ok(rows) => blast_rows.extend(rows),
                Err(e) => warn!(file = %file, error = %e, "blast radius lookup failed"),
            }
        }
        blast_rows.truncate(BLAST_RADIUS_ROW_CAP);
        if !blast_rows.is_empty() {
            block.push_str("## Blast radius of modified files\n");
            for row in &blast_rows {
                block.push_str(&format!("- {} ({}, depth {})\n", row.entity.name, row.entity.file_path, row.depth));
            }
            block.push('\n');
        }

        let relevance_query = format!(
            "{} {}",
            input.branch.clone().unwrap_or_default(),
            input.modified_files.join(" ")
        );
        if !relevance_query.trim().is_empty() {
            let relevant = self
                .knowledge
                .search_similar(
                    relevance_query.trim(),
                    SearchOptions {
                        limit: RELEVANT_LEARNINGS_CAP,
                        ..Default::default()
                    },
                )
                .await
                .unwrap_or_default();
            if !relevant.is_empty() {
                block.push_str("## Relevant learnings\n");
                for hit in &relevant {
                    block.push_str(&format!("- {} (score {:.3})\n", hit.learning.content, hit.score));
                }
            }
        }

        if block.is_empty() {
            block.push_str("No prior context found for this branch or file set.\n");
        }
        Ok(block)
    }

    #[instrument(skip(self, input, clock))]
    pub async fn on_session_end(&self, input: SessionEndInput, clock: &dyn Clock) -> Result<SessionEndReport> {
        let session_id = input.session_id.clone().unwrap_or_default();
        let ctx = crate::observability::OperationContext::new("hooks.on_session_end");
        let result = crate::observability::with_trace_id(
            "hooks.on_session_end",
            self.on_session_end_inner(input, clock),
        )
        .await;
        let learnings_captured = result.as_ref().map(|r| r.learnings_captured).unwrap_or(0);
        crate::observability::log_operation(
            &ctx,
            &crate::observability::Operation::HookSessionEnd { session_id, learnings_captured },
            &result.as_ref().map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")),
        );
        result
    }

    async fn on_session_end_inner(&self, input: SessionEndInput, clock: &dyn Clock) -> Result<SessionEndReport> {
        let now = clock.now_millis();

        let metadata = self
            .checkpoint
            .find_latest_session_metadata(input.session_id.as_deref(), now)
            .await?;
        let start_time = input.start_time.or_else(|| metadata.as_ref().map(|m| m.start_time));

        let transcripts = discover_transcripts(&input.transcripts_dir, start_time, now).await?;

        if input.dry_run {
            let diagnostic = format!(
                "dry run: {} transcript(s) discovered; extractor {}; metadata {}",
                transcripts.len(),
                if self.extractor.is_some() { "configured" } else { "not configured" },
                if metadata.is_some() { "found" } else { "not found" },
            );
            return Ok(SessionEndReport {
                transcripts_found: transcripts.len(),
                diagnostic: Some(diagnostic),
                ..Default::default()
            });
        }

        let mut report = SessionEndReport {
            transcripts_found: transcripts.len(),
            ..Default::default()
        };

        if let Some(extractor) = &self.extractor {
            if !transcripts.is_empty() {
                let extracted = extractor
                    .extract(&transcripts, &input.commits, &input.modified_files)
                    .await?;

                let learnings: Vec<Learning> = extracted
                    .learnings
                    .into_iter()
                    .map(|l| Learning {
                        id: uuid::Uuid::new_v4().to_string(),
                        content: l.content,
                        source_issue: l.source_issue,
                        code_area: l.code_area,
                        file_path: l.file_path,
                        confidence: l.confidence,
                        created_at: now,
                    })
                    .collect();
                if !learnings.is_empty() {
                    self.knowledge.store_learnings(learnings.clone(), clock).await?;
                    for learning in &learnings {
                        self.knowledge.embed_entity(&learning.id, &learning.content).await?;
                    }
                }
                report.learnings_captured = learnings.len();

                for pattern in extracted.patterns {
                    self.knowledge
                        .store_pattern(
                            Pattern {
                                id: uuid::Uuid::new_v4().to_string(),
                                name: pattern.name,
                                description: pattern.description,
                                code_area: pattern.code_area,
                                created_at: now,
                            },
                            clock,
                        )
                        .await?;
                    report.patterns_captured += 1;
                }

                for mistake in extracted.mistakes {
                    self.knowledge
                        .store_mistake(
                            Mistake {
                                id: uuid::Uuid::new_v4().to_string(),
                                description: mistake.description,
                                how_fixed: mistake.how_fixed,
                                file_path: mistake.file_path,
                                created_at: now,
                            },
                            clock,
                        )
                        .await?;
                    report.mistakes_captured += 1;
                }
            }
        }

        let session_id = input
            .session_id
            .clone()
            .or_else(|| metadata.as_ref().map(|m| m.session_id.clone()));
        if let Some(session_id) = &session_id {
            let duration_minutes = start_time.map(|s| (now - s) / 60_000);
            self.checkpoint
                .record_session_metric(
                    session_id,
                    metadata.as_ref().and_then(|m| m.issue_number),
                    input.modified_files.len() as i64,
                    false,
                    duration_minutes,
                    0,
                    metadata.as_ref().map(|m| m.learnings_injected).unwrap_or(0),
                    report.learnings_captured as i64,
                    clock,
                )
                .await?;
            self.checkpoint.delete_session_metadata(session_id).await?;
        }

        if let Some(workflow_id) = &input.workflow_id {
            for commit in &input.commits {
                self.checkpoint
                    .log_commit(workflow_id, &commit.sha, &commit.message, clock)
                    .await?;
            }
        }

        info!(
            learnings = report.learnings_captured,
            patterns = report.patterns_captured,
            mistakes = report.mistakes_captured,
            "session end processed"
        );
        Ok(report)
    }
}

fn render_resume_prompt(active: &[crate::checkpoint::Workflow]) -> String {
    let mut out = String::from("## Active workflows\n");
    for workflow in active.iter().take(RESUME_PROMPT_MAX_WORKFLOWS) {
        out.push_str(&format!(
            "- {} (phase {}, status {}, branch {})\n",
            workflow.id, workflow.phase, workflow.status, workflow.branch
        ));
    }
    out
}

fn render_session_metadata_marker(metadata: &SessionMetadata) -> String {
    format!(
        "<!-- SESSION_METADATA {} -->",
        serde_json::to_string(metadata).unwrap_or_default()
    )
}

async fn collect_markdown_files(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_dir() {
                if !SKIP_DIR_NAMES.contains(&name) {
                    stack.push(path);
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Transcripts whose mtime falls in `[start_time, now]`, or the last
/// `TRANSCRIPT_FALLBACK_WINDOW_HOURS` when `start_time` is absent (spec
/// §4.9).
async fn discover_transcripts(dir: &Path, start_time: Option<i64>, now_millis: i64) -> Result<Vec<String>> {
    let window_start = start_time.unwrap_or(now_millis - TRANSCRIPT_FALLBACK_WINDOW_HOURS * 3_600_000);

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let modified_millis = modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        if modified_millis >= window_start && modified_millis <= now_millis {
            candidates.push((modified_millis, path));
        }
    }
    candidates.sort_by_key(|(mtime, _)| *mtime);

    let mut transcripts = Vec::with_capacity(candidates.len());
    for (_, path) in candidates {
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            transcripts.push(content);
        }
    }
    Ok(transcripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeConfig;
    use crate::embedder::HashingEmbedder;
    use crate::interfaces::{ExtractedKnowledge, ExtractedLearning, FixedClock};
    use crate::store::Store;
    use async_trait::async_trait;

    struct StubExtractor;

    #[async_trait]
    impl LearningExtractor for StubExtractor {
        async fn extract(&self, transcripts: &[String], _commits: &[CommitRef], _files: &[String]) -> Result<ExtractedKnowledge> {
            Ok(ExtractedKnowledge {
                learnings: transcripts
                    .iter()
                    .map(|t| ExtractedLearning {
                        content: format!("learned: {t}"),
                        source_issue: None,
                        code_area: None,
                        file_path: None,
                        confidence: Some(0.8),
                    })
                    .collect(),
                ..Default::default()
            })
        }
    }

    async fn test_hooks(dir: &Path, extractor: Option<Arc<dyn LearningExtractor>>) -> Hooks {
        let config = KnowledgeConfig::builder()
            .store_path(dir.join("store.db"))
            .session_dir(dir.join("sessions"))
            .build()
            .unwrap();
        let store = Store::open(config).await.unwrap();
        let embedder = Arc::new(HashingEmbedder::default_model());
        Hooks::new(
            Checkpoint::new(store.clone()),
            GraphQuery::new(store.clone()),
            Knowledge::new(store.clone(), embedder.clone()),
            Docs::new(store, embedder),
            extractor,
        )
    }

    #[tokio::test]
    async fn session_start_writes_metadata_and_context_block() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = test_hooks(dir.path(), None).await;
        let clock = FixedClock(1_000_000);

        let report = hooks
            .on_session_start(
                SessionStartInput {
                    session_id: "s1".into(),
                    working_dir: dir.path().to_path_buf(),
                    branch: Some("feature/x".into()),
                    modified_files: vec!["src/lib.rs".into()],
                    issue_number: Some(1),
                },
                &clock,
            )
            .await
            .unwrap();

        assert!(report.session_metadata_marker.contains("SESSION_METADATA"));
        assert!(report.resume_prompt.is_none());
    }

    #[tokio::test]
    async fn session_end_dry_run_does_not_call_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let transcripts_dir = dir.path().join("transcripts");
        tokio::fs::create_dir_all(&transcripts_dir).await.unwrap();
        let hooks = test_hooks(dir.path(), Some(Arc::new(StubExtractor))).await;
        let clock = FixedClock(1_000_000);

        let report = hooks
            .on_session_end(
                SessionEndInput {
                    workflow_id: None,
                    session_id: Some("s1".into()),
                    start_time: Some(0),
                    modified_files: vec![],
                    commits: vec![],
                    transcripts_dir,
                    dry_run: true,
                },
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(report.learnings_captured, 0);
        assert!(report.diagnostic.is_some());
    }

    #[tokio::test]
    async fn session_end_extracts_and_persists_learnings() {
        let dir = tempfile::tempdir().unwrap();
        let transcripts_dir = dir.path().join("transcripts");
        tokio::fs::create_dir_all(&transcripts_dir).await.unwrap();
        tokio::fs::write(transcripts_dir.join("t1.jsonl"), "session transcript content").await.unwrap();

        let hooks = test_hooks(dir.path(), Some(Arc::new(StubExtractor))).await;
        let clock = FixedClock(1_000_000);

        let report = hooks
            .on_session_end(
                SessionEndInput {
                    workflow_id: None,
                    session_id: Some("s1".into()),
                    start_time: Some(0),
                    modified_files: vec!["src/lib.rs".into()],
                    commits: vec![],
                    transcripts_dir,
                    dry_run: false,
                },
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(report.transcripts_found, 1);
        assert_eq!(report.learnings_captured, 1);
    }
}
