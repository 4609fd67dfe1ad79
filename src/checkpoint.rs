//! `Checkpoint` (spec §4.8): Workflow/Milestone/SessionMetric state
//! machines, the stale-workflow sweep, and session-metadata file
//! correlation. Grounded on the teacher's `contracts.rs` state-machine
//! validation style (explicit allowed-transition checks before a mutation)
//! and `database.rs`'s use of a per-user directory for small sidecar files.

use crate::error::KnowledgeError;
use crate::interfaces::Clock;
use crate::store::Store;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Research,
    Implement,
    Review,
    Finalize,
    Planning,
    Execute,
    Merge,
    Cleanup,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Implement => "implement",
            Self::Review => "review",
            Self::Finalize => "finalize",
            Self::Planning => "planning",
            Self::Execute => "execute",
            Self::Merge => "merge",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "research" => Self::Research,
            "implement" => Self::Implement,
            "review" => Self::Review,
            "finalize" => Self::Finalize,
            "planning" => Self::Planning,
            "execute" => Self::Execute,
            "merge" => Self::Merge,
            "cleanup" => Self::Cleanup,
            other => anyhow::bail!(KnowledgeError::invalid_input(format!("unknown workflow phase: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    Paused,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => anyhow::bail!(KnowledgeError::invalid_input(format!("unknown status: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Failed,
    Pending,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestonePhase {
    Planning,
    Execute,
    Review,
    Merge,
    Cleanup,
}

impl MilestonePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Execute => "execute",
            Self::Review => "review",
            Self::Merge => "merge",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "planning" => Self::Planning,
            "execute" => Self::Execute,
            "review" => Self::Review,
            "merge" => Self::Merge,
            "cleanup" => Self::Cleanup,
            other => anyhow::bail!(KnowledgeError::invalid_input(format!("unknown milestone phase: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub github_number: Option<i64>,
    pub phase: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneBaseline {
    pub lint_exit: i64,
    pub lint_warn: i64,
    pub lint_err: i64,
    pub tc_exit: i64,
    pub tc_err: i64,
    pub captured_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: String,
    pub issue_number: Option<i64>,
    pub branch: String,
    pub worktree: Option<String>,
    pub phase: String,
    pub status: String,
    pub retry_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Session-correlation marker written by the session-start hook and
/// consumed by session-end (spec §4.8, §6). Serialized as-is to the
/// per-user sidecar file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: i64,
    pub learnings_injected: i64,
    pub issue_number: Option<i64>,
}

pub struct Checkpoint {
    store: Store,
    session_dir: PathBuf,
    session_stale_hours: u32,
    stale_workflow_hours: u32,
}

impl Checkpoint {
    pub fn new(store: Store) -> Self {
        let session_dir = store.config().session_dir.clone();
        let session_stale_hours = store.config().session_stale_hours;
        let stale_workflow_hours = store.config().stale_workflow_hours;
        Self { store, session_dir, session_stale_hours, stale_workflow_hours }
    }

    /// The configured stale-workflow threshold, for callers (e.g. Hooks)
    /// that want to sweep without hardcoding the default.
    pub fn stale_workflow_hours(&self) -> u32 {
        self.stale_workflow_hours
    }

    #[instrument(skip(self, clock))]
    pub async fn create_workflow(
        &self,
        id: String,
        issue_number: Option<i64>,
        branch: String,
        worktree: Option<String>,
        clock: &dyn Clock,
    ) -> Result<()> {
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO workflows (id, issue_number, branch, worktree, phase, status, retry_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'research', 'running', 0, ?5, ?5)",
                    params![id, issue_number, branch, worktree, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_phase(&self, id: &str, phase: WorkflowPhase, clock: &dyn Clock) -> Result<()> {
        let id = id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                let updated = tx.execute(
                    "UPDATE workflows SET phase = ?1, updated_at = ?2 WHERE id = ?3",
                    params![phase.as_str(), now, id],
                )?;
                if updated == 0 {
                    anyhow::bail!(KnowledgeError::not_found(format!("workflow {id}")));
                }
                Ok(())
            })
            .await
    }

    /// Reject a transition out of `completed`/`failed` (spec §8: both are
    /// terminal within a workflow id).
    pub async fn set_status(&self, id: &str, status: Status, clock: &dyn Clock) -> Result<()> {
        let id = id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                let current: String = tx
                    .query_row("SELECT status FROM workflows WHERE id = ?1", params![id], |r| r.get(0))
                    .optional()?
                    .ok_or_else(|| anyhow::anyhow!(KnowledgeError::not_found(format!("workflow {id}"))))?;
                if matches!(current.as_str(), "completed" | "failed") {
                    anyhow::bail!(KnowledgeError::invalid_input(format!(
                        "workflow {id} is already {current}, a terminal status"
                    )));
                }
                tx.execute(
                    "UPDATE workflows SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn increment_retry(&self, id: &str, clock: &dyn Clock) -> Result<()> {
        let id = id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                let updated = tx.execute(
                    "UPDATE workflows SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
                if updated == 0 {
                    anyhow::bail!(KnowledgeError::not_found(format!("workflow {id}")));
                }
                Ok(())
            })
            .await
    }

    pub async fn log_action(
        &self,
        workflow_id: &str,
        action: &str,
        result: ActionResult,
        metadata: Option<serde_json::Value>,
        clock: &dyn Clock,
    ) -> Result<()> {
        let workflow_id = workflow_id.to_string();
        let action = action.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO workflow_actions (workflow_id, action, result, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![workflow_id, action, result.as_str(), metadata.map(|m| m.to_string()), now],
                )?;
                tx.execute("UPDATE workflows SET updated_at = ?1 WHERE id = ?2", params![now, workflow_id])?;
                Ok(())
            })
            .await
    }

    pub async fn log_commit(&self, workflow_id: &str, sha: &str, message: &str, clock: &dyn Clock) -> Result<()> {
        let workflow_id = workflow_id.to_string();
        let sha = sha.to_string();
        let message = message.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO workflow_commits (workflow_id, sha, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![workflow_id, sha, message, now],
                )?;
                tx.execute("UPDATE workflows SET updated_at = ?1 WHERE id = ?2", params![now, workflow_id])?;
                Ok(())
            })
            .await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let id = id.to_string();
        self.store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, issue_number, branch, worktree, phase, status, retry_count, created_at, updated_at
                         FROM workflows WHERE id = ?1",
                        [&id],
                        row_to_workflow,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn active_workflows(&self) -> Result<Vec<Workflow>> {
        self.store
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, issue_number, branch, worktree, phase, status, retry_count, created_at, updated_at
                     FROM workflows WHERE status IN ('running', 'paused') ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map([], row_to_workflow)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Mark every `running`/`paused` workflow whose `updatedAt` is older
    /// than `hours_threshold` as `failed`. Runs in one transaction; returns
    /// the count affected.
    #[instrument(skip(self, clock))]
    pub async fn cleanup_stale_workflows(&self, hours_threshold: u32, clock: &dyn Clock) -> Result<usize> {
        let cutoff = clock.now_millis() - (hours_threshold as i64) * 3_600_000;
        self.store
            .transaction(move |tx| {
                let count = tx.execute(
                    "UPDATE workflows SET status = 'failed' WHERE status IN ('running', 'paused') AND updated_at < ?1",
                    params![cutoff],
                )?;
                Ok(count)
            })
            .await
    }

    #[instrument(skip(self, clock))]
    pub async fn create_milestone(&self, id: String, name: String, github_number: Option<i64>, clock: &dyn Clock) -> Result<()> {
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO milestones (id, name, github_number, phase, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'planning', 'running', ?4, ?4)",
                    params![id, name, github_number, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_milestone_phase(&self, id: &str, phase: MilestonePhase, clock: &dyn Clock) -> Result<()> {
        let id = id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                let updated = tx.execute(
                    "UPDATE milestones SET phase = ?1, updated_at = ?2 WHERE id = ?3",
                    params![phase.as_str(), now, id],
                )?;
                if updated == 0 {
                    anyhow::bail!(KnowledgeError::not_found(format!("milestone {id}")));
                }
                Ok(())
            })
            .await
    }

    /// Reject a transition out of `completed`/`failed`, mirroring
    /// `set_status`'s workflow terminal-state enforcement.
    pub async fn set_milestone_status(&self, id: &str, status: Status, clock: &dyn Clock) -> Result<()> {
        let id = id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                let current: String = tx
                    .query_row("SELECT status FROM milestones WHERE id = ?1", params![id], |r| r.get(0))
                    .optional()?
                    .ok_or_else(|| anyhow::anyhow!(KnowledgeError::not_found(format!("milestone {id}"))))?;
                if matches!(current.as_str(), "completed" | "failed") {
                    anyhow::bail!(KnowledgeError::invalid_input(format!(
                        "milestone {id} is already {current}, a terminal status"
                    )));
                }
                tx.execute(
                    "UPDATE milestones SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Record the one-shot lint/typecheck baseline for a milestone. Only
    /// ever written once per milestone (spec §4.8): a second call replaces
    /// the captured numbers rather than accumulating a history, since the
    /// baseline exists to be diffed against, not trended.
    pub async fn set_milestone_baseline(
        &self,
        milestone_id: &str,
        lint_exit: i64,
        lint_warn: i64,
        lint_err: i64,
        tc_exit: i64,
        tc_err: i64,
        clock: &dyn Clock,
    ) -> Result<()> {
        let milestone_id = milestone_id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO milestone_baselines (milestone_id, lint_exit, lint_warn, lint_err, tc_exit, tc_err, captured_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(milestone_id) DO UPDATE SET
                        lint_exit=excluded.lint_exit, lint_warn=excluded.lint_warn, lint_err=excluded.lint_err,
                        tc_exit=excluded.tc_exit, tc_err=excluded.tc_err, captured_at=excluded.captured_at",
                    params![milestone_id, lint_exit, lint_warn, lint_err, tc_exit, tc_err, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_milestone_baseline(&self, milestone_id: &str) -> Result<Option<MilestoneBaseline>> {
        let milestone_id = milestone_id.to_string();
        self.store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT lint_exit, lint_warn, lint_err, tc_exit, tc_err, captured_at FROM milestone_baselines WHERE milestone_id = ?1",
                        [&milestone_id],
                        |row| {
                            Ok(MilestoneBaseline {
                                lint_exit: row.get(0)?,
                                lint_warn: row.get(1)?,
                                lint_err: row.get(2)?,
                                tc_exit: row.get(3)?,
                                tc_err: row.get(4)?,
                                captured_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn attach_workflow_to_milestone(&self, milestone_id: &str, workflow_id: &str, wave: Option<i64>) -> Result<()> {
        let milestone_id = milestone_id.to_string();
        let workflow_id = workflow_id.to_string();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO milestone_workflows (milestone_id, workflow_id, wave) VALUES (?1, ?2, ?3)
                     ON CONFLICT(milestone_id, workflow_id) DO UPDATE SET wave=excluded.wave",
                    params![milestone_id, workflow_id, wave],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_milestone(&self, id: &str) -> Result<Option<Milestone>> {
        let id = id.to_string();
        self.store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, github_number, phase, status, created_at, updated_at FROM milestones WHERE id = ?1",
                        [&id],
                        row_to_milestone,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn record_session_metric(
        &self,
        session_id: &str,
        issue_number: Option<i64>,
        files_read: i64,
        compacted: bool,
        duration_minutes: Option<i64>,
        review_findings: i64,
        learnings_injected: i64,
        learnings_captured: i64,
        clock: &dyn Clock,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let now = clock.now_millis();
        self.store
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO session_metrics (session_id, issue_number, files_read, compacted, duration_minutes, review_findings, learnings_injected, learnings_captured, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(session_id) DO UPDATE SET
                        files_read=excluded.files_read, compacted=excluded.compacted,
                        duration_minutes=excluded.duration_minutes, review_findings=excluded.review_findings,
                        learnings_injected=excluded.learnings_injected, learnings_captured=excluded.learnings_captured",
                    params![session_id, issue_number, files_read, compacted as i64, duration_minutes, review_findings, learnings_injected, learnings_captured, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Write the session-start sidecar file (spec §4.8, §6).
    pub async fn write_session_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        tokio::fs::create_dir_all(&self.session_dir).await?;
        let path = self.session_file_path(&metadata.session_id);
        let json = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Find the session-metadata file session-end should hydrate from. When
    /// `session_id` is supplied, an exact match is required — no mtime
    /// fallback, per the Open Question resolved in SPEC_FULL.md §4.8.
    /// Without a `session_id`, falls back to the most recently modified
    /// non-stale file. Orphaned files older than the staleness cutoff are
    /// deleted as they're encountered.
    pub async fn find_latest_session_metadata(&self, session_id: Option<&str>, now_millis: i64) -> Result<Option<SessionMetadata>> {
        let cutoff = now_millis - (self.session_stale_hours as i64) * 3_600_000;

        if let Some(session_id) = session_id {
            let path = self.session_file_path(session_id);
            return self.read_if_fresh(&path, cutoff).await;
        }

        let mut entries = match tokio::fs::read_dir(&self.session_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(metadata) = entry.metadata().await {
                if let Ok(modified) = metadata.modified() {
                    candidates.push((modified, path));
                }
            }
        }
        candidates.sort_by_key(|(modified, _)| *modified);

        while let Some((_, path)) = candidates.pop() {
            if let Some(session) = self.read_if_fresh(&path, cutoff).await? {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    async fn read_if_fresh(&self, path: &std::path::Path, cutoff_millis: i64) -> Result<Option<SessionMetadata>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };
        let metadata: SessionMetadata = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unparsable session metadata file");
                return Ok(None);
            }
        };
        if metadata.start_time < cutoff_millis {
            let _ = tokio::fs::remove_file(path).await;
            return Ok(None);
        }
        Ok(Some(metadata))
    }

    pub async fn delete_session_metadata(&self, session_id: &str) -> Result<()> {
        let path = self.session_file_path(session_id);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn session_file_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.json"))
    }
}

fn row_to_milestone(row: &rusqlite::Row) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        name: row.get(1)?,
        github_number: row.get(2)?,
        phase: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_workflow(row: &rusqlite::Row) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        issue_number: row.get(1)?,
        branch: row.get(2)?,
        worktree: row.get(3)?,
        phase: row.get(4)?,
        status: row.get(5)?,
        retry_count: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeConfig;
    use crate::interfaces::FixedClock;

    async fn test_checkpoint(dir: &std::path::Path) -> Checkpoint {
        let config = KnowledgeConfig::builder()
            .store_path(dir.join("store.db"))
            .session_dir(dir.join("sessions"))
            .build()
            .unwrap();
        let store = Store::open(config).await.unwrap();
        Checkpoint::new(store)
    }

    #[tokio::test]
    async fn workflow_create_and_transition() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;
        let clock = FixedClock(1000);

        checkpoint
            .create_workflow("w1".into(), Some(42), "feature/x".into(), None, &clock)
            .await
            .unwrap();
        checkpoint.set_phase("w1", WorkflowPhase::Implement, &clock).await.unwrap();
        checkpoint.set_status("w1", Status::Paused, &clock).await.unwrap();

        let workflow = checkpoint.get_workflow("w1").await.unwrap().unwrap();
        assert_eq!(workflow.phase, "implement");
        assert_eq!(workflow.status, "paused");
    }

    #[tokio::test]
    async fn milestone_baseline_is_replaced_not_accumulated() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;
        let clock = FixedClock(1000);

        checkpoint.create_milestone("m1".into(), "Q3 cleanup".into(), None, &clock).await.unwrap();
        checkpoint.set_milestone_baseline("m1", 0, 3, 0, 0, 1, &clock).await.unwrap();
        checkpoint.set_milestone_baseline("m1", 0, 1, 0, 0, 0, &clock).await.unwrap();

        let baseline = checkpoint.get_milestone_baseline("m1").await.unwrap().unwrap();
        assert_eq!(baseline.lint_warn, 1);
        assert_eq!(baseline.tc_err, 0);

        checkpoint
            .create_workflow("w1".into(), None, "b".into(), None, &clock)
            .await
            .unwrap();
        checkpoint.attach_workflow_to_milestone("m1", "w1", Some(1)).await.unwrap();

        let milestone = checkpoint.get_milestone("m1").await.unwrap().unwrap();
        assert_eq!(milestone.name, "Q3 cleanup");
    }

    #[tokio::test]
    async fn stale_sweep_fails_old_running_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;
        let old_clock = FixedClock(0);
        checkpoint
            .create_workflow("w1".into(), None, "b".into(), None, &old_clock)
            .await
            .unwrap();

        let now_clock = FixedClock(100 * 3_600_000);
        let count = checkpoint.cleanup_stale_workflows(24, &now_clock).await.unwrap();
        assert_eq!(count, 1);

        let workflow = checkpoint.get_workflow("w1").await.unwrap().unwrap();
        assert_eq!(workflow.status, "failed");
    }

    #[tokio::test]
    async fn session_metadata_round_trips_and_requires_exact_id_match() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;

        let metadata = SessionMetadata {
            session_id: "s1".into(),
            start_time: 1_000,
            learnings_injected: 2,
            issue_number: Some(7),
        };
        checkpoint.write_session_metadata(&metadata).await.unwrap();

        let found = checkpoint.find_latest_session_metadata(Some("s1"), 2_000).await.unwrap();
        assert_eq!(found.unwrap().session_id, "s1");

        let missing = checkpoint.find_latest_session_metadata(Some("does-not-exist"), 2_000).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn completed_workflow_status_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;
        let clock = FixedClock(1000);

        checkpoint.create_workflow("w1".into(), None, "b".into(), None, &clock).await.unwrap();
        checkpoint.set_status("w1", Status::Completed, &clock).await.unwrap();

        let err = checkpoint.set_status("w1", Status::Running, &clock).await.unwrap_err();
        assert!(err.to_string().contains("terminal"));

        let workflow = checkpoint.get_workflow("w1").await.unwrap().unwrap();
        assert_eq!(workflow.status, "completed");
    }

    #[tokio::test]
    async fn failed_milestone_status_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;
        let clock = FixedClock(1000);

        checkpoint.create_milestone("m1".into(), "Q3 cleanup".into(), None, &clock).await.unwrap();
        checkpoint.set_milestone_status("m1", Status::Failed, &clock).await.unwrap();

        let err = checkpoint.set_milestone_status("m1", Status::Running, &clock).await.unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[tokio::test]
    async fn stale_session_metadata_file_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = test_checkpoint(dir.path()).await;

        let metadata = SessionMetadata {
            session_id: "s1".into(),
            start_time: 0,
            learnings_injected: 0,
            issue_number: None,
        };
        checkpoint.write_session_metadata(&metadata).await.unwrap();

        let far_future = 100 * 3_600_000;
        let found = checkpoint.find_latest_session_metadata(Some("s1"), far_future).await.unwrap();
        assert!(found.is_none());
        assert!(!checkpoint.session_file_path("s1").exists());
    }
}
