//! Runtime configuration for the knowledge engine, assembled once at process
//! start through [`KnowledgeConfigBuilder`] and threaded explicitly into
//! every component — no process-global singleton, per spec §9's redesign
//! flag on the original's global database handle.

use crate::types::{ValidatedDepth, ValidatedLimit};
use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};

/// Fully validated configuration handed to `Store::open` and the
/// components built on top of it.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Path to the single database file (default `.claude/execution-state.db`).
    pub store_path: PathBuf,
    /// Per-user directory of session-metadata JSON files (spec §4.8, §6).
    pub session_dir: PathBuf,
    /// Hours a `running`/`paused` workflow may go without an update before
    /// `cleanupStaleWorkflows` marks it `failed`.
    pub stale_workflow_hours: u32,
    /// Hours a session-metadata file may sit on disk before it's treated as
    /// an orphan and garbage-collected (spec §4.8: 24-hour cutoff).
    pub session_stale_hours: u32,
    /// Default top-k for similarity search when a caller doesn't specify one.
    pub default_search_limit: ValidatedLimit,
    /// Default blast-radius hop bound when a caller doesn't specify one.
    pub default_blast_radius_depth: ValidatedDepth,
    /// Busy-timeout in milliseconds before a store operation fails `Busy`.
    pub busy_timeout_ms: u32,
}

impl KnowledgeConfig {
    pub fn builder() -> KnowledgeConfigBuilder {
        KnowledgeConfigBuilder::new()
    }
}

/// Fluent builder for [`KnowledgeConfig`], matching the crate's
/// `XxxBuilder::new().field(..).build()?` convention.
pub struct KnowledgeConfigBuilder {
    store_path: Option<PathBuf>,
    session_dir: Option<PathBuf>,
    stale_workflow_hours: u32,
    session_stale_hours: u32,
    default_search_limit: ValidatedLimit,
    default_blast_radius_depth: ValidatedDepth,
    busy_timeout_ms: u32,
}

impl Default for KnowledgeConfigBuilder {
    fn default() -> Self {
        Self {
            store_path: None,
            session_dir: None,
            stale_workflow_hours: 24,
            session_stale_hours: 24,
            default_search_limit: ValidatedLimit::default(),
            default_blast_radius_depth: ValidatedDepth::default(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl KnowledgeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_path(mut self, path: impl AsRef<Path>) -> Self {
        self.store_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn session_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.session_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stale_workflow_hours(mut self, hours: u32) -> Self {
        self.stale_workflow_hours = hours;
        self
    }

    pub fn session_stale_hours(mut self, hours: u32) -> Self {
        self.session_stale_hours = hours;
        self
    }

    pub fn default_search_limit(mut self, limit: ValidatedLimit) -> Self {
        self.default_search_limit = limit;
        self
    }

    pub fn default_blast_radius_depth(mut self, depth: ValidatedDepth) -> Self {
        self.default_blast_radius_depth = depth;
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Result<KnowledgeConfig> {
        let store_path = self
            .store_path
            .unwrap_or_else(|| PathBuf::from(".claude/execution-state.db"));
        let session_dir = self.session_dir.unwrap_or_else(default_session_dir);
        ensure!(self.stale_workflow_hours > 0, "stale_workflow_hours must be non-zero");
        ensure!(self.session_stale_hours > 0, "session_stale_hours must be non-zero");
        ensure!(self.busy_timeout_ms > 0, "busy_timeout_ms must be non-zero");

        Ok(KnowledgeConfig {
            store_path,
            session_dir,
            stale_workflow_hours: self.stale_workflow_hours,
            session_stale_hours: self.session_stale_hours,
            default_search_limit: self.default_search_limit,
            default_blast_radius_depth: self.default_blast_radius_depth,
            busy_timeout_ms: self.busy_timeout_ms,
        })
    }
}

fn default_session_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".claude-knowledge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_applies_defaults() {
        let cfg = KnowledgeConfig::builder().build().unwrap();
        assert_eq!(cfg.stale_workflow_hours, 24);
        assert_eq!(cfg.session_stale_hours, 24);
    }

    #[test]
    fn build_rejects_zero_thresholds() {
        let result = KnowledgeConfig::builder().stale_workflow_hours(0).build();
        assert!(result.is_err());
    }
}
