//! Fluent builders for the record types `Checkpoint` and `Knowledge` persist,
//! grounded on the teacher's `DocumentBuilder`/`QueryBuilder` shape: optional
//! setters consumed by value, required fields checked once in `build()`,
//! sensible defaults (a generated id, `Knowledge`'s confidence left unset)
//! applied rather than demanded from the caller.

use crate::knowledge::{Learning, Mistake, Pattern};
use crate::types::ValidatedConfidence;
use anyhow::{ensure, Result};
use uuid::Uuid;

/// The subset of `Workflow` fields a caller supplies; `Checkpoint::create_workflow`
/// fills in `phase = research`, `status = running`, and the timestamps.
pub struct NewWorkflow {
    pub id: String,
    pub issue_number: Option<i64>,
    pub branch: String,
    pub worktree: Option<String>,
}

pub struct WorkflowBuilder {
    id: Option<String>,
    issue_number: Option<i64>,
    branch: Option<String>,
    worktree: Option<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            issue_number: None,
            branch: None,
            worktree: None,
        }
    }

    /// Set the workflow id. If not specified, a new UUID is generated.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn issue_number(mut self, issue_number: i64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn worktree(mut self, worktree: impl Into<String>) -> Self {
        self.worktree = Some(worktree.into());
        self
    }

    pub fn build(self) -> Result<NewWorkflow> {
        let branch = self
            .branch
            .ok_or_else(|| anyhow::anyhow!("workflow branch is required"))?;
        ensure!(!branch.trim().is_empty(), "workflow branch cannot be empty");

        Ok(NewWorkflow {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            issue_number: self.issue_number,
            branch,
            worktree: self.worktree,
        })
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The subset of `Milestone` fields a caller supplies; `Checkpoint::create_milestone`
/// fills in `phase = planning`, `status = running`, and the timestamps.
pub struct NewMilestone {
    pub id: String,
    pub name: String,
    pub github_number: Option<i64>,
}

pub struct MilestoneBuilder {
    id: Option<String>,
    name: Option<String>,
    github_number: Option<i64>,
}

impl MilestoneBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            github_number: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn github_number(mut self, github_number: i64) -> Self {
        self.github_number = Some(github_number);
        self
    }

    pub fn build(self) -> Result<NewMilestone> {
        let name = self
            .name
            .ok_or_else(|| anyhow::anyhow!("milestone name is required"))?;
        ensure!(!name.trim().is_empty(), "milestone name cannot be empty");

        Ok(NewMilestone {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name,
            github_number: self.github_number,
        })
    }
}

impl Default for MilestoneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for `Learning` (spec §3.1). `created_at` is left at `0`
/// and overwritten by `Knowledge::store_learnings`, which timestamps every
/// row in the same transaction at insert time.
pub struct LearningBuilder {
    id: Option<String>,
    content: Option<String>,
    source_issue: Option<String>,
    code_area: Option<String>,
    file_path: Option<String>,
    confidence: Option<f64>,
}

impl LearningBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            content: None,
            source_issue: None,
            code_area: None,
            file_path: None,
            confidence: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn source_issue(mut self, issue: impl Into<String>) -> Self {
        self.source_issue = Some(issue.into());
        self
    }

    pub fn code_area(mut self, area: impl Into<String>) -> Self {
        self.code_area = Some(area.into());
        self
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Result<Self> {
        ValidatedConfidence::new(confidence)?;
        self.confidence = Some(confidence);
        Ok(self)
    }

    pub fn build(self) -> Result<Learning> {
        let content = self
            .content
            .ok_or_else(|| anyhow::anyhow!("learning content is required"))?;
        ensure!(!content.trim().is_empty(), "learning content cannot be empty");

        Ok(Learning {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            content,
            source_issue: self.source_issue,
            code_area: self.code_area,
            file_path: self.file_path,
            confidence: self.confidence,
            created_at: 0,
        })
    }
}

impl Default for LearningBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for `Pattern` (spec §3.1).
pub struct PatternBuilder {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    code_area: Option<String>,
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            description: None,
            code_area: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn code_area(mut self, area: impl Into<String>) -> Self {
        self.code_area = Some(area.into());
        self
    }

    pub fn build(self) -> Result<Pattern> {
        let name = self
            .name
            .ok_or_else(|| anyhow::anyhow!("pattern name is required"))?;
        ensure!(!name.trim().is_empty(), "pattern name cannot be empty");
        let description = self
            .description
            .ok_or_else(|| anyhow::anyhow!("pattern description is required"))?;

        Ok(Pattern {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name,
            description,
            code_area: self.code_area,
            created_at: 0,
        })
    }
}

impl Default for PatternBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for `Mistake` (spec §3.1).
pub struct MistakeBuilder {
    id: Option<String>,
    description: Option<String>,
    how_fixed: Option<String>,
    file_path: Option<String>,
}

impl MistakeBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            description: None,
            how_fixed: None,
            file_path: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn how_fixed(mut self, how_fixed: impl Into<String>) -> Self {
        self.how_fixed = Some(how_fixed.into());
        self
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Mistake> {
        let description = self
            .description
            .ok_or_else(|| anyhow::anyhow!("mistake description is required"))?;
        ensure!(!description.trim().is_empty(), "mistake description cannot be empty");
        let how_fixed = self
            .how_fixed
            .ok_or_else(|| anyhow::anyhow!("mistake how_fixed is required"))?;

        Ok(Mistake {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            description,
            how_fixed,
            file_path: self.file_path,
            created_at: 0,
        })
    }
}

impl Default for MistakeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_builder_requires_branch() {
        assert!(WorkflowBuilder::new().build().is_err());
        let workflow = WorkflowBuilder::new().branch("feature/x").issue_number(7).build().unwrap();
        assert_eq!(workflow.branch, "feature/x");
        assert_eq!(workflow.issue_number, Some(7));
    }

    #[test]
    fn workflow_builder_generates_id_when_absent() {
        let a = WorkflowBuilder::new().branch("b").build().unwrap();
        let b = WorkflowBuilder::new().branch("b").build().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn milestone_builder_requires_name() {
        assert!(MilestoneBuilder::new().build().is_err());
        let milestone = MilestoneBuilder::new().name("Q3 cleanup").build().unwrap();
        assert_eq!(milestone.name, "Q3 cleanup");
    }

    #[test]
    fn learning_builder_rejects_out_of_range_confidence() {
        assert!(LearningBuilder::new().content("x").confidence(1.5).is_err());
    }

    #[test]
    fn learning_builder_requires_content() {
        assert!(LearningBuilder::new().build().is_err());
        let learning = LearningBuilder::new()
            .content("cache eviction policy")
            .code_area("cache")
            .build()
            .unwrap();
        assert_eq!(learning.code_area.as_deref(), Some("cache"));
    }

    #[test]
    fn pattern_builder_requires_name_and_description() {
        assert!(PatternBuilder::new().build().is_err());
        let pattern = PatternBuilder::new()
            .name("retry with backoff")
            .description("wrap flaky calls in exponential backoff")
            .build()
            .unwrap();
        assert_eq!(pattern.name, "retry with backoff");
    }

    #[test]
    fn mistake_builder_requires_description_and_fix() {
        assert!(MistakeBuilder::new().build().is_err());
        let mistake = MistakeBuilder::new()
            .description("forgot to close the connection")
            .how_fixed("wrapped in a guard")
            .build()
            .unwrap();
        assert_eq!(mistake.how_fixed, "wrapped in a guard");
    }
}
