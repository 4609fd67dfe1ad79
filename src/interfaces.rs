//! Interfaces this crate *consumes* rather than implements (spec §6):
//! `Embedder`, `LearningExtractor`, `SourceParser`, and `Clock`. The
//! embedding application wires concrete implementations through these
//! traits; the core only depends on the contract, following the same
//! `#[async_trait]` shape the teacher uses for its `Storage`/`Index` traits.

use anyhow::Result;
use async_trait::async_trait;

/// Maps text to a fixed-dimension vector. Implementations must be
/// deterministic for a given `(model_id, text)` pair so that identical
/// content yields identical vectors across runs — this is what lets the
/// docs indexer skip unchanged files by content hash alone (spec §4.5).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single fragment.
    ///
    /// # Preconditions
    /// - `text` is non-empty.
    ///
    /// # Postconditions
    /// - Returns a vector of exactly `dimension()` components.
    /// - Two calls with the same `text` on the same embedder return
    ///   bitwise-identical vectors.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch, in input order. Default implementation embeds one at
    /// a time; implementations backed by a batching API override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Fixed dimension `D` of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Identifier recorded alongside every embedding row so a later run
    /// can detect a model change (spec §3.5).
    fn model_id(&self) -> &str;
}

/// A learning/pattern/mistake extraction client, driven by an out-of-scope
/// language model. The core only consumes its output shape.
#[derive(Debug, Clone, Default)]
pub struct ExtractedKnowledge {
    pub learnings: Vec<ExtractedLearning>,
    pub patterns: Vec<ExtractedPattern>,
    pub mistakes: Vec<ExtractedMistake>,
}

#[derive(Debug, Clone)]
pub struct ExtractedLearning {
    pub content: String,
    pub source_issue: Option<String>,
    pub code_area: Option<String>,
    pub file_path: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExtractedPattern {
    pub name: String,
    pub description: String,
    pub code_area: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedMistake {
    pub description: String,
    pub how_fixed: String,
    pub file_path: Option<String>,
}

/// A single commit touched during a session, fed to `LearningExtractor`
/// alongside the transcripts so learnings can be attributed (spec §1, §4.9).
#[derive(Debug, Clone)]
pub struct CommitRef {
    pub sha: String,
    pub message: String,
}

#[async_trait]
pub trait LearningExtractor: Send + Sync {
    /// Extract learnings, patterns, and mistakes from session transcripts
    /// and the commits made during the session.
    ///
    /// # Postconditions
    /// - Never panics on malformed transcript content; returns a
    ///   best-effort (possibly empty) result instead.
    async fn extract(
        &self,
        transcripts: &[String],
        commits: &[CommitRef],
        files: &[String],
    ) -> Result<ExtractedKnowledge>;
}

/// A single declaration site found by the AST/parser library, before the
/// `Parser` component (§4.2) projects it into the entity/relationship
/// model. The core depends only on this contract, not on any particular
/// parser implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationRecord {
    pub name: String,
    pub kind: String,
    pub line: u32,
    pub exported: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_arrow: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub type_parameters: Vec<String>,
    pub jsdoc: Option<String>,
}

/// A single reference (call expression, identifier use, import clause)
/// found by the AST/parser library during the relationship pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub callee_name: String,
    pub receiver: Option<String>,
    pub line: u32,
    pub column: u32,
    pub import_specifier: Option<String>,
    pub imported_names: Vec<String>,
    /// A Vue template's use of a component tag, resolved against that
    /// file's imports rather than a call expression. Projected to a
    /// `calls` relationship with `usage: "template-component"` metadata.
    pub is_template_component_usage: bool,
}

/// The AST/parser library contract (spec §1, §6): given file content,
/// return declaration and reference records. The `Parser` component in
/// `crate::parser` is a thin adapter that projects these records into the
/// stored entity/relationship model; this trait specifies the contract,
/// not the grammar.
pub trait SourceParser: Send + Sync {
    fn declarations(&self, file_content: &str, file_path: &str) -> Result<Vec<DeclarationRecord>>;
    fn references(&self, file_content: &str, file_path: &str) -> Result<Vec<ReferenceRecord>>;
}

/// Returns the current timestamp, injected so tests can pin time instead of
/// reading the wall clock (spec §6).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The default `Clock`, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A fixed-time clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
