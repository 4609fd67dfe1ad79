//! claude-knowledge: a local-first engineering-knowledge engine.
//!
//! A single SQLite file (`Store`) backs four components — the code graph
//! (`Parser` + `GraphStore` + `GraphQuery`), free-form knowledge
//! (`Knowledge`), spec/doc indexing (`Docs`), and session/workflow state
//! (`Checkpoint`) — tied together at the session boundary by `Hooks`.
//! Embedding and learning-extraction are external concerns this crate only
//! depends on through the traits in `interfaces`.

pub mod builders;
pub mod checkpoint;
pub mod config;
pub mod docs;
pub mod embedder;
pub mod error;
pub mod graph_query;
pub mod graph_store;
pub mod hooks;
pub mod interfaces;
pub mod knowledge;
pub mod observability;
pub mod parser;
pub mod path_utils;
pub mod store;
pub mod types;
pub mod validation;

pub use builders::{
    LearningBuilder, MilestoneBuilder, MistakeBuilder, NewMilestone, NewWorkflow, PatternBuilder,
    WorkflowBuilder,
};
pub use checkpoint::{
    ActionResult, Checkpoint, Milestone, MilestoneBaseline, MilestonePhase, SessionMetadata,
    Status, Workflow, WorkflowPhase,
};
pub use config::{KnowledgeConfig, KnowledgeConfigBuilder};
pub use docs::{DocSearchHit, DocSectionSplit, Docs, IndexStatus};
pub use embedder::HashingEmbedder;
pub use error::KnowledgeError;
pub use graph_query::{BlastRadiusRow, CodeEntityRow, DependencyRow, GraphQuery, GraphSummary};
pub use graph_store::GraphStore;
pub use hooks::{Hooks, SessionEndInput, SessionEndReport, SessionStartInput, SessionStartReport};
pub use interfaces::{
    Clock, CommitRef, DeclarationRecord, Embedder, ExtractedKnowledge, ExtractedLearning,
    ExtractedMistake, ExtractedPattern, FixedClock, LearningExtractor, ReferenceRecord,
    SourceParser, SystemClock,
};
pub use knowledge::{
    Knowledge, KnowledgeFilter, KnowledgeStats, Learning, Mistake, Pattern, SearchOptions,
    SimilarLearning,
};
pub use observability::{
    get_metrics, init_logging, init_logging_with_level, log_operation, record_metric,
    with_trace_id, MetricType, Operation, OperationContext,
};
pub use parser::{CodeParser, FileOutcome, ParserStats, TypeScriptSourceParser};
pub use store::{HealthReport, Store};
pub use types::{
    CodeEntityKind, CodeRelationKind, KnowledgeRelationKind, NonEmptyString, TimestampPair,
    ValidatedConfidence, ValidatedDepth, ValidatedLimit, ValidatedPath,
};
