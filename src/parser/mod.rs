//! Source parsing (spec §4.2): a tree-sitter-typescript-backed
//! `SourceParser` plus the `Parser` component that runs the two-pass
//! entity/relationship extraction over a package and writes the result
//! through `GraphStore`. Grounded on the teacher's
//! `dependency_extractor.rs` (tree-sitter `Query`/`QueryCursor` usage,
//! parser-pool reuse) and `parsing/tree_sitter.rs` (node-kind constant
//! tables), retargeted from Rust/Python onto TypeScript/TSX and Vue SFCs.

pub mod entities;
mod typescript;

pub use entities::{FileOutcome, Parser as CodeParser, ParserStats};
pub use typescript::TypeScriptSourceParser;
