//! The `Parser` component (spec §4.2): file selection over a package root,
//! then a two-pass entity/relationship extraction driven by any
//! `SourceParser`. File walking is grounded on the teacher's
//! `binary_relationship_engine.rs::collect_source_files_from_repo`
//! (stack-based directory walk, `should_skip_directory`), generalized to the
//! TypeScript exclusion list.

use crate::interfaces::SourceParser;
use crate::path_utils::normalize_path_relative;
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "vue"];
const SKIP_DIR_NAMES: &[&str] = &["node_modules", "test", "tests", "__tests__", ".git"];

/// One extracted code entity, pre-id-assignment. `Parser` turns this into a
/// stored row once it knows the package and file path (spec §3.2).
#[derive(Debug, Clone)]
pub struct RawEntity {
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub line: u32,
    pub exported: bool,
    pub metadata: serde_json::Value,
    pub jsdoc: Option<String>,
}

/// One extracted relationship, referencing entities by their structured id
/// or, for unresolved imports, an `external:{specifier}` sentinel.
#[derive(Debug, Clone)]
pub struct RawRelationship {
    pub from_id: String,
    pub to_id: String,
    pub rel_type: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParserStats {
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub entities_found: usize,
    pub relationships_found: usize,
}

/// Result of parsing a package (or an incremental subset): new entities and
/// relationships plus run statistics. `GraphStore` consumes this directly.
#[derive(Debug, Clone, Default)]
pub struct FileOutcome {
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
    pub stats: ParserStats,
}

pub struct Parser {
    source_parser: Arc<dyn SourceParser>,
}

impl Parser {
    pub fn new(source_parser: Arc<dyn SourceParser>) -> Self {
        Self { source_parser }
    }

    /// Recursively collect candidate source files under `root`, applying the
    /// exclusion rules: declaration files, test-suffixed files, and
    /// descendants of `node_modules`/`test`/`tests`/`__tests__`.
    pub async fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to read directory");
                    continue;
                }
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

                if is_selectable(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Full-mode parse: walk `root`, parse every selected file.
    #[instrument(skip(self))]
    pub async fn parse_package(&self, package: &str, root: &Path) -> Result<FileOutcome> {
        let files = self.collect_files(root).await?;
        self.parse_files(package, root, &files, &files).await
    }

    /// Incremental-mode parse: parse only `changed`, but load `context_files`
    /// (typically the full package file list) so cross-file name resolution
    /// for imports keeps working on a best-effort basis.
    #[instrument(skip(self, context_files))]
    pub async fn parse_incremental(
        &self,
        package: &str,
        root: &Path,
        changed: &[PathBuf],
        context_files: &[PathBuf],
    ) -> Result<FileOutcome> {
        self.parse_files(package, root, changed, context_files).await
    }

    async fn parse_files(
        &self,
        package: &str,
        root: &Path,
        target_files: &[PathBuf],
        context_files: &[PathBuf],
    ) -> Result<FileOutcome> {
        let mut stats = ParserStats::default();

        // Entity pass: over the full context so cross-file resolution has
        // every definition available, but only target files' output is kept.
        let mut all_entities: HashMap<String, Vec<RawEntity>> = HashMap::new();
        for path in context_files {
            let relative = normalize_path_relative(path, root);
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    debug!(path = %relative, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            match self.source_parser.declarations(&content, &relative) {
                Ok(decls) => {
                    let entities = decls
                        .into_iter()
                        .map(|d| to_raw_entity(&relative, d))
                        .collect::<Vec<_>>();
                    all_entities.insert(relative, entities);
                }
                Err(e) => {
                    warn!(path = %relative, error = %e, "parse failure");
                    stats.files_skipped += 1;
                }
            }
        }

        // (file_path, name) -> entity_kind lookup, built from every file in
        // context so a named import resolves against the definition in the
        // file it was actually imported from, not merely any file that
        // happens to declare a same-named entity.
        let mut definitions: HashMap<(String, String), String> = HashMap::new();
        for (file_path, entities) in &all_entities {
            for entity in entities {
                definitions
                    .entry((file_path.clone(), entity.name.clone()))
                    .or_insert_with(|| entity.kind.clone());
            }
        }

        let target_set: HashSet<String> = target_files
            .iter()
            .map(|p| normalize_path_relative(p, root))
            .collect();

        let mut entities_out = Vec::new();
        let mut relationships_out = Vec::new();

        for path in target_files {
            let relative = normalize_path_relative(path, root);
            if !target_set.contains(&relative) {
                continue;
            }
            let Some(file_entities) = all_entities.get(&relative) else {
                continue;
            };

            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(_) => continue,
            };

            let file_entity_id = format!("{package}:file:{relative}");
            entities_out.push(RawEntity {
                file_path: relative.clone(),
                kind: "file".to_string(),
                name: relative.clone(),
                line: 0,
                exported: false,
                metadata: serde_json::Value::Null,
                jsdoc: None,
            });
            entities_out.extend(file_entities.iter().cloned());
            stats.files_parsed += 1;

            let imports = match self.source_parser.references(&content, &relative) {
                Ok(refs) => refs,
                Err(e) => {
                    warn!(path = %relative, error = %e, "reference pass failed");
                    continue;
                }
            };

            // local-name -> entity id, for resolving bare identifier calls.
            let mut local_ids: HashMap<String, String> = HashMap::new();
            for entity in file_entities {
                local_ids.insert(
                    entity.name.clone(),
                    format!("{package}:{relative}:{}:{}", entity.kind, entity.name),
                );
            }

            let mut imported_names: HashMap<String, String> = HashMap::new();

            for reference in imports {
                if let Some(specifier) = &reference.import_specifier {
                    let resolved_file = resolve_relative_import(&relative, specifier);
                    let to_id = resolved_file
                        .as_deref()
                        .filter(|f| all_entities.contains_key(*f))
                        .map(|f| format!("{package}:file:{f}"))
                        .unwrap_or_else(|| format!("external:{specifier}"));

                    relationships_out.push(RawRelationship {
                        from_id: file_entity_id.clone(),
                        to_id,
                        rel_type: "imports".to_string(),
                        metadata: None,
                    });

                    if let Some(def_file) = &resolved_file {
                        for name in &reference.imported_names {
                            if let Some(def_kind) =
                                definitions.get(&(def_file.clone(), name.clone()))
                            {
                                imported_names.insert(
                                    name.clone(),
                                    format!("{package}:{def_file}:{def_kind}:{name}"),
                                );
                            }
                        }
                    }
                    continue;
                }

                if reference.is_template_component_usage {
                    let component_id = imported_names
                        .get(&reference.callee_name)
                        .or_else(|| local_ids.get(&reference.callee_name))
                        .cloned()
                        .unwrap_or_else(|| format!("external:{}", reference.callee_name));
                    relationships_out.push(RawRelationship {
                        from_id: file_entity_id.clone(),
                        to_id: component_id,
                        rel_type: "calls".to_string(),
                        metadata: Some(serde_json::json!({"usage": "template-component"})),
                    });
                    continue;
                }

                if reference.callee_name.is_empty() {
                    continue;
                }

                let caller_id = file_entities
                    .iter()
                    .find(|e| reference.line >= e.line && e.kind == "function")
                    .map(|e| format!("{package}:{relative}:{}:{}", e.kind, e.name))
                    .unwrap_or_else(|| file_entity_id.clone());

                let callee_id = if reference.receiver.is_some() {
                    // Method call: only resolved if it happens to be a known
                    // local function name; otherwise dropped per spec §3.2.
                    local_ids.get(&reference.callee_name).cloned()
                } else {
                    local_ids
                        .get(&reference.callee_name)
                        .or_else(|| imported_names.get(&reference.callee_name))
                        .cloned()
                };

                if let Some(callee_id) = callee_id {
                    relationships_out.push(RawRelationship {
                        from_id: caller_id,
                        to_id: callee_id,
                        rel_type: "calls".to_string(),
                        metadata: None,
                    });
                }
            }
        }

        stats.entities_found = entities_out.len();
        stats.relationships_found = relationships_out.len();

        Ok(FileOutcome {
            entities: entities_out,
            relationships: relationships_out,
            stats,
        })
    }
}

fn is_selectable(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !SOURCE_EXTENSIONS.contains(&ext) {
        return false;
    }
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name.ends_with(".d.ts") {
        return false;
    }
    if file_name.contains(".test.") || file_name.contains(".spec.") {
        return false;
    }
    true
}

fn to_raw_entity(file_path: &str, decl: crate::interfaces::DeclarationRecord) -> RawEntity {
    let metadata = serde_json::json!({
        "isAsync": decl.is_async,
        "isGenerator": decl.is_generator,
        "isArrow": decl.is_arrow,
        "parameters": decl.parameters,
        "returnType": decl.return_type,
        "typeParameters": decl.type_parameters,
    });
    RawEntity {
        file_path: file_path.to_string(),
        kind: decl.kind,
        name: decl.name,
        line: decl.line,
        exported: decl.exported,
        metadata,
        jsdoc: decl.jsdoc,
    }
}

/// Resolve a relative import specifier (`./util`, `../foo/bar`) against the
/// importing file's directory, trying the TS source extensions in turn.
/// Bare specifiers (no leading `.`) are left unresolved (caller falls back
/// to `external:`).
fn resolve_relative_import(importing_file: &str, specifier: &str) -> Option<String> {
    if !specifier.starts_with('.') {
        return None;
    }
    let base_dir = Path::new(importing_file).parent().unwrap_or_else(|| Path::new(""));
    let joined = base_dir.join(specifier);
    let joined = normalize_components(&joined);

    for ext in SOURCE_EXTENSIONS {
        let candidate = format!("{}.{}", joined, ext);
        if candidate.ends_with(&format!(".{ext}")) {
            return Some(candidate);
        }
    }
    None
}

fn normalize_components(path: &Path) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                parts.pop();
            }
            std::path::Component::Normal(part) => {
                parts.push(part.to_str().unwrap_or(""));
            }
            _ => {}
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TypeScriptSourceParser;

    #[test]
    fn selects_ts_and_rejects_declaration_and_test_files() {
        assert!(is_selectable(Path::new("src/foo.ts")));
        assert!(is_selectable(Path::new("src/Widget.vue")));
        assert!(!is_selectable(Path::new("src/foo.d.ts")));
        assert!(!is_selectable(Path::new("src/foo.test.ts")));
        assert!(!is_selectable(Path::new("src/foo.spec.tsx")));
        assert!(!is_selectable(Path::new("src/foo.js")));
    }

    #[test]
    fn resolves_relative_import_with_parent_dir() {
        let resolved = resolve_relative_import("src/a/b.ts", "../util").unwrap();
        assert_eq!(resolved, "src/util.ts");
    }

    #[tokio::test]
    async fn two_pass_resolves_cross_file_call() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("util.ts"),
            "export function helper() { return 1; }",
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("main.ts"),
            "import { helper } from './util';\nexport function run() { helper(); }",
        )
        .await
        .unwrap();

        let parser = Parser::new(Arc::new(TypeScriptSourceParser::new()));
        let outcome = parser.parse_package("pkg", dir.path()).await.unwrap();

        assert!(outcome
            .relationships
            .iter()
            .any(|r| r.rel_type == "calls" && r.to_id == "pkg:util.ts:function:helper"));
    }

    #[tokio::test]
    async fn unresolvable_method_call_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("main.ts"),
            "export function run(obj: Thing) { obj.doStuff(); }",
        )
        .await
        .unwrap();

        let parser = Parser::new(Arc::new(TypeScriptSourceParser::new()));
        let outcome = parser.parse_package("pkg", dir.path()).await.unwrap();

        assert!(!outcome.relationships.iter().any(|r| r.rel_type == "calls"));
    }
}
