//! Concrete `SourceParser` for TypeScript/TSX and Vue SFCs, built on
//! `tree-sitter-typescript`. Grounded on the teacher's
//! `dependency_extractor.rs` query style (`Query`/`QueryCursor`, capture-name
//! matching) and `parsing/tree_sitter.rs` node-kind tables, retargeted at the
//! TS grammar's own declaration/reference productions.

use crate::error::KnowledgeError;
use crate::interfaces::{DeclarationRecord, ReferenceRecord, SourceParser};
use anyhow::{Context, Result};
use std::sync::Mutex;
use tree_sitter::{Node, Parser};

const DECLARATION_NODES: &[&str] = &[
    "function_declaration",
    "class_declaration",
    "interface_declaration",
    "type_alias_declaration",
    "enum_declaration",
    "method_definition",
];

/// Extract the `<script>` / `<script setup>` block of a `.vue` single-file
/// component with a cheap region scan, leaving everything else untouched.
/// Returns `None` if no script block is present.
fn extract_vue_script(content: &str) -> Option<&str> {
    let open_tag_start = content.find("<script")?;
    let open_tag_end = content[open_tag_start..].find('>')? + open_tag_start + 1;
    let close_tag = content[open_tag_end..].find("</script>")? + open_tag_end;
    Some(&content[open_tag_end..close_tag])
}

/// Template-region component tag names, used for the `template-component`
/// usage edge. Deliberately coarse: any PascalCase or kebab-cased custom
/// element tag in `<template>` counts as a usage.
fn extract_vue_template_components(content: &str) -> Vec<String> {
    let Some(start) = content.find("<template") else {
        return Vec::new();
    };
    let Some(tag_end) = content[start..].find('>').map(|i| i + start + 1) else {
        return Vec::new();
    };
    let Some(close) = content[tag_end..].find("</template>").map(|i| i + tag_end) else {
        return Vec::new();
    };
    let template = &content[tag_end..close];

    let mut names = Vec::new();
    let mut rest = template;
    while let Some(lt) = rest.find('<') {
        rest = &rest[lt + 1..];
        if rest.starts_with('/') || rest.starts_with('!') {
            continue;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let tag = &rest[..end];
        if tag.chars().next().is_some_and(|c| c.is_ascii_uppercase()) || tag.contains('-') {
            names.push(tag.to_string());
        }
    }
    names.sort();
    names.dedup();
    names
}

/// `SourceParser` backed by a pooled tree-sitter TypeScript parser. The pool
/// mirrors the teacher's `acquire_parser`/`release_parser` pattern in
/// `dependency_extractor.rs`, adapted to a single grammar.
pub struct TypeScriptSourceParser {
    pool: Mutex<Vec<Parser>>,
}

impl Default for TypeScriptSourceParser {
    fn default() -> Self {
        Self { pool: Mutex::new(Vec::new()) }
    }
}

impl TypeScriptSourceParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> Result<Parser> {
        let mut pool = self.pool.lock().unwrap();
        if let Some(parser) = pool.pop() {
            return Ok(parser);
        }
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .context("loading tree-sitter-typescript grammar")?;
        Ok(parser)
    }

    fn release(&self, parser: Parser) {
        let mut pool = self.pool.lock().unwrap();
        if pool.len() < 8 {
            pool.push(parser);
        }
    }

    /// Strip a `.vue` file down to its script content if it looks like one;
    /// TS/TSX files pass through untouched.
    fn effective_source<'a>(&self, file_path: &str, content: &'a str) -> &'a str {
        if file_path.ends_with(".vue") {
            extract_vue_script(content).unwrap_or(content)
        } else {
            content
        }
    }

    fn parse_tree(&self, source: &str) -> Result<tree_sitter::Tree> {
        let mut parser = self.acquire()?;
        let tree = parser.parse(source, None).ok_or_else(|| {
            anyhow::anyhow!(KnowledgeError::ParseFailure {
                path: String::new(),
                reason: "tree-sitter returned no tree".to_string(),
            })
        });
        self.release(parser);
        tree
    }
}

impl SourceParser for TypeScriptSourceParser {
    fn declarations(&self, file_content: &str, file_path: &str) -> Result<Vec<DeclarationRecord>> {
        let source = self.effective_source(file_path, file_content);
        let tree = self.parse_tree(source)?;
        let bytes = source.as_bytes();
        let mut out = Vec::new();

        let mut cursor = tree.root_node().walk();
        for child in tree.root_node().children(&mut cursor) {
            collect_declarations(child, bytes, &mut out);
        }

        Ok(out)
    }

    fn references(&self, file_content: &str, file_path: &str) -> Result<Vec<ReferenceRecord>> {
        let source = self.effective_source(file_path, file_content);
        let tree = self.parse_tree(source)?;
        let bytes = source.as_bytes();
        let mut out = Vec::new();
        collect_references(tree.root_node(), bytes, &mut out);

        if file_path.ends_with(".vue") {
            for component in extract_vue_template_components(file_content) {
                out.push(ReferenceRecord {
                    callee_name: component,
                    receiver: None,
                    line: 0,
                    column: 0,
                    import_specifier: None,
                    imported_names: Vec::new(),
                    is_template_component_usage: true,
                });
            }
        }

        Ok(out)
    }
}

/// Walk top-level statements (and class bodies, one level deep, for
/// methods) and emit a `DeclarationRecord` per recognized node kind.
fn collect_declarations(node: Node, source: &[u8], out: &mut Vec<DeclarationRecord>) {
    let kind = node.kind();

    let exported = node.parent().is_some_and(|p| p.kind() == "export_statement")
        || kind == "export_statement";

    match kind {
        "function_declaration" => {
            if let Some(record) = function_record(node, source, exported) {
                out.push(record);
            }
        }
        "class_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(DeclarationRecord {
                    name,
                    kind: "class".to_string(),
                    line: node.start_position().row as u32 + 1,
                    exported,
                    is_async: false,
                    is_generator: false,
                    is_arrow: false,
                    parameters: Vec::new(),
                    return_type: None,
                    type_parameters: type_parameter_names(node, source),
                    jsdoc: preceding_jsdoc(node, source),
                });
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for member in body.children(&mut cursor) {
                        if member.kind() == "method_definition" {
                            if let Some(record) = function_record(member, source, false) {
                                out.push(record);
                            }
                        }
                    }
                }
            }
        }
        "interface_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(DeclarationRecord {
                    name,
                    kind: "interface".to_string(),
                    line: node.start_position().row as u32 + 1,
                    exported,
                    is_async: false,
                    is_generator: false,
                    is_arrow: false,
                    parameters: Vec::new(),
                    return_type: None,
                    type_parameters: type_parameter_names(node, source),
                    jsdoc: preceding_jsdoc(node, source),
                });
            }
        }
        "type_alias_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(DeclarationRecord {
                    name,
                    kind: "type".to_string(),
                    line: node.start_position().row as u32 + 1,
                    exported,
                    is_async: false,
                    is_generator: false,
                    is_arrow: false,
                    parameters: Vec::new(),
                    return_type: None,
                    type_parameters: type_parameter_names(node, source),
                    jsdoc: preceding_jsdoc(node, source),
                });
            }
        }
        "enum_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(DeclarationRecord {
                    name,
                    kind: "enum".to_string(),
                    line: node.start_position().row as u32 + 1,
                    exported,
                    is_async: false,
                    is_generator: false,
                    is_arrow: false,
                    parameters: Vec::new(),
                    return_type: None,
                    type_parameters: Vec::new(),
                    jsdoc: preceding_jsdoc(node, source),
                });
            }
        }
        "lexical_declaration" | "variable_statement" => {
            collect_variable_declarators(node, source, exported, out);
        }
        "export_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_declarations(child, source, out);
            }
        }
        _ => {}
    }
}

fn collect_variable_declarators(
    node: Node,
    source: &[u8],
    exported: bool,
    out: &mut Vec<DeclarationRecord>,
) {
    let mut cursor = node.walk();
    for declarator in node.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name) = field_text(declarator, "name", source) else {
            continue;
        };
        let value = declarator.child_by_field_name("value");
        let is_arrow_or_fn = value.is_some_and(|v| {
            matches!(v.kind(), "arrow_function" | "function_expression")
        });

        if is_arrow_or_fn {
            let value = value.unwrap();
            out.push(DeclarationRecord {
                name,
                kind: "function".to_string(),
                line: declarator.start_position().row as u32 + 1,
                exported,
                is_async: node_text(value, source).starts_with("async"),
                is_generator: false,
                is_arrow: value.kind() == "arrow_function",
                parameters: parameter_names(value, source),
                return_type: field_text(value, "return_type", source),
                type_parameters: type_parameter_names(value, source),
                jsdoc: preceding_jsdoc(node, source),
            });
        } else {
            out.push(DeclarationRecord {
                name,
                kind: "variable".to_string(),
                line: declarator.start_position().row as u32 + 1,
                exported,
                is_async: false,
                is_generator: false,
                is_arrow: false,
                parameters: Vec::new(),
                return_type: None,
                type_parameters: Vec::new(),
                jsdoc: preceding_jsdoc(node, source),
            });
        }
    }
}

fn function_record(node: Node, source: &[u8], exported: bool) -> Option<DeclarationRecord> {
    let name = field_text(node, "name", source)?;
    let text = node_text(node, source);
    Some(DeclarationRecord {
        name,
        kind: "function".to_string(),
        line: node.start_position().row as u32 + 1,
        exported,
        is_async: text.starts_with("async") || text.trim_start().starts_with("async"),
        is_generator: {
            let mut cursor = node.walk();
            node.children(&mut cursor).any(|c| c.kind() == "*")
        },
        is_arrow: false,
        parameters: parameter_names(node, source),
        return_type: field_text(node, "return_type", source),
        type_parameters: type_parameter_names(node, source),
        jsdoc: preceding_jsdoc(node, source),
    })
}

fn parameter_names(fn_node: Node, source: &[u8]) -> Vec<String> {
    let Some(params) = fn_node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        match child.kind() {
            "required_parameter" | "optional_parameter" => {
                if let Some(name) = field_text(child, "pattern", source) {
                    out.push(name);
                }
            }
            "identifier" => out.push(node_text(child, source).to_string()),
            _ => {}
        }
    }
    out
}

fn type_parameter_names(node: Node, source: &[u8]) -> Vec<String> {
    let Some(tp) = node.child_by_field_name("type_parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = tp.walk();
    for child in tp.children(&mut cursor) {
        if child.kind() == "type_parameter" {
            if let Some(name) = field_text(child, "name", source) {
                out.push(name);
            }
        }
    }
    out
}

/// A block comment immediately preceding `node` whose text starts with
/// `/**` is treated as its JSDoc.
fn preceding_jsdoc(node: Node, source: &[u8]) -> Option<String> {
    let sibling = node.prev_sibling()?;
    if sibling.kind() != "comment" {
        return None;
    }
    let text = node_text(sibling, source);
    text.starts_with("/**").then(|| text.to_string())
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source).to_string())
}

fn node_text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Collect call expressions and import statements across the whole tree.
fn collect_references(node: Node, source: &[u8], out: &mut Vec<ReferenceRecord>) {
    match node.kind() {
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                let pos = function.start_position();
                match function.kind() {
                    "identifier" => {
                        out.push(ReferenceRecord {
                            callee_name: node_text(function, source).to_string(),
                            receiver: None,
                            line: pos.row as u32 + 1,
                            column: pos.column as u32,
                            import_specifier: None,
                            imported_names: Vec::new(),
                            is_template_component_usage: false,
                        });
                    }
                    "member_expression" => {
                        if let Some(property) = function.child_by_field_name("property") {
                            let receiver = function
                                .child_by_field_name("object")
                                .map(|o| node_text(o, source).to_string());
                            out.push(ReferenceRecord {
                                callee_name: node_text(property, source).to_string(),
                                receiver,
                                line: pos.row as u32 + 1,
                                column: pos.column as u32,
                                import_specifier: None,
                                imported_names: Vec::new(),
                                is_template_component_usage: false,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        "import_statement" => {
            if let Some(source_node) = node.child_by_field_name("source") {
                let specifier = node_text(source_node, source).trim_matches(['"', '\'']).to_string();
                let imported_names = import_clause_names(node, source);
                out.push(ReferenceRecord {
                    callee_name: String::new(),
                    receiver: None,
                    line: node.start_position().row as u32 + 1,
                    column: node.start_position().column as u32,
                    import_specifier: Some(specifier),
                    imported_names,
                    is_template_component_usage: false,
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_references(child, source, out);
    }
}

fn import_clause_names(node: Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "import_clause" {
            walk_import_clause(child, source, &mut names);
        }
    }
    names
}

fn walk_import_clause(node: Node, source: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "identifier" => out.push(node_text(node, source).to_string()),
        "import_specifier" => {
            if let Some(name) = node.child_by_field_name("name") {
                out.push(node_text(name, source).to_string());
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk_import_clause(child, source, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_top_level_function_declaration() {
        let parser = TypeScriptSourceParser::new();
        let decls = parser
            .declarations("export function add(a: number, b: number): number { return a + b; }", "a.ts")
            .unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "add");
        assert_eq!(decls[0].kind, "function");
        assert!(decls[0].exported);
        assert_eq!(decls[0].parameters, vec!["a", "b"]);
    }

    #[test]
    fn arrow_function_bound_to_const_is_function_kind() {
        let parser = TypeScriptSourceParser::new();
        let decls = parser
            .declarations("const double = (x: number) => x * 2;", "a.ts")
            .unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].kind, "function");
        assert!(decls[0].is_arrow);
    }

    #[test]
    fn plain_initialized_variable_is_variable_kind() {
        let parser = TypeScriptSourceParser::new();
        let decls = parser.declarations("const limit = 50;", "a.ts").unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].kind, "variable");
    }

    #[test]
    fn extracts_call_expression_reference() {
        let parser = TypeScriptSourceParser::new();
        let refs = parser
            .references("function main() { helper(); }", "a.ts")
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].callee_name, "helper");
    }

    #[test]
    fn extracts_named_import() {
        let parser = TypeScriptSourceParser::new();
        let refs = parser
            .references("import { helper } from './util';", "a.ts")
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].import_specifier.as_deref(), Some("./util"));
        assert_eq!(refs[0].imported_names, vec!["helper"]);
    }

    #[test]
    fn vue_sfc_extracts_script_block() {
        let source = "<template><div>hi</div></template>\n<script lang=\"ts\">\nexport function setup() {}\n</script>";
        let script = extract_vue_script(source).unwrap();
        assert!(script.contains("export function setup"));
    }

    #[test]
    fn vue_template_components_are_detected() {
        let source = "<template><MyWidget/><p>text</p></template><script></script>";
        let names = extract_vue_template_components(source);
        assert_eq!(names, vec!["MyWidget".to_string()]);
    }

    #[test]
    fn vue_template_component_usage_is_a_reference_not_a_declaration() {
        let parser = TypeScriptSourceParser::new();
        let source = "<template><MyWidget/></template>\n<script>export function setup() {}</script>";

        let decls = parser.declarations(source, "a.vue").unwrap();
        assert!(!decls.iter().any(|d| d.name == "MyWidget"));

        let refs = parser.references(source, "a.vue").unwrap();
        let usage = refs
            .iter()
            .find(|r| r.is_template_component_usage)
            .expect("template component usage reference");
        assert_eq!(usage.callee_name, "MyWidget");
    }
}
