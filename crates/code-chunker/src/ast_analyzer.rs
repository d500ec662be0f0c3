use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::types::{Chunk, ExportKind, ExportRef, ImportKind, ImportRef, SymbolRef};
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

/// Tree-sitter-backed extractor for the four AST-capable languages. Runs
/// boundary, import and symbol queries over one parse tree per file and
/// assembles them into [`Chunk`] records.
pub struct AstAnalyzer {
    #[allow(dead_code)]
    config: ChunkerConfig,
    parser: Parser,
    language: Language,
}

/// An import statement paired with the source line it starts on. Only the
/// line is needed to decide which chunk it attaches to; it never survives
/// into the emitted `Chunk`.
struct FileImport {
    start_line: usize,
    import: ImportRef,
}

impl AstAnalyzer {
    pub fn new(config: ChunkerConfig, language: Language) -> Result<Self> {
        if !language.supports_ast() {
            return Err(ChunkerError::unsupported_language(language.as_str()));
        }

        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::tree_sitter(format!("failed to set language: {e}")))?;

        Ok(Self {
            config,
            parser,
            language,
        })
    }

    /// Parse `content` and emit one chunk per top-level (or impl/class
    /// member) declaration, falling back to a whole-file chunk if nothing
    /// was recognized.
    pub fn chunk(&mut self, content: &str) -> Result<Vec<Chunk>> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("failed to parse source"))?;
        let root = tree.root_node();

        let imports = self.extract_imports(content, root);
        let symbols = self.extract_symbols(content, root);

        let mut chunks = Vec::new();
        let mut seen = HashSet::new();
        self.extract_chunks(content, root, &imports, &symbols, &mut chunks, &mut seen);

        if chunks.is_empty() {
            chunks.push(Chunk {
                content: content.to_string(),
                language: self.language.as_str().to_string(),
                kind: "whole_file".to_string(),
                container_path: String::new(),
                imports: vec![],
                exports: vec![],
                symbols: vec![],
                start_line: 1,
                end_line: content.lines().count().max(1),
            });
        }

        Ok(chunks)
    }

    fn extract_chunks(
        &self,
        content: &str,
        node: Node,
        imports: &[FileImport],
        symbols: &[SymbolRef],
        chunks: &mut Vec<Chunk>,
        seen: &mut HashSet<(usize, usize)>,
    ) {
        match self.language {
            Language::Rust => self.extract_rust_chunks(content, node, imports, symbols, chunks, seen),
            Language::Python => self.extract_python_chunks(content, node, imports, symbols, chunks, seen),
            Language::JavaScript | Language::TypeScript => {
                self.extract_js_chunks(content, node, imports, symbols, chunks, seen)
            }
            _ => {}
        }
    }

    fn extract_rust_chunks(
        &self,
        content: &str,
        node: Node,
        imports: &[FileImport],
        symbols: &[SymbolRef],
        chunks: &mut Vec<Chunk>,
        seen: &mut HashSet<(usize, usize)>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let kind = match child.kind() {
                "function_item" => Some("function_declaration"),
                "struct_item" => Some("struct_declaration"),
                "enum_item" => Some("enum_declaration"),
                "trait_item" => Some("interface_declaration"),
                "mod_item" => Some("module_declaration"),
                "const_item" => Some("const_declaration"),
                "static_item" => Some("variable_declaration"),
                _ => None,
            };

            if child.kind() == "impl_item" {
                let target = Self::extract_impl_target(content, child);
                let mut decl_cursor = child.walk();
                for impl_child in child.children(&mut decl_cursor) {
                    if impl_child.kind() != "declaration_list" {
                        continue;
                    }
                    let mut member_cursor = impl_child.walk();
                    for member in impl_child.children(&mut member_cursor) {
                        let member_kind = match member.kind() {
                            "function_item" => Some("method_declaration"),
                            "const_item" => Some("const_declaration"),
                            "type_item" => Some("type_alias_declaration"),
                            _ => None,
                        };
                        if let Some(member_kind) = member_kind {
                            self.push_chunk(
                                content,
                                member,
                                member_kind,
                                target.clone().unwrap_or_default(),
                                imports,
                                symbols,
                                chunks,
                                seen,
                            );
                        }
                    }
                }
                continue;
            }

            if child.kind() == "mod_item" {
                self.push_chunk(
                    content,
                    child,
                    "module_declaration",
                    String::new(),
                    imports,
                    symbols,
                    chunks,
                    seen,
                );
                let mut mod_cursor = child.walk();
                for mod_child in child.children(&mut mod_cursor) {
                    if mod_child.kind() == "declaration_list" {
                        self.extract_rust_chunks(content, mod_child, imports, symbols, chunks, seen);
                    }
                }
                continue;
            }

            if let Some(kind) = kind {
                self.push_chunk(content, child, kind, String::new(), imports, symbols, chunks, seen);
            }
        }
    }

    fn extract_python_chunks(
        &self,
        content: &str,
        node: Node,
        imports: &[FileImport],
        symbols: &[SymbolRef],
        chunks: &mut Vec<Chunk>,
        seen: &mut HashSet<(usize, usize)>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "function_definition" => {
                    self.push_chunk(
                        content,
                        child,
                        "function_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                }
                "class_definition" => {
                    let class_name = Self::extract_symbol_name(content, child).unwrap_or_default();
                    self.push_chunk(
                        content,
                        child,
                        "class_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                    let mut body_cursor = child.walk();
                    for body_child in child.children(&mut body_cursor) {
                        if body_child.kind() != "block" {
                            continue;
                        }
                        let mut method_cursor = body_child.walk();
                        for method in body_child.children(&mut method_cursor) {
                            if method.kind() == "function_definition" {
                                self.push_chunk(
                                    content,
                                    method,
                                    "method_declaration",
                                    class_name.clone(),
                                    imports,
                                    symbols,
                                    chunks,
                                    seen,
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn extract_js_chunks(
        &self,
        content: &str,
        node: Node,
        imports: &[FileImport],
        symbols: &[SymbolRef],
        chunks: &mut Vec<Chunk>,
        seen: &mut HashSet<(usize, usize)>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            // export declarations wrap the real declaration node
            let inner = if child.kind() == "export_statement" {
                child.child(1).unwrap_or(child)
            } else {
                child
            };

            match inner.kind() {
                "function_declaration" => {
                    self.push_chunk(
                        content,
                        child,
                        "function_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                }
                "interface_declaration" => {
                    self.push_chunk(
                        content,
                        child,
                        "interface_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                }
                "enum_declaration" => {
                    self.push_chunk(
                        content,
                        child,
                        "enum_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                }
                "class_declaration" => {
                    let class_name = Self::extract_symbol_name(content, inner).unwrap_or_default();
                    self.push_chunk(
                        content,
                        child,
                        "class_declaration",
                        String::new(),
                        imports,
                        symbols,
                        chunks,
                        seen,
                    );
                    let mut class_cursor = inner.walk();
                    for class_child in inner.children(&mut class_cursor) {
                        if class_child.kind() != "class_body" {
                            continue;
                        }
                        let mut member_cursor = class_child.walk();
                        for member in class_child.children(&mut member_cursor) {
                            let member_kind = match member.kind() {
                                "method_definition" => Some("method_declaration"),
                                "field_definition" | "public_field_definition" => {
                                    Some("variable_declaration")
                                }
                                _ => None,
                            };
                            if let Some(member_kind) = member_kind {
                                self.push_chunk(
                                    content,
                                    member,
                                    member_kind,
                                    class_name.clone(),
                                    imports,
                                    symbols,
                                    chunks,
                                    seen,
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn push_chunk(
        &self,
        content: &str,
        node: Node,
        kind: &str,
        container_path: String,
        imports: &[FileImport],
        symbols: &[SymbolRef],
        chunks: &mut Vec<Chunk>,
        seen: &mut HashSet<(usize, usize)>,
    ) {
        let key = (node.start_byte(), node.end_byte());
        if !seen.insert(key) {
            return;
        }

        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;
        let chunk_content = content[node.start_byte()..node.end_byte()].to_string();

        let chunk_imports: Vec<ImportRef> = imports
            .iter()
            .filter(|fi| fi.start_line == start_line)
            .map(|fi| fi.import.clone())
            .collect();

        let chunk_symbols: Vec<SymbolRef> = symbols
            .iter()
            .filter(|s| s.line >= start_line && s.line <= end_line)
            .cloned()
            .collect();

        let exports = self.exports_for(content, node, kind);

        chunks.push(Chunk {
            content: chunk_content,
            language: self.language.as_str().to_string(),
            kind: kind.to_string(),
            container_path,
            imports: chunk_imports,
            exports,
            symbols: chunk_symbols,
            start_line,
            end_line,
        });
    }

    /// Only JavaScript/TypeScript tracks exports at the declaration level.
    /// If the file declares an explicit top-level public-symbol list
    /// (`export { a, b }`), exports are restricted to that list elsewhere
    /// by the caller; here we just record this declaration's own export
    /// status.
    fn exports_for(&self, content: &str, node: Node, kind: &str) -> Vec<ExportRef> {
        if !matches!(self.language, Language::JavaScript | Language::TypeScript) {
            return vec![];
        }
        if node.kind() != "export_statement" {
            return vec![];
        }
        let is_default = node
            .children(&mut node.walk())
            .any(|c| c.kind() == "default");
        let name = node
            .child(1)
            .and_then(|inner| Self::extract_symbol_name(content, inner));

        match name {
            Some(name) => vec![ExportRef {
                name,
                kind: if is_default {
                    ExportKind::Default
                } else {
                    ExportKind::Named
                },
                target: Some(kind.to_string()),
            }],
            None => vec![],
        }
    }

    fn extract_impl_target(content: &str, impl_node: Node) -> Option<String> {
        let mut cursor = impl_node.walk();
        for child in impl_node.children(&mut cursor) {
            match child.kind() {
                "type_identifier" => {
                    return Some(content[child.start_byte()..child.end_byte()].to_string());
                }
                "generic_type" | "scoped_type_identifier" => {
                    let mut inner_cursor = child.walk();
                    for inner in child.children(&mut inner_cursor) {
                        if inner.kind() == "type_identifier" {
                            return Some(content[inner.start_byte()..inner.end_byte()].to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn extract_symbol_name(content: &str, node: Node) -> Option<String> {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(
                child.kind(),
                "identifier" | "name" | "type_identifier" | "field_identifier" | "property_identifier"
            ) {
                return Some(content[child.start_byte()..child.end_byte()].to_string());
            }
        }
        None
    }

    /// Walk top-level statements, recording raw import text paired with its
    /// starting line.
    fn extract_imports(&self, content: &str, root: Node) -> Vec<FileImport> {
        let mut out = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            let is_import = match self.language {
                Language::Rust => child.kind() == "use_declaration",
                Language::Python => {
                    matches!(child.kind(), "import_statement" | "import_from_statement")
                }
                Language::JavaScript | Language::TypeScript => {
                    matches!(child.kind(), "import_statement")
                }
                _ => false,
            };
            if !is_import {
                continue;
            }

            let start_line = child.start_position().row + 1;
            let raw = content[child.start_byte()..child.end_byte()]
                .trim()
                .trim_end_matches(';')
                .to_string();
            if raw.is_empty() {
                continue;
            }

            out.push(FileImport {
                start_line,
                import: ImportRef {
                    path: raw,
                    kind: ImportKind::Module,
                    symbols: vec![],
                },
            });

            if out.len() >= 200 {
                break;
            }
        }
        out
    }

    /// Flat list of every named declaration in the file, used to populate
    /// each chunk's `symbols`.
    fn extract_symbols(&self, content: &str, root: Node) -> Vec<SymbolRef> {
        let mut out = Vec::new();
        Self::walk_symbols(self.language, content, root, &mut out);
        out
    }

    fn walk_symbols(language: Language, content: &str, node: Node, out: &mut Vec<SymbolRef>) {
        let decl_kind = match (language, node.kind()) {
            (Language::Rust, "function_item") => Some("function"),
            (Language::Rust, "struct_item") => Some("struct"),
            (Language::Rust, "enum_item") => Some("enum"),
            (Language::Rust, "trait_item") => Some("trait"),
            (Language::Rust, "const_item") => Some("const"),
            (Language::Rust, "static_item") => Some("static"),
            (Language::Python, "function_definition") => Some("function"),
            (Language::Python, "class_definition") => Some("class"),
            (Language::JavaScript | Language::TypeScript, "function_declaration") => Some("function"),
            (Language::JavaScript | Language::TypeScript, "class_declaration") => Some("class"),
            (Language::JavaScript | Language::TypeScript, "method_definition") => Some("method"),
            (Language::JavaScript | Language::TypeScript, "interface_declaration") => Some("interface"),
            (Language::JavaScript | Language::TypeScript, "enum_declaration") => Some("enum"),
            _ => None,
        };

        if let Some(kind) = decl_kind {
            if let Some(name) = Self::extract_symbol_name(content, node) {
                out.push(SymbolRef {
                    name,
                    kind: kind.to_string(),
                    line: node.start_position().row + 1,
                });
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            Self::walk_symbols(language, content, child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_chunking_finds_function_and_struct() {
        let config = ChunkerConfig::default();
        let mut analyzer = AstAnalyzer::new(config, Language::Rust).unwrap();
        let code = "fn main() {\n    println!(\"hi\");\n}\n\nstruct Point {\n    x: i32,\n}\n";
        let chunks = analyzer.chunk(code).unwrap();
        assert!(chunks.iter().any(|c| c.kind == "function_declaration"));
        assert!(chunks.iter().any(|c| c.kind == "struct_declaration"));
    }

    #[test]
    fn rust_impl_methods_carry_container_path() {
        let config = ChunkerConfig::default();
        let mut analyzer = AstAnalyzer::new(config, Language::Rust).unwrap();
        let code = "struct Widget;\n\nimpl Widget {\n    fn render(&self) {}\n}\n";
        let chunks = analyzer.chunk(code).unwrap();
        let method = chunks
            .iter()
            .find(|c| c.kind == "method_declaration")
            .expect("method chunk present");
        assert_eq!(method.container_path, "Widget");
    }

    #[test]
    fn python_class_methods_are_separated_with_parent() {
        let config = ChunkerConfig::default();
        let mut analyzer = AstAnalyzer::new(config, Language::Python).unwrap();
        let code = "class Greeter:\n    def hello(self):\n        pass\n";
        let chunks = analyzer.chunk(code).unwrap();
        assert!(chunks.iter().any(|c| c.kind == "class_declaration"));
        let method = chunks
            .iter()
            .find(|c| c.kind == "method_declaration")
            .expect("method present");
        assert_eq!(method.container_path, "Greeter");
    }

    #[test]
    fn unsupported_language_is_rejected_at_construction() {
        let config = ChunkerConfig::default();
        assert!(AstAnalyzer::new(config, Language::Go).is_err());
    }

    #[test]
    fn chunk_boundaries_are_deduplicated() {
        let config = ChunkerConfig::default();
        let mut analyzer = AstAnalyzer::new(config, Language::Rust).unwrap();
        let code = "fn solo() {}\n";
        let chunks = analyzer.chunk(code).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn empty_file_falls_back_to_whole_file_chunk() {
        let config = ChunkerConfig::default();
        let mut analyzer = AstAnalyzer::new(config, Language::Rust).unwrap();
        let chunks = analyzer.chunk("// just a comment\n").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, "whole_file");
    }
}
