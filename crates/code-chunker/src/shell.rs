use crate::language::Language;
use crate::types::{ExportKind, ExportRef};
use tree_sitter::{Node, Parser};

/// Walk a `tree-sitter-bash` parse tree and emit an [`ExportRef`] for every
/// name a `declaration_command` node introduces whose leading keyword token
/// is literally `export` (`readonly`/`local`/`declare` are left alone,
/// matching the "first child token must be the export keyword" rule).
/// `export -f name` is recorded as a function export, `export NAME[=value]`
/// as a variable export.
pub fn extract_shell_exports(content: &str) -> Vec<ExportRef> {
    let mut parser = Parser::new();
    parser
        .set_language(&Language::Shell.tree_sitter_language().expect("bash grammar is registered"))
        .expect("bash grammar is valid");

    let Some(tree) = parser.parse(content, None) else {
        return Vec::new();
    };

    let mut exports = Vec::new();
    collect_exports(tree.root_node(), content, &mut exports);
    exports
}

fn collect_exports(node: Node, content: &str, exports: &mut Vec<ExportRef>) {
    if node.kind() == "declaration_command" {
        collect_from_declaration(node, content, exports);
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_exports(child, content, exports);
    }
}

fn collect_from_declaration(node: Node, content: &str, exports: &mut Vec<ExportRef>) {
    let mut cursor = node.walk();
    let mut children = node.children(&mut cursor);

    let Some(keyword) = children.next() else {
        return;
    };
    if text(keyword, content) != "export" {
        return;
    }

    let mut is_function = false;
    for child in children {
        match child.kind() {
            "word" => {
                let word = text(child, content);
                if word == "-f" {
                    is_function = true;
                    continue;
                }
                exports.push(export_ref(word.to_string(), is_function));
            }
            "variable_assignment" => {
                if let Some(name) = child.child_by_field_name("name") {
                    exports.push(export_ref(text(name, content).to_string(), is_function));
                }
            }
            _ => {}
        }
    }
}

fn export_ref(name: String, is_function: bool) -> ExportRef {
    ExportRef {
        name,
        kind: ExportKind::Named,
        target: Some(if is_function { "function" } else { "variable" }.to_string()),
    }
}

fn text<'a>(node: Node, content: &'a str) -> &'a str {
    &content[node.start_byte()..node.end_byte()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_export_is_captured() {
        let exports = extract_shell_exports("export FOO=bar\n");
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "FOO");
        assert_eq!(exports[0].target.as_deref(), Some("variable"));
    }

    #[test]
    fn export_function_flag_is_tagged() {
        let exports = extract_shell_exports("export -f deploy\n");
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].target.as_deref(), Some("function"));
    }

    #[test]
    fn readonly_and_local_are_not_exports() {
        let exports = extract_shell_exports("readonly BAR=1\nlocal baz=2\ndeclare -i count=0\n");
        assert!(exports.is_empty());
    }

    #[test]
    fn indented_export_inside_function_is_still_matched() {
        let exports = extract_shell_exports("deploy() {\n    export VERSION=1\n}\n");
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "VERSION");
    }

    #[test]
    fn export_without_assignment_is_a_bare_name() {
        let exports = extract_shell_exports("export PATH\n");
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name, "PATH");
    }

    #[test]
    fn multiple_names_on_one_export_line_are_all_captured() {
        let exports = extract_shell_exports("export FOO=1 BAR=2\n");
        assert_eq!(exports.len(), 2);
        assert!(exports.iter().any(|e| e.name == "FOO"));
        assert!(exports.iter().any(|e| e.name == "BAR"));
    }
}
