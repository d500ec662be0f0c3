use crate::error::{ChunkerError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Supported language tag. AST-capable languages carry a tree-sitter
/// grammar; the rest dispatch to one of the non-AST strategies via
/// [`LanguageCapabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Swift,
    Kotlin,
    Sql,
    Dbt,
    Shell,
    Markdown,
    PlainText,
    Unknown,
}

/// The capability set a language dispatches through. Mirrors `{
/// can_syntax_tree, can_paragraph, can_line_window, can_whole_file, can_sql
/// }` rather than modeling languages as a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LanguageCapabilities {
    pub can_syntax_tree: bool,
    pub can_paragraph: bool,
    pub can_line_window: bool,
    pub can_whole_file: bool,
    pub can_sql: bool,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Sql => "sql",
            Language::Dbt => "dbt",
            Language::Shell => "shell",
            Language::Markdown => "markdown",
            Language::PlainText => "plaintext",
            Language::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "rust" => Language::Rust,
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "csharp" => Language::CSharp,
            "ruby" => Language::Ruby,
            "swift" => Language::Swift,
            "kotlin" => Language::Kotlin,
            "sql" => Language::Sql,
            "dbt" => Language::Dbt,
            "shell" => Language::Shell,
            "markdown" => Language::Markdown,
            "plaintext" => Language::PlainText,
            _ => Language::Unknown,
        }
    }

    pub fn supports_ast(self) -> bool {
        matches!(
            self,
            Language::Rust | Language::Python | Language::JavaScript | Language::TypeScript
        )
    }

    pub fn tree_sitter_language(self) -> Result<tree_sitter::Language> {
        match self {
            Language::Rust => Ok(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Ok(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Ok(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Shell => Ok(tree_sitter_bash::LANGUAGE.into()),
            _ => Err(ChunkerError::unsupported_language(self.as_str())),
        }
    }

    /// The capability set this language dispatches through. AST-capable
    /// languages only get the syntax-tree strategy; SQL/dbt gets its own
    /// structured parser; everything else falls back to paragraph,
    /// line-window or whole-file depending on how structured it typically
    /// is.
    pub fn capabilities(self) -> LanguageCapabilities {
        match self {
            Language::Rust | Language::Python | Language::JavaScript | Language::TypeScript => {
                LanguageCapabilities {
                    can_syntax_tree: true,
                    can_whole_file: true,
                    ..Default::default()
                }
            }
            Language::Sql | Language::Dbt => LanguageCapabilities {
                can_sql: true,
                can_whole_file: true,
                ..Default::default()
            },
            Language::Markdown => LanguageCapabilities {
                can_paragraph: true,
                can_whole_file: true,
                ..Default::default()
            },
            Language::Shell => LanguageCapabilities {
                can_line_window: true,
                can_whole_file: true,
                ..Default::default()
            },
            Language::PlainText => LanguageCapabilities {
                can_paragraph: true,
                can_line_window: true,
                can_whole_file: true,
                ..Default::default()
            },
            Language::Unknown => LanguageCapabilities::default(),
            _ => LanguageCapabilities {
                can_line_window: true,
                can_whole_file: true,
                ..Default::default()
            },
        }
    }

}

/// Extension → language dispatch table. Extensions may only be shared
/// between languages that belong to a pre-declared equivalence set (e.g.
/// `.h` for {c, cpp}); any other attempt to register an already-claimed
/// extension is a warning, and the first registration wins.
#[derive(Clone)]
pub struct LanguageRegistry {
    by_extension: HashMap<String, Language>,
    equivalence_sets: Vec<Vec<Language>>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
            equivalence_sets: vec![vec![Language::C, Language::Cpp]],
        };
        for (ext, lang) in Self::defaults() {
            registry.register(ext, lang);
        }
        registry
    }
}

impl LanguageRegistry {
    fn defaults() -> Vec<(&'static str, Language)> {
        vec![
            ("rs", Language::Rust),
            ("py", Language::Python),
            ("pyw", Language::Python),
            ("pyi", Language::Python),
            ("js", Language::JavaScript),
            ("mjs", Language::JavaScript),
            ("cjs", Language::JavaScript),
            ("jsx", Language::JavaScript),
            ("ts", Language::TypeScript),
            ("tsx", Language::TypeScript),
            ("mts", Language::TypeScript),
            ("cts", Language::TypeScript),
            ("go", Language::Go),
            ("java", Language::Java),
            ("c", Language::C),
            ("h", Language::C),
            ("cpp", Language::Cpp),
            ("cc", Language::Cpp),
            ("cxx", Language::Cpp),
            ("hpp", Language::Cpp),
            ("hh", Language::Cpp),
            ("hxx", Language::Cpp),
            ("cs", Language::CSharp),
            ("rb", Language::Ruby),
            ("swift", Language::Swift),
            ("kt", Language::Kotlin),
            ("kts", Language::Kotlin),
            ("sql", Language::Sql),
            ("dbt", Language::Dbt),
            ("sh", Language::Shell),
            ("bash", Language::Shell),
            ("zsh", Language::Shell),
            ("md", Language::Markdown),
            ("markdown", Language::Markdown),
            ("txt", Language::PlainText),
        ]
    }

    /// Register `ext` for `lang`. If already claimed by a language outside
    /// `lang`'s equivalence set, logs a warning and keeps the existing
    /// registration.
    pub fn register(&mut self, ext: &str, lang: Language) {
        let ext = ext.to_lowercase();
        match self.by_extension.get(&ext) {
            None => {
                self.by_extension.insert(ext, lang);
            }
            Some(existing) if *existing == lang => {}
            Some(existing) if self.are_equivalent(*existing, lang) => {}
            Some(existing) => {
                log::warn!(
                    "extension '.{ext}' already registered to {}; ignoring duplicate registration for {}",
                    existing.as_str(),
                    lang.as_str()
                );
            }
        }
    }

    fn are_equivalent(&self, a: Language, b: Language) -> bool {
        self.equivalence_sets
            .iter()
            .any(|set| set.contains(&a) && set.contains(&b))
    }

    pub fn language_for_extension(&self, ext: &str) -> Language {
        self.by_extension
            .get(&ext.to_lowercase())
            .copied()
            .unwrap_or(Language::Unknown)
    }

    pub fn language_for_path(&self, path: impl AsRef<Path>) -> Language {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.language_for_extension(ext))
            .unwrap_or(Language::Unknown)
    }

    /// Narrow this registry to only the given languages; extensions whose
    /// language isn't in `allowed` dispatch to [`Language::Unknown`]
    /// instead. Backs `SEMANTIC_CODE_INDEXER_LANGUAGES`.
    pub fn restrict_to(mut self, allowed: &[Language]) -> Self {
        self.by_extension.retain(|_, lang| allowed.contains(lang));
        self
    }
}
