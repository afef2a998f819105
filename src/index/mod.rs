//! Workspace symbol index.
//!
//! Walks the workspace, records every Python file, and lists the top-level
//! `class` / `def` declarations each one contains. The rendered listing is what
//! the context filter sees, so it is capped and truncated at whole-file
//! boundaries.

pub mod parser;

use crate::cancel::CancelToken;
use crate::error::{SpliceError, SpliceResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Default cap, in characters, for the serialized index and assembled context
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 250_000;

/// Source files the index understands
pub const SOURCE_EXTENSION: &str = "py";

const INDEX_PREAMBLE: &str = "Project structure:\n";

/// Directory names skipped during the walk unless configured otherwise
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".splice",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "build",
    "dist",
    "out",
    ".idea",
    ".vscode",
    "node_modules",
    "target",
    ".pytest_cache",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    #[serde(alias = "class", alias = "CLASS")]
    Class,
    #[serde(alias = "function", alias = "FUNCTION", alias = "def", alias = "method", alias = "Method")]
    Function,
}

impl SymbolKind {
    /// Declaration keyword in source text
    pub fn keyword(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Function => "def",
        }
    }

    /// Label used in the rendered index and context blocks
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Class => "Class",
            SymbolKind::Function => "Function",
        }
    }

    /// Signature a declaration of this kind and name is expected to have
    pub fn signature_for(&self, name: &str) -> String {
        format!("{} {}", self.keyword(), name.trim())
    }
}

/// A recognized top-level declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub file: PathBuf,
    pub kind: SymbolKind,
    pub name: String,
    pub signature: String,
}

/// One indexed file and its declarations in source order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSymbols {
    pub path: PathBuf,
    pub symbols: Vec<Symbol>,
}

impl FileSymbols {
    fn render(&self) -> String {
        let mut block = format!("File: {}\n", self.path.display());
        for symbol in &self.symbols {
            block.push_str(&format!("    {}: {}\n", symbol.kind.label(), symbol.name));
        }
        block
    }
}

/// A file that could not be indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSkip {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: usize,
    pub symbol_count: usize,
    pub char_count: usize,
    pub truncated: bool,
    pub skipped_files: usize,
}

/// Knobs for a single index build
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub excluded_dirs: Vec<String>,
    pub max_length: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            max_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }
}

/// The complete symbol index for a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolIndex {
    pub root: PathBuf,
    pub files: Vec<FileSymbols>,
    pub skipped: Vec<IndexSkip>,
    pub truncated: bool,
    rendered: String,
    rendered_chars: usize,
}

impl SymbolIndex {
    /// Build an index, never cancelled
    pub fn build(root: &Path, options: &IndexOptions) -> Self {
        // A fresh token is never cancelled, so this cannot fail.
        Self::build_with_cancel(root, options, &CancelToken::new()).unwrap_or_else(|_| Self::empty(root))
    }

    /// Build an index, checking `cancel` between files
    pub fn build_with_cancel(
        root: &Path,
        options: &IndexOptions,
        cancel: &CancelToken,
    ) -> SpliceResult<Self> {
        let mut index = Self::empty(root);

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded(e, &options.excluded_dirs));

        for entry in walker {
            cancel.check()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_source_file(entry.path()) {
                continue;
            }

            let path = entry.path();
            let file = match index_file(path) {
                Ok(file) => file,
                Err(err) => {
                    log::debug!("{}", err);
                    index.skipped.push(IndexSkip {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let block = file.render();
            let block_chars = block.chars().count();
            if index.rendered_chars + block_chars > options.max_length {
                log::debug!(
                    "Index cap of {} characters reached at {}; stopping",
                    options.max_length,
                    path.display()
                );
                index.truncated = true;
                break;
            }
            index.rendered.push_str(&block);
            index.rendered_chars += block_chars;
            index.files.push(file);
        }

        log::debug!(
            "Indexed {} files ({} declarations) under {}",
            index.files.len(),
            index.symbol_count(),
            root.display()
        );
        Ok(index)
    }

    fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: Vec::new(),
            skipped: Vec::new(),
            truncated: false,
            rendered: INDEX_PREAMBLE.to_string(),
            rendered_chars: INDEX_PREAMBLE.chars().count(),
        }
    }

    /// Serialized listing sent to the context filter
    pub fn render(&self) -> &str {
        &self.rendered
    }

    pub fn symbol_count(&self) -> usize {
        self.files.iter().map(|f| f.symbols.len()).sum()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.files.iter().flat_map(|f| f.symbols.iter())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            file_count: self.files.len(),
            symbol_count: self.symbol_count(),
            char_count: self.rendered_chars,
            truncated: self.truncated,
            skipped_files: self.skipped.len(),
        }
    }
}

fn is_excluded(entry: &DirEntry, excluded: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    excluded.iter().any(|ex| ex.as_str() == name)
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext == SOURCE_EXTENSION)
}

fn index_file(path: &Path) -> SpliceResult<FileSymbols> {
    let content = std::fs::read_to_string(path).map_err(|source| SpliceError::IndexBuild {
        path: path.to_path_buf(),
        source,
    })?;

    let symbols = parser::declarations(&content)
        .into_iter()
        .map(|decl| Symbol {
            file: path.to_path_buf(),
            kind: decl.kind,
            name: decl.name,
            signature: decl.signature,
        })
        .collect();

    Ok(FileSymbols {
        path: path.to_path_buf(),
        symbols,
    })
}
