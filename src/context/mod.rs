//! Context assembly: turn the filter's symbol references back into source text.

use crate::index::parser::{self, Declaration};
use crate::index::SymbolKind;
use crate::llm::RelevantSymbolRef;
use crate::util::collapse_whitespace;
use crate::workspace::Workspace;
use serde::Serialize;
use std::path::PathBuf;

const BLOCK_SEPARATOR: &str = "-----\n";

/// Source text of one resolved symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextBlock {
    pub file: PathBuf,
    pub kind: SymbolKind,
    pub name: String,
    pub source: String,
}

impl ContextBlock {
    fn render(&self) -> String {
        format!(
            "File: {}\n{}: {}\nContent:\n{}\n{}",
            self.file.display(),
            self.kind.label(),
            self.name,
            self.source,
            BLOCK_SEPARATOR
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub blocks: Vec<ContextBlock>,
    /// Refs that could not be resolved to a declaration
    pub unresolved: usize,
    /// A block was dropped because it would have crossed the cap
    pub truncated: bool,
    rendered: String,
    rendered_chars: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn render(&self) -> &str {
        &self.rendered
    }

    pub fn char_count(&self) -> usize {
        self.rendered_chars
    }
}

/// Resolve each ref in order and concatenate the results under `max_length` characters.
pub fn assemble<W: Workspace + ?Sized>(
    refs: &[RelevantSymbolRef],
    workspace: &W,
    max_length: usize,
) -> AssembledContext {
    let mut context = AssembledContext::default();

    for symbol in refs {
        let Some(block) = resolve(symbol, workspace) else {
            context.unresolved += 1;
            continue;
        };

        let rendered = block.render();
        let chars = rendered.chars().count();
        if context.rendered_chars + chars > max_length {
            log::debug!(
                "Context cap of {} characters reached at {}; dropping remaining refs",
                max_length,
                symbol.name
            );
            context.truncated = true;
            break;
        }
        context.rendered.push_str(&rendered);
        context.rendered_chars += chars;
        context.blocks.push(block);
    }

    context
}

fn resolve<W: Workspace + ?Sized>(symbol: &RelevantSymbolRef, workspace: &W) -> Option<ContextBlock> {
    let path = workspace.resolve(&symbol.file);
    let content = match workspace.read_file(&path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            log::debug!("Selected file {} does not exist", path.display());
            return None;
        }
        Err(err) => {
            log::debug!("Cannot read {}: {}", path.display(), err);
            return None;
        }
    };

    let expected = collapse_whitespace(&symbol.kind.signature_for(&symbol.name));
    let Some(decl) = locate(&content, &expected, &symbol.parent_signature) else {
        log::debug!("No `{}` in {}", expected, path.display());
        return None;
    };

    Some(ContextBlock {
        file: path,
        kind: symbol.kind,
        name: symbol.name.clone(),
        source: content[decl.span].to_string(),
    })
}

/// Top-level declaration first, then a member of the named parent.
fn locate(content: &str, expected: &str, parent_signature: &str) -> Option<Declaration> {
    let top_level = parser::declarations(content);
    if let Some(found) = top_level.iter().find(|d| d.signature == expected) {
        return Some(found.clone());
    }

    if parent_signature.trim().is_empty() {
        return None;
    }
    let parent_sig = parser::normalize_signature(parent_signature);
    let parent = top_level.iter().find(|d| d.signature == parent_sig)?;
    parser::body_of(content, parent)
        .members
        .into_iter()
        .find(|d| d.signature == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::FsWorkspace;
    use std::fs;
    use tempfile::tempdir;

    fn symbol(file: &str, kind: SymbolKind, name: &str, parent: &str) -> RelevantSymbolRef {
        RelevantSymbolRef {
            file: file.to_string(),
            kind,
            name: name.to_string(),
            description: String::new(),
            parent_signature: parent.to_string(),
        }
    }

    fn workspace() -> (tempfile::TempDir, FsWorkspace) {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.py"),
            "import os\n\n\nclass Repo(Base):\n    def load(self, key):\n        return key\n\n    def save(self):\n        pass\n\n\ndef helper():\n    return 1\n",
        )
        .unwrap();
        let ws = FsWorkspace::new(dir.path());
        (dir, ws)
    }

    #[test]
    fn test_assembles_top_level_blocks_in_order() {
        let (dir, ws) = workspace();
        let refs = vec![
            symbol("a.py", SymbolKind::Function, "helper", ""),
            symbol("a.py", SymbolKind::Class, "Repo", ""),
        ];
        let context = assemble(&refs, &ws, 10_000);

        assert_eq!(context.blocks.len(), 2);
        assert_eq!(context.blocks[0].source, "def helper():\n    return 1");
        assert!(context.blocks[1].source.starts_with("class Repo(Base):"));
        let expected_head = format!(
            "File: {}\nFunction: helper\nContent:\ndef helper():\n    return 1\n-----\n",
            dir.path().join("a.py").display()
        );
        assert!(context.render().starts_with(&expected_head));
    }

    #[test]
    fn test_member_resolved_through_parent() {
        let (_dir, ws) = workspace();
        let refs = vec![symbol("a.py", SymbolKind::Function, "save", "class Repo")];
        let context = assemble(&refs, &ws, 10_000);
        assert_eq!(context.blocks.len(), 1);
        assert_eq!(context.blocks[0].source, "    def save(self):\n        pass");
    }

    #[test]
    fn test_member_found_after_leading_comment() {
        let (dir, ws) = workspace();
        fs::write(
            dir.path().join("b.py"),
            "class Store:\n# moved to utils\n        # keep sorted\n    def put(self, item):\n        self.items.append(item)\n",
        )
        .unwrap();
        let refs = vec![symbol("b.py", SymbolKind::Function, "put", "class Store")];
        let context = assemble(&refs, &ws, 10_000);
        assert_eq!(context.unresolved, 0);
        assert_eq!(
            context.blocks[0].source,
            "    def put(self, item):\n        self.items.append(item)"
        );
    }

    #[test]
    fn test_unresolvable_refs_are_skipped() {
        let (_dir, ws) = workspace();
        let refs = vec![
            symbol("a.py", SymbolKind::Function, "missing", ""),
            symbol("nope.py", SymbolKind::Function, "helper", ""),
            symbol("a.py", SymbolKind::Function, "save", ""),
            symbol("a.py", SymbolKind::Function, "helper", ""),
        ];
        let context = assemble(&refs, &ws, 10_000);
        assert_eq!(context.unresolved, 3);
        assert_eq!(context.blocks.len(), 1);
    }

    #[test]
    fn test_signature_comparison_is_case_sensitive() {
        let (_dir, ws) = workspace();
        let refs = vec![symbol("a.py", SymbolKind::Function, "Helper", "")];
        assert!(assemble(&refs, &ws, 10_000).is_empty());
    }

    #[test]
    fn test_cap_is_never_exceeded() {
        let (_dir, ws) = workspace();
        let refs = vec![
            symbol("a.py", SymbolKind::Function, "helper", ""),
            symbol("a.py", SymbolKind::Class, "Repo", ""),
        ];
        let first_only = assemble(&refs[..1], &ws, 10_000).char_count();
        let context = assemble(&refs, &ws, first_only + 5);
        assert!(context.truncated);
        assert_eq!(context.blocks.len(), 1);
        assert!(context.char_count() <= first_only + 5);
    }
}
