//! Patch application.
//!
//! Each [`FileEdit`] resolves to one target file and is committed before the
//! next one is looked at. Three update modes:
//!
//! - `update_file`: the edit's code becomes the file
//! - `update_element`: the code's first declaration replaces the declaration
//!   with the same signature, at top level or inside `parent_signature`
//! - `create_element`: the code is appended under its parent, or at end of file

use crate::error::{SpliceError, SpliceResult};
use crate::index::parser::{self, Body, Declaration, Suite};
use crate::llm::{FileEdit, UpdateMode};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// What `update_element` does when nothing matches and no parent is named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ElementFallback {
    /// Fail the edit with a resolution miss
    #[default]
    Reject,
    /// Append the declaration to the end of the file
    Append,
    /// Replace the whole file with the edit's code
    ReplaceFile,
}

/// Which branch of the apply rules produced the new content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyOutcome {
    FileReplaced,
    FileCreated,
    ElementReplaced { signature: String },
    MemberReplaced { parent: String, signature: String },
    MemberAppended { parent: String },
    AppendedToFile,
    FileReplacedByFallback,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::FileReplaced => write!(f, "replaced file"),
            ApplyOutcome::FileCreated => write!(f, "created file"),
            ApplyOutcome::ElementReplaced { signature } => write!(f, "replaced `{}`", signature),
            ApplyOutcome::MemberReplaced { parent, signature } => {
                write!(f, "replaced `{}` in `{}`", signature, parent)
            }
            ApplyOutcome::MemberAppended { parent } => write!(f, "added member to `{}`", parent),
            ApplyOutcome::AppendedToFile => write!(f, "appended to end of file"),
            ApplyOutcome::FileReplacedByFallback => write!(f, "replaced file (fallback)"),
        }
    }
}

/// A committed edit
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEdit {
    pub path: PathBuf,
    pub content: String,
    pub outcome: ApplyOutcome,
    pub user_message: String,
}

pub struct PatchApplier<'a, W: ?Sized> {
    workspace: &'a W,
    fallback: ElementFallback,
}

impl<'a, W: Workspace + ?Sized> PatchApplier<'a, W> {
    pub fn new(workspace: &'a W, fallback: ElementFallback) -> Self {
        Self { workspace, fallback }
    }

    pub fn apply(&self, edit: &FileEdit) -> SpliceResult<AppliedEdit> {
        let raw = edit.target();
        if raw.is_empty() {
            return Err(SpliceError::write(PathBuf::new(), "edit names no target file"));
        }
        let resolved = self.workspace.resolve(raw);

        let (path, content, outcome) = match self.workspace.find_file(&resolved) {
            Some(path) => {
                let current = self
                    .workspace
                    .read_file(&path)
                    .map_err(|e| SpliceError::write(&path, e))?
                    .unwrap_or_default();
                let (content, outcome) = match edit.mode() {
                    UpdateMode::UpdateFile => (edit.code.clone(), ApplyOutcome::FileReplaced),
                    UpdateMode::UpdateElement => update_element(&path, &current, edit, self.fallback)?,
                    UpdateMode::CreateElement => create_element(&current, edit),
                };
                self.workspace
                    .write_file(&path, &content)
                    .map_err(|e| SpliceError::write(&path, e))?;
                (path, content, outcome)
            }
            None => {
                let relative = resolved
                    .strip_prefix(self.workspace.root())
                    .map_err(|_| SpliceError::write(&resolved, "target is outside the workspace"))?;
                let path = self
                    .workspace
                    .create_file(relative, &edit.code)
                    .map_err(|e| SpliceError::write(&resolved, e))?;
                (path, edit.code.clone(), ApplyOutcome::FileCreated)
            }
        };

        log::info!("{}: {}", path.display(), outcome);
        Ok(AppliedEdit {
            path,
            content,
            outcome,
            user_message: edit.user_message.clone(),
        })
    }
}

/// Replace the declaration `edit.code` defines, following the fallback rules.
pub fn update_element(
    path: &Path,
    current: &str,
    edit: &FileEdit,
    fallback: ElementFallback,
) -> SpliceResult<(String, ApplyOutcome)> {
    let eol = line_ending(current);
    let signature = parser::first_declaration(&edit.code)
        .map(|d| d.signature)
        .unwrap_or_default();
    let top_level = parser::declarations(current);

    if !signature.is_empty() {
        if let Some(existing) = top_level.iter().find(|d| d.signature == signature) {
            let replacement = fragment(&edit.code, "", eol);
            return Ok((
                replace_span(current, existing, &replacement),
                ApplyOutcome::ElementReplaced { signature },
            ));
        }
    }

    if let Some(parent_raw) = edit.parent() {
        let parent_sig = parser::normalize_signature(parent_raw);
        let Some(parent) = top_level.iter().find(|d| d.signature == parent_sig) else {
            log::debug!("Parent `{}` not found in {}; appending", parent_sig, path.display());
            return Ok((append_to_file(current, &edit.code), ApplyOutcome::AppendedToFile));
        };

        let body = parser::body_of(current, parent);
        if !signature.is_empty() {
            if let Some(member) = body.members.iter().find(|d| d.signature == signature) {
                let replacement = fragment(&edit.code, &body.indent, eol);
                return Ok((
                    replace_span(current, member, &replacement),
                    ApplyOutcome::MemberReplaced {
                        parent: parent_sig,
                        signature,
                    },
                ));
            }
        }
        return Ok(add_member(current, parent, &body, &edit.code, parent_sig));
    }

    match fallback {
        ElementFallback::Reject => Err(SpliceError::ResolutionMiss {
            path: path.to_path_buf(),
            signature,
        }),
        ElementFallback::Append => Ok((append_to_file(current, &edit.code), ApplyOutcome::AppendedToFile)),
        ElementFallback::ReplaceFile => Ok((edit.code.clone(), ApplyOutcome::FileReplacedByFallback)),
    }
}

/// Insert `edit.code` as a new declaration.
pub fn create_element(current: &str, edit: &FileEdit) -> (String, ApplyOutcome) {
    if let Some(parent_raw) = edit.parent() {
        let parent_sig = parser::normalize_signature(parent_raw);
        if let Some(parent) = parser::declarations(current)
            .into_iter()
            .find(|d| d.signature == parent_sig)
        {
            let body = parser::body_of(current, &parent);
            return add_member(current, &parent, &body, &edit.code, parent_sig);
        }
        log::debug!("Parent `{}` not found; appending to end of file", parent_sig);
    }
    (append_to_file(current, &edit.code), ApplyOutcome::AppendedToFile)
}

fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Re-indent a code fragment and convert it to the file's line endings.
fn fragment(code: &str, indent: &str, eol: &str) -> String {
    let text = parser::reindent(code, indent);
    if eol == "\n" {
        text
    } else {
        text.replace('\n', eol)
    }
}

fn replace_span(current: &str, decl: &Declaration, replacement: &str) -> String {
    format!(
        "{}{}{}",
        &current[..decl.span.start],
        replacement,
        &current[decl.span.end..]
    )
}

/// Add `code` as the last member of `parent`, whatever shape its body has.
fn add_member(
    current: &str,
    parent: &Declaration,
    body: &Body,
    code: &str,
    parent_sig: String,
) -> (String, ApplyOutcome) {
    match &body.suite {
        Suite::Block => (
            append_member(current, parent, &body.indent, code),
            ApplyOutcome::MemberAppended { parent: parent_sig },
        ),
        Suite::Inline(inline) => (
            expand_inline(current, parent, inline.clone(), &body.indent, code),
            ApplyOutcome::MemberAppended { parent: parent_sig },
        ),
        Suite::Missing => {
            log::debug!("`{}` has no body to extend; appending to end of file", parent_sig);
            (append_to_file(current, code), ApplyOutcome::AppendedToFile)
        }
    }
}

/// Move a one-line body (`class C: pass`) below its header, then add `code` after it.
fn expand_inline(
    current: &str,
    parent: &Declaration,
    inline: Range<usize>,
    indent: &str,
    code: &str,
) -> String {
    let eol = line_ending(current);
    let head = current[..inline.start].trim_end_matches([' ', '\t']);
    let member = fragment(code, indent, eol);
    format!(
        "{}{}{}{}{}{}{}{}",
        head,
        eol,
        indent,
        &current[inline],
        eol,
        eol,
        member,
        &current[parent.span.end..]
    )
}

/// Add `code` as the last member of `parent`, one blank line after the previous member.
fn append_member(current: &str, parent: &Declaration, indent: &str, code: &str) -> String {
    let eol = line_ending(current);
    let member = fragment(code, indent, eol);
    let end = parent.span.end;
    format!("{}{}{}{}{}", &current[..end], eol, eol, member, &current[end..])
}

/// Add `code` after the last line of the file, two blank lines after existing content.
fn append_to_file(current: &str, code: &str) -> String {
    let eol = line_ending(current);
    let block = fragment(code, "", eol);
    let base = current.trim_end_matches(['\n', '\r']);
    let joined = if base.trim().is_empty() {
        block
    } else {
        format!("{}{}{}{}{}", base, eol, eol, eol, block)
    };
    normalize_trailing_newline(current, joined)
}

/// Keep the original file's trailing-newline convention.
fn normalize_trailing_newline(original: &str, content: String) -> String {
    let mut normalized = content;
    if original.ends_with('\n') {
        if !normalized.ends_with('\n') {
            normalized.push_str(line_ending(original));
        }
    } else {
        while normalized.ends_with('\n') {
            normalized.pop();
            if normalized.ends_with('\r') {
                normalized.pop();
            }
        }
    }
    normalized
}
