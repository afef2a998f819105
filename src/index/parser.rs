//! Textual splitter for Python sources.
//!
//! This is a light-weight stand-in for a syntax tree: it only knows enough about
//! Python to cut a file into top-level nodes and to recognize `class` / `def`
//! headers. A node starts on a line whose indentation equals the scan's base
//! indentation and keeps going while later lines are indented deeper, while a
//! bracket is still open, or while a triple-quoted string is still open.
//! Decorators belong to the declaration that follows them.

use super::SymbolKind;
use crate::util::collapse_whitespace;
use std::ops::Range;

const DEFAULT_INDENT_STEP: &str = "    ";

/// A recognized `class` or `def` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: SymbolKind,
    pub name: String,
    /// Header text up to the first `(` (or `:`), whitespace-collapsed.
    pub signature: String,
    /// Byte range in the source, from the first line (decorators included) to the
    /// end of the last non-blank line. Trailing newline excluded.
    pub span: Range<usize>,
}

/// Members found inside a declaration's body.
#[derive(Debug, Clone)]
pub struct Body {
    pub members: Vec<Declaration>,
    /// Indentation of the body's first statement, or parent indent plus four spaces.
    pub indent: String,
    pub suite: Suite,
}

/// Where a declaration keeps its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suite {
    /// Indented lines below the header
    Block,
    /// Statements after the header's colon (`class C: pass`), as a byte range in the source
    Inline(Range<usize>),
    /// Neither form was found
    Missing,
}

#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    depth: i32,
    triple: Option<u8>,
}

impl ScanState {
    fn continuing(&self) -> bool {
        self.depth > 0 || self.triple.is_some()
    }

    /// Advance over one line, tracking open brackets and triple-quoted strings.
    fn feed(&mut self, line: &str) {
        let b = line.as_bytes();
        let mut i = 0;
        while i < b.len() {
            if let Some(q) = self.triple {
                if b[i..].starts_with(&[q, q, q]) {
                    self.triple = None;
                    i += 3;
                } else if b[i] == b'\\' {
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            match b[i] {
                b'#' => break,
                q @ (b'"' | b'\'') => {
                    if b[i..].starts_with(&[q, q, q]) {
                        self.triple = Some(q);
                        i += 3;
                        continue;
                    }
                    // Single-line string: skip to its closing quote.
                    i += 1;
                    while i < b.len() {
                        if b[i] == b'\\' {
                            i += 2;
                            continue;
                        }
                        if b[i] == q {
                            break;
                        }
                        i += 1;
                    }
                }
                b'(' | b'[' | b'{' => self.depth += 1,
                b')' | b']' | b'}' => self.depth = (self.depth - 1).max(0),
                _ => {}
            }
            i += 1;
        }
    }
}

/// Lines of `source[from..to]` as (byte offset, line without its line ending).
fn lines_in(source: &str, from: usize, to: usize) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = from;
    source[from..to].split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        (start, line)
    })
}

fn strip_bom(line: &str) -> &str {
    line.strip_prefix('\u{feff}').unwrap_or(line)
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

struct OpenNode {
    start: usize,
    end: usize,
    decorators_only: bool,
}

/// Split `source[from..to]` into nodes whose first line sits at `base_indent`.
///
/// Comment lines at the base indentation never open a node on their own and only
/// count towards a node's extent when more of its body follows them.
pub fn split_nodes(source: &str, from: usize, to: usize, base_indent: usize) -> Vec<Range<usize>> {
    let mut nodes = Vec::new();
    let mut current: Option<OpenNode> = None;
    let mut state = ScanState::default();

    for (offset, raw) in lines_in(source, from, to) {
        // A byte-order mark is not part of the first node.
        let line = strip_bom(raw);
        let offset = offset + (raw.len() - line.len());
        let trimmed = line.trim();
        let continuing = state.continuing();
        state.feed(line);

        if trimmed.is_empty() && !continuing {
            continue;
        }

        let indent = indent_width(line);
        let at_base = !continuing && indent <= base_indent;
        let line_end = offset + line.len();

        if at_base && trimmed.starts_with('#') {
            continue;
        }

        if at_base {
            let is_decorator = trimmed.starts_with('@');
            match current.as_mut() {
                Some(node) if node.decorators_only => {
                    node.end = line_end;
                    node.decorators_only = is_decorator;
                }
                _ => {
                    if let Some(done) = current.take() {
                        nodes.push(done.start..done.end);
                    }
                    current = Some(OpenNode {
                        start: offset,
                        end: line_end,
                        decorators_only: is_decorator,
                    });
                }
            }
        } else {
            match current.as_mut() {
                Some(node) => node.end = line_end,
                None => {
                    current = Some(OpenNode {
                        start: offset,
                        end: line_end,
                        decorators_only: false,
                    })
                }
            }
        }
    }

    if let Some(done) = current {
        nodes.push(done.start..done.end);
    }
    nodes
}

/// Find the declaration header of a node, skipping decorators and their arguments.
/// Returns the header line's offset within `text` and the line itself.
fn header_line(text: &str) -> Option<(usize, &str)> {
    let mut state = ScanState::default();
    for (offset, line) in lines_in(text, 0, text.len()) {
        let continuing = state.continuing();
        state.feed(line);
        let trimmed = strip_bom(line).trim_start();
        if continuing || trimmed.is_empty() || trimmed.starts_with('@') || trimmed.starts_with('#') {
            continue;
        }
        return Some((offset, line));
    }
    None
}

/// Signature of a header line: text before the first `(`, else before `:`.
pub fn signature_of(header: &str) -> String {
    let header = strip_bom(header.trim_start()).trim();
    let cut = header
        .find('(')
        .or_else(|| header.find(':'))
        .unwrap_or(header.len());
    collapse_whitespace(&header[..cut])
}

/// Normalize a signature coming from outside (engine output, user input).
pub fn normalize_signature(raw: &str) -> String {
    signature_of(raw)
}

fn classify(header: &str) -> Option<(SymbolKind, String)> {
    let trimmed = strip_bom(header.trim_start()).trim_start();
    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("class") {
        (SymbolKind::Class, rest)
    } else if let Some(rest) = trimmed.strip_prefix("def") {
        (SymbolKind::Function, rest)
    } else {
        return None;
    };
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some((kind, name))
    }
}

fn declaration_in(source: &str, span: Range<usize>) -> Option<Declaration> {
    let (_, header) = header_line(&source[span.clone()])?;
    let (kind, name) = classify(header)?;
    Some(Declaration {
        kind,
        name,
        signature: signature_of(header),
        span,
    })
}

/// Every top-level node of `source`, recognized or not.
pub fn top_level_nodes(source: &str) -> Vec<Range<usize>> {
    split_nodes(source, 0, source.len(), 0)
}

/// Top-level `class` and `def` declarations in source order.
pub fn declarations(source: &str) -> Vec<Declaration> {
    top_level_nodes(source)
        .into_iter()
        .filter_map(|span| declaration_in(source, span))
        .collect()
}

/// The first declaration in a code fragment (used to read generated code).
pub fn first_declaration(code: &str) -> Option<Declaration> {
    let dedented = dedent(code);
    declarations(&dedented).into_iter().next()
}

/// Members declared directly inside `parent`.
pub fn body_of(source: &str, parent: &Declaration) -> Body {
    let text = &source[parent.span.clone()];
    let base = parent.span.start;
    let fallback_indent = || {
        let parent_indent = header_line(text)
            .map(|(_, line)| &line[..indent_width(line)])
            .unwrap_or("");
        format!("{}{}", parent_indent, DEFAULT_INDENT_STEP)
    };

    let Some((header_offset, header)) = header_line(text) else {
        return Body {
            members: Vec::new(),
            indent: fallback_indent(),
            suite: Suite::Missing,
        };
    };
    let header_indent = indent_width(header);

    // The header itself may continue over several lines while its brackets are open.
    // Comments say nothing about the body's indentation.
    let mut state = ScanState::default();
    let mut body_start = None;
    for (offset, line) in lines_in(text, header_offset, text.len()) {
        let continuing = state.continuing();
        state.feed(line);
        let trimmed = line.trim();
        if offset == header_offset || continuing || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if indent_width(line) > header_indent {
            body_start = Some((offset, line));
        }
        break;
    }

    let Some((body_offset, first_line)) = body_start else {
        let suite = inline_suite(text, header_offset)
            .map(|r| Suite::Inline(base + r.start..base + r.end))
            .unwrap_or(Suite::Missing);
        return Body {
            members: Vec::new(),
            indent: fallback_indent(),
            suite,
        };
    };
    let width = indent_width(first_line);
    let indent = first_line[..width].to_string();

    let members = split_nodes(source, base + body_offset, parent.span.end, width)
        .into_iter()
        .filter_map(|span| declaration_in(source, span))
        .collect();
    Body {
        members,
        indent,
        suite: Suite::Block,
    }
}

/// Statements written after the header's colon, relative to `text`.
fn inline_suite(text: &str, header_offset: usize) -> Option<Range<usize>> {
    let start = header_offset + header_end(&text[header_offset..])?;
    let rest = &text[start..];
    let code = rest.trim_start();
    if code.is_empty() || code.starts_with('#') {
        return None;
    }
    let from = start + (rest.len() - code.len());
    Some(from..from + code.trim_end().len())
}

/// Offset just past the `:` closing a header, outside brackets, strings and comments.
fn header_end(text: &str) -> Option<usize> {
    let b = text.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'#' => {
                while i < b.len() && b[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            q @ (b'"' | b'\'') => {
                i += 1;
                while i < b.len() && b[i] != q && b[i] != b'\n' {
                    i += if b[i] == b'\\' { 2 } else { 1 };
                }
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = (depth - 1).max(0),
            b':' if depth == 0 => return Some(i + 1),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Strip the common leading indentation of all non-blank lines.
pub fn dedent(code: &str) -> String {
    let common = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(indent_width)
        .min()
        .unwrap_or(0);
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                &line[common..]
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Dedent `code`, drop surrounding blank lines, then prefix each non-blank line with `indent`.
///
/// Nested indentation inside the fragment is rewritten in the unit `indent` uses:
/// tabs when it holds a tab, spaces otherwise.
pub fn reindent(code: &str, indent: &str) -> String {
    let dedented = dedent(code);
    let lines: Vec<&str> = dedented.trim_matches('\n').lines().map(str::trim_end).collect();
    let unit = space_unit(&lines);
    let to_tabs = indent.contains('\t');
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                return String::new();
            }
            let width = indent_width(line);
            let lead = &line[..width];
            let lead = if indent.is_empty() {
                lead.to_string()
            } else {
                convert_indent(lead, unit, to_tabs)
            };
            format!("{}{}{}", indent, lead, &line[width..])
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Narrowest all-space indentation in a dedented fragment.
fn space_unit(lines: &[&str]) -> usize {
    lines
        .iter()
        .map(|line| &line[..indent_width(line)])
        .filter(|lead| !lead.is_empty() && !lead.contains('\t'))
        .map(str::len)
        .min()
        .unwrap_or(DEFAULT_INDENT_STEP.len())
}

fn convert_indent(lead: &str, space_unit: usize, to_tabs: bool) -> String {
    if to_tabs {
        let tabs = lead.matches('\t').count();
        let spaces = lead.len() - tabs;
        format!(
            "{}{}",
            "\t".repeat(tabs + spaces / space_unit),
            " ".repeat(spaces % space_unit)
        )
    } else {
        lead.replace('\t', DEFAULT_INDENT_STEP)
    }
}
