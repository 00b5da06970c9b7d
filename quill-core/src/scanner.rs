//! Layered lexical scanner.
//!
//! The scanner works line by line and produces a token tree instead of
//! a flat token stream: indentation opens and closes layers, so the
//! parser never sees INDENT/DEDENT markers. All user-level problems
//! (bad indentation, unterminated literals, mismatched pairs) are
//! recorded as diagnostics with a local recovery so a single scan
//! surfaces every independent error; only violated internal invariants
//! abort the scan.

use crate::config::ScanConfig;
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::span::{FileId, Span};
use crate::token::{Element, EndingKind, NodeId, NodePayload, TokenKind, TokenTree};

/// Result of scanning one source file.
#[derive(Debug)]
pub struct ScanResult {
    pub tree: TokenTree,
    pub diagnostics: Vec<Diagnostic>,
}

/// Scan `source` into a token tree.
///
/// `Err` is returned only for internal invariant violations; user
/// errors are reported through `ScanResult::diagnostics`.
pub fn scan(file_id: FileId, source: &str, config: &ScanConfig) -> Result<ScanResult, CoreError> {
    let full_span = Span::new(file_id, 0, source.len() as u32);
    let mut scanner = Scanner {
        file_id,
        config: *config,
        tree: TokenTree::new(full_span),
        layers: Vec::new(),
        diagnostics: Vec::new(),
        macros: Vec::new(),
        in_block_comment: false,
        baseline: None,
    };
    scanner.layers.push(OpenLayer {
        node: scanner.tree.root(),
        tail: None,
        indent: 0,
        kind: LayerKind::Indent,
    });
    scanner.run(source)?;
    let mut tree = scanner.tree;
    let mut diagnostics = scanner.diagnostics;
    normalize(&mut tree, file_id, &mut diagnostics);
    Ok(ScanResult { tree, diagnostics })
}

/// How an open layer was introduced; decides how it may be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerKind {
    /// Opened by indentation (or the root). Closed by dedent.
    Indent,
    /// Opened by a pair delimiter; closed only by the expected closer.
    Pair { closer: &'static str },
    /// Opened by `->`; closed by dedent like an indentation layer.
    Arrow,
    /// Opened by `|-`; closed by `-|` or end of scan.
    Inline,
}

#[derive(Debug)]
struct OpenLayer {
    node: NodeId,
    /// Last appended child, for O(1) appends.
    tail: Option<NodeId>,
    /// Indentation in spaces attributed to this layer.
    indent: u32,
    kind: LayerKind,
}

struct Scanner {
    file_id: FileId,
    config: ScanConfig,
    tree: TokenTree,
    layers: Vec<OpenLayer>,
    diagnostics: Vec<Diagnostic>,
    /// Active textual substitutions, in declaration order.
    macros: Vec<(String, String)>,
    in_block_comment: bool,
    /// Indentation of the first non-blank line, treated as depth zero.
    baseline: Option<u32>,
}

/// What a catalog symbol does when matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolAction {
    StringLit,
    CharLit,
    RegexLit,
    QuotedIdent,
    BlockCommentOpen,
    LineComment,
    PairOpen { closer: &'static str },
    PairClose,
    StrongEnding,
    ArrowLayer,
    InlineOpen,
    InlineClose,
    Plain,
}

/// Fixed symbol catalog. String-like delimiters come first, then
/// entries in descending length so multi-character operators win over
/// their single-character prefixes; the matcher takes the first entry
/// that matches at the earliest position.
const CATALOG: &[(&str, SymbolAction)] = &[
    ("\"", SymbolAction::StringLit),
    ("'", SymbolAction::CharLit),
    ("r`", SymbolAction::RegexLit),
    ("`", SymbolAction::QuotedIdent),
    ("/*", SymbolAction::BlockCommentOpen),
    ("//", SymbolAction::LineComment),
    (">>>", SymbolAction::Plain),
    ("===", SymbolAction::Plain),
    ("!==", SymbolAction::Plain),
    ("->", SymbolAction::ArrowLayer),
    ("|-", SymbolAction::InlineOpen),
    ("-|", SymbolAction::InlineClose),
    ("..", SymbolAction::Plain),
    ("^^", SymbolAction::Plain),
    ("<<", SymbolAction::Plain),
    (">>", SymbolAction::Plain),
    ("<=", SymbolAction::Plain),
    (">=", SymbolAction::Plain),
    ("==", SymbolAction::Plain),
    ("!=", SymbolAction::Plain),
    ("&&", SymbolAction::Plain),
    ("||", SymbolAction::Plain),
    (":=", SymbolAction::Plain),
    ("++", SymbolAction::Plain),
    ("--", SymbolAction::Plain),
    ("(", SymbolAction::PairOpen { closer: ")" }),
    ("[", SymbolAction::PairOpen { closer: "]" }),
    ("{", SymbolAction::PairOpen { closer: "}" }),
    (")", SymbolAction::PairClose),
    ("]", SymbolAction::PairClose),
    ("}", SymbolAction::PairClose),
    (";", SymbolAction::StrongEnding),
    ("+", SymbolAction::Plain),
    ("-", SymbolAction::Plain),
    ("*", SymbolAction::Plain),
    ("/", SymbolAction::Plain),
    ("%", SymbolAction::Plain),
    ("<", SymbolAction::Plain),
    (">", SymbolAction::Plain),
    ("=", SymbolAction::Plain),
    ("!", SymbolAction::Plain),
    ("~", SymbolAction::Plain),
    ("&", SymbolAction::Plain),
    ("^", SymbolAction::Plain),
    ("|", SymbolAction::Plain),
    (".", SymbolAction::Plain),
    (",", SymbolAction::Plain),
    (":", SymbolAction::Plain),
    ("@", SymbolAction::Plain),
];

const KEYWORDS: &[&str] = &[
    "if", "elseif", "else", "for", "while", "do", "try", "catch", "finally", "throw", "sync",
    "class", "interface", "fn", "val", "var", "pass", "package", "import", "continue", "break",
    "return", "in", "is", "not", "and", "or", "new", "null", "as",
];

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "internal",
    "static",
    "final",
    "abstract",
    "override",
    "implicit",
];

impl Scanner {
    fn run(&mut self, source: &str) -> Result<(), CoreError> {
        let mut offset = 0u32;
        for line in source.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len() as u32;
            let line = line.trim_end_matches(['\n', '\r']);
            self.scan_line(line, line_start)?;
        }
        self.finish_at(Span::point(self.file_id, offset));
        Ok(())
    }

    fn span(&self, start: u32, end: u32) -> Span {
        Span::new(self.file_id, start, end)
    }

    // -- layer bookkeeping -------------------------------------------------

    fn top(&mut self) -> &mut OpenLayer {
        self.layers.last_mut().expect("root layer always open")
    }

    fn append(&mut self, payload: NodePayload, span: Span) -> NodeId {
        let id = self.tree.alloc(payload, span);
        let top = self.layers.last_mut().expect("root layer always open");
        match top.tail {
            Some(tail) => self.tree.link_after(tail, id),
            None => self.tree.push_front(top.node, id),
        }
        let top = self.layers.last_mut().expect("root layer always open");
        top.tail = Some(id);
        id
    }

    fn open_layer(&mut self, indent: u32, kind: LayerKind, span: Span) {
        let node = self.append(NodePayload::LayerStart { indent, child: None }, span);
        self.layers.push(OpenLayer {
            node,
            tail: None,
            indent,
            kind,
        });
    }

    /// Pops the innermost layer, reporting pairs left unclosed.
    fn close_layer(&mut self, at: Span) {
        let closed = self.layers.pop().expect("close_layer never pops the root");
        if let LayerKind::Pair { closer } = closed.kind {
            self.diagnostics.push(
                Diagnostic::error(format!("unclosed delimiter, expected `{closer}`"), at)
                    .with_code("E0104"),
            );
        }
    }

    fn finish_at(&mut self, span: Span) {
        while self.layers.len() > 1 {
            self.close_layer(span);
        }
    }

    // -- per-line driver ---------------------------------------------------

    fn scan_line(&mut self, raw: &str, line_start: u32) -> Result<(), CoreError> {
        // Resume a block comment left open on an earlier line.
        if self.in_block_comment {
            let Some(close) = raw.find("*/") else {
                return Ok(());
            };
            self.in_block_comment = false;
            let cursor = close + 2;
            if raw[cursor..].trim().is_empty() {
                return Ok(());
            }
            // Tokens after the closing marker stay in the current layer;
            // the indentation of this line was consumed by the comment.
            self.tokenize(&raw[cursor..], line_start + cursor as u32)?;
            self.weak_ending(line_start + raw.len() as u32);
            return Ok(());
        }
        let line = raw;

        if line.trim().is_empty() {
            return Ok(());
        }

        if self.directive(line, line_start) {
            return Ok(());
        }

        let substituted;
        if self.macros.is_empty() {
            substituted = None;
        } else {
            let mut text = line.to_string();
            for (from, to) in &self.macros {
                text = text.replace(from.as_str(), to);
            }
            substituted = Some(text);
        }
        let line = substituted.as_deref().unwrap_or(line);

        let indent = measure_indent(line);
        let body_start = indent as usize;
        if line[body_start..].trim().is_empty() {
            return Ok(());
        }

        // Indentation drives layers only outside explicit pair layers;
        // inside parens/brackets/braces the layout is free-form.
        if !matches!(self.top().kind, LayerKind::Pair { .. }) {
            self.apply_indent(indent, line_start)?;
        }

        self.tokenize(&line[body_start..], line_start + body_start as u32)?;
        self.weak_ending(line_start + line.len() as u32);
        Ok(())
    }

    /// Appends a Weak ending if the line left a real element last.
    fn weak_ending(&mut self, at: u32) {
        let Some(tail) = self.top().tail else { return };
        if matches!(self.tree.node(tail).payload, NodePayload::Element(_)) {
            self.append(
                NodePayload::Ending(EndingKind::Weak),
                Span::point(self.file_id, at),
            );
        }
    }

    // -- indentation -------------------------------------------------------

    fn apply_indent(&mut self, measured: u32, line_start: u32) -> Result<(), CoreError> {
        let span = self.span(line_start, line_start + measured);
        let baseline = *self.baseline.get_or_insert(measured);
        let mut relative = measured.saturating_sub(baseline);
        if measured < baseline {
            self.diagnostics.push(
                Diagnostic::error("line is indented left of the first line", span)
                    .with_code("E0102"),
            );
        }

        let unit = self.config.indent_unit;
        if relative % unit != 0 {
            let assumed = relative.div_ceil(unit) * unit;
            self.diagnostics.push(
                Diagnostic::error(
                    format!("indentation of {relative} is not a multiple of {unit}"),
                    span,
                )
                .with_code("E0102"),
            );
            self.diagnostics
                .push(Diagnostic::note(format!("assuming depth {assumed}"), span));
            relative = assumed;
        }

        let current = self.top().indent;
        if relative == current {
            return Ok(());
        }
        if relative == current + unit {
            self.open_layer(relative, LayerKind::Indent, span);
            return Ok(());
        }
        if relative > current {
            // Deeper by more than one unit: recoverable; open a single
            // layer at the measured depth so following lines line up.
            self.diagnostics.push(
                Diagnostic::error(
                    format!("indentation jumps from {current} to {relative}"),
                    span,
                )
                .with_code("E0109"),
            );
            self.open_layer(relative, LayerKind::Indent, span);
            return Ok(());
        }

        // Dedent: pop until a layer at the target indentation surfaces.
        while self.top().indent > relative && self.layers.len() > 1 {
            self.close_layer(span);
        }
        if self.top().indent > relative {
            return Err(CoreError::Internal(format!(
                "dedent to {relative} left layer at {} open",
                self.top().indent
            )));
        }
        if self.top().indent < relative {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("no enclosing block at indentation {relative}"),
                    span,
                )
                .with_code("E0102"),
            );
        }
        Ok(())
    }

    // -- directives --------------------------------------------------------

    /// Handles `define "from" as "to"` and `undef "from"` lines.
    fn directive(&mut self, line: &str, line_start: u32) -> bool {
        let trimmed = line.trim_start();
        let span = self.span(line_start, line_start + line.len() as u32);
        if let Some(rest) = trimmed.strip_prefix("define ") {
            match parse_define(rest) {
                Some((from, to)) => self.macros.push((from, to)),
                None => self.diagnostics.push(
                    Diagnostic::error("malformed define directive", span).with_code("E0107"),
                ),
            }
            return true;
        }
        if let Some(rest) = trimmed.strip_prefix("undef ") {
            match parse_quoted(rest.trim()) {
                Some(from) if rest.trim().len() == from.len() + 2 => {
                    let before = self.macros.len();
                    self.macros.retain(|(f, _)| f != &from);
                    if self.macros.len() == before {
                        self.diagnostics.push(
                            Diagnostic::error(
                                format!("undef of macro \"{from}\" that is not defined"),
                                span,
                            )
                            .with_code("E0107"),
                        );
                    }
                }
                _ => self.diagnostics.push(
                    Diagnostic::error("malformed undef directive", span).with_code("E0107"),
                ),
            }
            return true;
        }
        false
    }

    // -- tokenization ------------------------------------------------------

    fn tokenize(&mut self, text: &str, base: u32) -> Result<(), CoreError> {
        let bytes = text.as_bytes();
        let mut pos = 0usize;
        let mut flushed = 0usize;

        while pos < bytes.len() {
            let Some((action, len)) = match_symbol(&text[pos..]) else {
                pos += utf8_len(bytes[pos]);
                continue;
            };

            self.flush_words(&text[flushed..pos], base + flushed as u32);
            let sym_start = base + pos as u32;
            let sym_span = self.span(sym_start, sym_start + len as u32);

            match action {
                SymbolAction::StringLit => {
                    pos += self.quoted_run(text, base, pos, len, '"', TokenKind::Str, true);
                }
                SymbolAction::CharLit => {
                    pos += self.quoted_run(text, base, pos, len, '\'', TokenKind::Char, true);
                }
                SymbolAction::RegexLit => {
                    pos += self.quoted_run(text, base, pos, len, '`', TokenKind::Regex, true);
                }
                SymbolAction::QuotedIdent => {
                    pos += self.quoted_run(text, base, pos, len, '`', TokenKind::Ident, false);
                }
                SymbolAction::BlockCommentOpen => match text[pos + len..].find("*/") {
                    Some(close) => pos += len + close + 2,
                    None => {
                        self.in_block_comment = true;
                        flushed = text.len();
                        pos = text.len();
                        break;
                    }
                },
                SymbolAction::LineComment => {
                    flushed = text.len();
                    pos = text.len();
                    break;
                }
                SymbolAction::PairOpen { closer } => {
                    self.append(
                        NodePayload::Element(Element {
                            text: text[pos..pos + len].to_string(),
                            kind: TokenKind::Symbol,
                        }),
                        sym_span,
                    );
                    let indent = self.top().indent;
                    self.open_layer(indent, LayerKind::Pair { closer }, sym_span);
                    pos += len;
                }
                SymbolAction::PairClose => {
                    self.close_pair(&text[pos..pos + len], sym_span);
                    pos += len;
                }
                SymbolAction::StrongEnding => {
                    self.append(NodePayload::Ending(EndingKind::Strong), sym_span);
                    pos += len;
                }
                SymbolAction::ArrowLayer => {
                    self.append(
                        NodePayload::Element(Element {
                            text: "->".to_string(),
                            kind: TokenKind::Symbol,
                        }),
                        sym_span,
                    );
                    let indent = self.top().indent + self.config.indent_unit;
                    self.open_layer(indent, LayerKind::Arrow, sym_span);
                    pos += len;
                }
                SymbolAction::InlineOpen => {
                    self.append(
                        NodePayload::Element(Element {
                            text: "|-".to_string(),
                            kind: TokenKind::Symbol,
                        }),
                        sym_span,
                    );
                    let indent = self.top().indent;
                    self.open_layer(indent, LayerKind::Inline, sym_span);
                    pos += len;
                }
                SymbolAction::InlineClose => {
                    self.close_inline(sym_span);
                    pos += len;
                }
                SymbolAction::Plain => {
                    self.append(
                        NodePayload::Element(Element {
                            text: text[pos..pos + len].to_string(),
                            kind: TokenKind::Symbol,
                        }),
                        sym_span,
                    );
                    pos += len;
                }
            }
            flushed = pos;
        }

        self.flush_words(&text[flushed..], base + flushed as u32);
        Ok(())
    }

    /// Consumes a string-like run: `opener_len` bytes of opener, then
    /// verbatim text to the matching closer. Returns the total length
    /// consumed. On a missing closer, reports and assumes end of line.
    fn quoted_run(
        &mut self,
        text: &str,
        base: u32,
        start: usize,
        opener_len: usize,
        closer: char,
        kind: TokenKind,
        escape_aware: bool,
    ) -> usize {
        let body = &text[start + opener_len..];
        let mut end = None;
        let mut escaped = false;
        for (index, ch) in body.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            if escape_aware && ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == closer {
                end = Some(index);
                break;
            }
        }

        let (consumed, terminated) = match end {
            Some(index) => (opener_len + index + closer.len_utf8(), true),
            None => (opener_len + body.len(), false),
        };
        let lexeme = &text[start..start + consumed];
        let element_span = self.span(
            base + start as u32,
            base + (start + consumed) as u32,
        );
        if !terminated {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("unterminated literal, expected `{closer}`"),
                    element_span,
                )
                .with_code("E0103"),
            );
            self.diagnostics.push(Diagnostic::note(
                "assuming the literal ends at end of line",
                element_span,
            ));
        }
        self.append(
            NodePayload::Element(Element {
                text: lexeme.to_string(),
                kind,
            }),
            element_span,
        );
        consumed
    }

    /// Pops back to the innermost pair layer and validates the pairing.
    fn close_pair(&mut self, closer: &str, span: Span) {
        if !self
            .layers
            .iter()
            .any(|l| matches!(l.kind, LayerKind::Pair { .. }))
        {
            self.diagnostics.push(
                Diagnostic::error(format!("unexpected `{closer}` with no open pair"), span)
                    .with_code("E0104"),
            );
            return;
        }
        loop {
            match self.top().kind {
                LayerKind::Pair { closer: expected } => {
                    self.layers.pop();
                    if expected != closer {
                        self.diagnostics.push(
                            Diagnostic::error(
                                format!("mismatched pair: expected `{expected}`, found `{closer}`"),
                                span,
                            )
                            .with_code("E0104"),
                        );
                    }
                    break;
                }
                // Arrow/inline layers opened inside the pair close
                // implicitly with it.
                _ => {
                    self.layers.pop();
                }
            }
        }
        self.append(
            NodePayload::Element(Element {
                text: closer.to_string(),
                kind: TokenKind::Symbol,
            }),
            span,
        );
    }

    /// Closes the innermost `|-` layer; unmatched `-|` is a user error.
    fn close_inline(&mut self, span: Span) {
        let has_inline = self
            .layers
            .iter()
            .any(|l| matches!(l.kind, LayerKind::Inline));
        if !has_inline {
            self.diagnostics.push(
                Diagnostic::error("`-|` without a matching `|-`", span).with_code("E0108"),
            );
            return;
        }
        loop {
            let kind = self.top().kind;
            self.layers.pop();
            if matches!(kind, LayerKind::Inline) {
                break;
            }
        }
    }

    /// Splits a run of plain text on whitespace and appends one
    /// classified element per word.
    fn flush_words(&mut self, text: &str, base: u32) {
        let mut index = 0usize;
        let bytes = text.as_bytes();
        while index < bytes.len() {
            if bytes[index].is_ascii_whitespace() {
                index += 1;
                continue;
            }
            let start = index;
            while index < bytes.len() && !bytes[index].is_ascii_whitespace() {
                index += 1;
            }
            let word = &text[start..index];
            let span = self.span(base + start as u32, base + index as u32);
            let kind = self.classify(word, span);
            self.append(
                NodePayload::Element(Element {
                    text: word.to_string(),
                    kind,
                }),
                span,
            );
        }
    }

    fn classify(&mut self, word: &str, span: Span) -> TokenKind {
        if word.as_bytes().first().is_some_and(u8::is_ascii_digit) {
            if !word.bytes().all(|b| b.is_ascii_digit() || b == b'_') {
                self.diagnostics.push(
                    Diagnostic::error(format!("malformed number `{word}`"), span)
                        .with_code("E0106"),
                );
            }
            return TokenKind::Number;
        }
        match word {
            "true" | "false" => TokenKind::Bool,
            _ if KEYWORDS.contains(&word) => TokenKind::Keyword,
            _ if MODIFIERS.contains(&word) => TokenKind::Modifier,
            _ => TokenKind::Ident,
        }
    }
}

/// Longest catalog entry matching at the start of `text`, with
/// string-like delimiters taking priority by catalog order.
fn match_symbol(text: &str) -> Option<(SymbolAction, usize)> {
    let mut best: Option<(SymbolAction, usize)> = None;
    for (lexeme, action) in CATALOG {
        if text.starts_with(lexeme) {
            match best {
                Some((_, len)) if len >= lexeme.len() => {}
                _ => best = Some((*action, lexeme.len())),
            }
            // String-like delimiters are listed first and win outright.
            if matches!(
                action,
                SymbolAction::StringLit
                    | SymbolAction::CharLit
                    | SymbolAction::RegexLit
                    | SymbolAction::QuotedIdent
            ) {
                return Some((*action, lexeme.len()));
            }
        }
    }
    best
}

fn measure_indent(line: &str) -> u32 {
    line.bytes().take_while(|b| *b == b' ').count() as u32
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

fn parse_quoted(text: &str) -> Option<String> {
    let rest = text.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Parses `"from" as "to"`.
fn parse_define(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    let from = parse_quoted(rest)?;
    let rest = rest[from.len() + 2..].trim_start();
    let rest = rest.strip_prefix("as")?.trim_start();
    let to = parse_quoted(rest)?;
    if from.is_empty() {
        return None;
    }
    Some((from, to))
}

// -- normalization ---------------------------------------------------------

/// Post-scan whole-tree normalization: drop endings with
/// no following content, merge `int . int` into float literals, check
/// element name validity, guarantee every layer starts with an ending,
/// and remove inline-block markers.
fn normalize(tree: &mut TokenTree, file_id: FileId, diagnostics: &mut Vec<Diagnostic>) {
    let root = tree.root();
    normalize_layer(tree, root, file_id, diagnostics);
}

fn normalize_layer(
    tree: &mut TokenTree,
    layer: NodeId,
    file_id: FileId,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Recurse into nested layers first so splices see normalized children.
    let children: Vec<NodeId> = tree.children(layer).collect();
    for id in &children {
        if matches!(tree.node(*id).payload, NodePayload::LayerStart { .. }) {
            normalize_layer(tree, *id, file_id, diagnostics);
        }
    }

    remove_inline_markers(tree, layer);
    merge_float_literals(tree, layer);
    drop_trailing_endings(tree, layer);
    check_names(tree, layer, diagnostics);
    insert_synthetic_endings(tree, layer, file_id);
}

/// Removes `|-` marker elements; the nested layer they introduced
/// stays spliced in the parent at the marker's position.
fn remove_inline_markers(tree: &mut TokenTree, layer: NodeId) {
    let markers: Vec<NodeId> = tree
        .children(layer)
        .filter(|id| {
            matches!(
                &tree.node(*id).payload,
                NodePayload::Element(e) if e.kind == TokenKind::Symbol && e.text == "|-"
            )
        })
        .collect();
    for id in markers {
        tree.unlink(layer, id);
    }
}

/// Merges adjacent `Number "." Number` runs into one float element
/// when the three lexemes touch in the source (no spaces between).
fn merge_float_literals(tree: &mut TokenTree, layer: NodeId) {
    let mut cursor = tree.first_child(layer);
    while let Some(id) = cursor {
        cursor = tree.node(id).next;
        let Some(dot) = tree.node(id).next else {
            continue;
        };
        let Some(frac) = tree.node(dot).next else {
            continue;
        };
        let int_ok = matches!(tree.element(id), Some(e) if e.kind == TokenKind::Number);
        let dot_ok = matches!(tree.element(dot), Some(e) if e.kind == TokenKind::Symbol && e.text == ".");
        let frac_ok = matches!(tree.element(frac), Some(e) if e.kind == TokenKind::Number);
        if !(int_ok && dot_ok && frac_ok) {
            continue;
        }
        let (int_span, dot_span, frac_span) =
            (tree.node(id).span, tree.node(dot).span, tree.node(frac).span);
        if int_span.end != dot_span.start || dot_span.end != frac_span.start {
            continue;
        }
        let merged_text = format!(
            "{}.{}",
            tree.element(id).expect("int element").text,
            tree.element(frac).expect("fraction element").text
        );
        let merged_span = int_span.merge(frac_span);
        cursor = tree.node(frac).next;
        tree.unlink(layer, dot);
        tree.unlink(layer, frac);
        let node = tree.node_mut(id);
        node.span = merged_span;
        node.payload = NodePayload::Element(Element {
            text: merged_text,
            kind: TokenKind::Number,
        });
    }
}

/// Removes endings that no real content follows.
fn drop_trailing_endings(tree: &mut TokenTree, layer: NodeId) {
    let children: Vec<NodeId> = tree.children(layer).collect();
    let mut last_content = None;
    for (index, id) in children.iter().enumerate() {
        if !matches!(tree.node(*id).payload, NodePayload::Ending(_)) {
            last_content = Some(index);
        }
    }
    let cut_from = last_content.map_or(0, |i| i + 1);
    for id in &children[cut_from..] {
        tree.unlink(layer, *id);
    }
}

fn check_names(tree: &TokenTree, layer: NodeId, diagnostics: &mut Vec<Diagnostic>) {
    for id in tree.children(layer) {
        if let Some(element) = tree.element(id) {
            if !element.is_valid_name() {
                diagnostics.push(
                    Diagnostic::error(
                        format!("`{}` is not a valid identifier", element.text),
                        tree.node(id).span,
                    )
                    .with_code("E0105"),
                );
            }
        }
    }
}

/// Guarantees the layer invariant: a non-empty child chain begins
/// with exactly one ending, and any node directly following a nested
/// layer is preceded by an ending.
fn insert_synthetic_endings(tree: &mut TokenTree, layer: NodeId, file_id: FileId) {
    if let Some(first) = tree.first_child(layer) {
        if !matches!(tree.node(first).payload, NodePayload::Ending(_)) {
            let at = tree.node(first).span.start;
            let id = tree.alloc(
                NodePayload::Ending(EndingKind::Synthetic),
                Span::point(file_id, at),
            );
            tree.push_front(layer, id);
        }
    }

    let children: Vec<NodeId> = tree.children(layer).collect();
    for pair in children.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let prev_is_layer = matches!(tree.node(prev).payload, NodePayload::LayerStart { .. });
        let next_is_ending = matches!(tree.node(next).payload, NodePayload::Ending(_));
        if prev_is_layer && !next_is_ending {
            let at = tree.node(next).span.start;
            let id = tree.alloc(
                NodePayload::Ending(EndingKind::Synthetic),
                Span::point(file_id, at),
            );
            tree.link_after(prev, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::any_errors;

    fn scan_ok(source: &str) -> ScanResult {
        scan(FileId(0), source, &ScanConfig::default()).expect("scan")
    }

    fn layer_elements(tree: &TokenTree, layer: NodeId) -> Vec<String> {
        tree.children(layer)
            .filter_map(|id| tree.element(id).map(|e| e.text.clone()))
            .collect()
    }

    fn nested_layers(tree: &TokenTree, layer: NodeId) -> Vec<NodeId> {
        tree.children(layer)
            .filter(|id| matches!(tree.node(*id).payload, NodePayload::LayerStart { .. }))
            .collect()
    }

    #[test]
    fn splits_words_and_symbols() {
        let result = scan_ok("val x = 1 + 2\n");
        assert!(!any_errors(&result.diagnostics));
        let root = result.tree.root();
        assert_eq!(
            layer_elements(&result.tree, root),
            vec!["val", "x", "=", "1", "+", "2"]
        );
    }

    #[test]
    fn longest_symbol_wins_over_prefix() {
        let result = scan_ok("a >>> b >> c > d\n");
        let root = result.tree.root();
        assert_eq!(
            layer_elements(&result.tree, root),
            vec!["a", ">>>", "b", ">>", "c", ">", "d"]
        );
    }

    #[test]
    fn indentation_opens_and_closes_layers() {
        let source = "while a\n    b\n    c\nd\n";
        let result = scan_ok(source);
        assert!(!any_errors(&result.diagnostics));
        let tree = &result.tree;
        let root = tree.root();
        let nested = nested_layers(tree, root);
        assert_eq!(nested.len(), 1);
        assert_eq!(tree.layer_indent(nested[0]), 4);
        assert_eq!(layer_elements(tree, nested[0]), vec!["b", "c"]);
        assert_eq!(layer_elements(tree, root), vec!["while", "a", "d"]);
    }

    #[test]
    fn nested_layer_indent_steps_by_unit() {
        let source = "a\n    b\n        c\n";
        let result = scan_ok(source);
        let tree = &result.tree;
        let outer = nested_layers(tree, tree.root())[0];
        let inner = nested_layers(tree, outer)[0];
        assert_eq!(tree.layer_indent(outer), 4);
        assert_eq!(tree.layer_indent(inner), 8);
    }

    #[test]
    fn bad_indentation_rounds_up_and_recovers() {
        let source = "a\n      b\n"; // 6 spaces with unit 4
        let result = scan_ok(source);
        assert!(any_errors(&result.diagnostics));
        let tree = &result.tree;
        let nested = nested_layers(tree, tree.root());
        assert_eq!(nested.len(), 1);
        // rounded up to the nearest multiple of the unit
        assert_eq!(tree.layer_indent(nested[0]), 8);
    }

    #[test]
    fn every_layer_begins_with_an_ending() {
        let source = "if a\n    b\nc\n";
        let result = scan_ok(source);
        let tree = &result.tree;
        fn check(tree: &TokenTree, layer: NodeId) {
            if let Some(first) = tree.first_child(layer) {
                assert!(
                    matches!(tree.node(first).payload, NodePayload::Ending(_)),
                    "layer must start with an ending"
                );
            }
            for id in tree.children(layer) {
                if matches!(tree.node(id).payload, NodePayload::LayerStart { .. }) {
                    check(tree, id);
                }
            }
        }
        check(tree, tree.root());
    }

    #[test]
    fn strong_ending_from_semicolon() {
        let result = scan_ok("a; b\nc\n");
        let tree = &result.tree;
        let endings: Vec<EndingKind> = tree
            .children(tree.root())
            .filter_map(|id| match tree.node(id).payload {
                NodePayload::Ending(kind) => Some(kind),
                _ => None,
            })
            .collect();
        assert!(endings.contains(&EndingKind::Strong));
        assert!(endings.contains(&EndingKind::Weak));
    }

    #[test]
    fn pairs_create_layers_and_validate_closers() {
        let result = scan_ok("f(a, b)\n");
        assert!(!any_errors(&result.diagnostics));
        let tree = &result.tree;
        let root = tree.root();
        assert_eq!(layer_elements(tree, root), vec!["f", "(", ")"]);
        let nested = nested_layers(tree, root);
        assert_eq!(nested.len(), 1);
        assert_eq!(layer_elements(tree, nested[0]), vec!["a", ",", "b"]);
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let result = scan_ok("f(a]\n");
        assert!(any_errors(&result.diagnostics));
    }

    #[test]
    fn unclosed_pair_is_reported_at_eof() {
        let result = scan_ok("f(a\n");
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == Some("E0104")));
    }

    #[test]
    fn unterminated_string_recovers_to_line_end() {
        let result = scan_ok("val s = \"abc\nval t = 1\n");
        assert!(result.diagnostics.iter().any(|d| d.code == Some("E0103")));
        let tree = &result.tree;
        let texts = layer_elements(tree, tree.root());
        assert!(texts.contains(&"\"abc".to_string()));
        assert!(texts.contains(&"t".to_string()));
    }

    #[test]
    fn string_contents_are_not_retokenized() {
        let result = scan_ok("val s = \"a + b // not comment\"\n");
        assert!(!any_errors(&result.diagnostics));
        let tree = &result.tree;
        let texts = layer_elements(tree, tree.root());
        assert!(texts.contains(&"\"a + b // not comment\"".to_string()));
    }

    #[test]
    fn escaped_closer_is_skipped() {
        let result = scan_ok("\"a\\\"b\"\n");
        assert!(!any_errors(&result.diagnostics));
        let texts = layer_elements(&result.tree, result.tree.root());
        assert_eq!(texts, vec!["\"a\\\"b\""]);
    }

    #[test]
    fn comments_are_discarded() {
        let source = "a // rest ignored\n/* span\nstill comment\n*/ b\n";
        let result = scan_ok(source);
        assert!(!any_errors(&result.diagnostics));
        let texts = layer_elements(&result.tree, result.tree.root());
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn define_substitutes_on_following_lines() {
        let source = "define \"TWO\" as \"2\"\nval x = TWO\nundef \"TWO\"\nval y = TWO\n";
        let result = scan_ok(source);
        let texts = layer_elements(&result.tree, result.tree.root());
        assert!(texts.contains(&"2".to_string()));
        assert!(texts.contains(&"TWO".to_string()));
    }

    #[test]
    fn malformed_directive_is_reported() {
        let result = scan_ok("define TWO as 2\n");
        assert!(result.diagnostics.iter().any(|d| d.code == Some("E0107")));
    }

    #[test]
    fn merges_float_literals_when_adjacent() {
        let result = scan_ok("val x = 1.5\nval y = 1 . 5\n");
        let texts = layer_elements(&result.tree, result.tree.root());
        assert!(texts.contains(&"1.5".to_string()));
        // spaced form stays three separate elements
        assert!(texts.contains(&".".to_string()));
    }

    #[test]
    fn arrow_opens_a_layer() {
        let result = scan_ok("if a -> b\nc\n");
        let tree = &result.tree;
        let root = tree.root();
        assert_eq!(layer_elements(tree, root), vec!["if", "a", "->", "c"]);
        let nested = nested_layers(tree, root);
        assert_eq!(nested.len(), 1);
        assert_eq!(layer_elements(tree, nested[0]), vec!["b"]);
    }

    #[test]
    fn inline_block_markers_are_removed_after_splice() {
        let result = scan_ok("if a |- b -| else |- c -|\n");
        assert!(!any_errors(&result.diagnostics));
        let tree = &result.tree;
        let root = tree.root();
        assert_eq!(layer_elements(tree, root), vec!["if", "a", "else"]);
        let nested = nested_layers(tree, root);
        assert_eq!(nested.len(), 2);
        assert_eq!(layer_elements(tree, nested[0]), vec!["b"]);
        assert_eq!(layer_elements(tree, nested[1]), vec!["c"]);
    }

    #[test]
    fn unmatched_inline_close_is_recoverable() {
        let result = scan_ok("a -| b\n");
        assert!(result.diagnostics.iter().any(|d| d.code == Some("E0108")));
        let texts = layer_elements(&result.tree, result.tree.root());
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn quoted_identifier_is_scanned_verbatim() {
        let result = scan_ok("val `strange name` = 1\n");
        assert!(!any_errors(&result.diagnostics));
        let texts = layer_elements(&result.tree, result.tree.root());
        assert!(texts.contains(&"`strange name`".to_string()));
    }

    #[test]
    fn regex_literal_uses_r_backtick() {
        let result = scan_ok("val p = r`a+b*`\n");
        assert!(!any_errors(&result.diagnostics));
        let tree = &result.tree;
        let kinds: Vec<TokenKind> = tree
            .children(tree.root())
            .filter_map(|id| tree.element(id).map(|e| e.kind))
            .collect();
        assert!(kinds.contains(&TokenKind::Regex));
    }

    #[test]
    fn scanner_reports_many_errors_in_one_pass() {
        let source = "val s = \"open\n      badindent\nf(a]\n";
        let result = scan_ok(source);
        let errors = result
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .count();
        assert!(errors >= 3, "expected 3+ errors, got {errors}");
    }
}
