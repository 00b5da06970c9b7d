//! Recursive-descent parser over a token-tree layer.
//!
//! One `Parser` instance is bound to one layer; nested layers are
//! parsed by constructing a child parser that inherits a snapshot of
//! the already-used variable names and the map-literal mode flag.
//! Expression parsing is precedence climbing with two explicit stacks
//! (partial expressions and pending binary operators) plus a third
//! stack for pending prefix operators. Malformed statements abandon to
//! the next ending and parsing resumes, so one pass reports as many
//! independent errors as possible.

use crate::ast::{
    Annotation, CatchClause, Expr, ExprKind, IfBranch, Modifier, Param, Stmt, StmtKind,
};
use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::token::{Element, EndingKind, NodeId, NodePayload, TokenKind, TokenTree};

/// Result of parsing one layer.
#[derive(Debug)]
pub struct ParseResult {
    pub statements: Vec<Stmt>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse the children of `layer` into a statement list.
pub fn parse(tree: &TokenTree, layer: NodeId) -> ParseResult {
    let mut parser = Parser::new(tree, layer, Vec::new(), false);
    let statements = parser.parse_layer();
    ParseResult {
        statements,
        diagnostics: parser.diagnostics,
    }
}

/// Control-flow result for statement/expression parsing, replacing
/// exception-based recovery: `AbandonStatement` skips to the next
/// ending; `UnexpectedEnd` means a required token was missing and
/// escalates to abandoning if nothing can absorb it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    AbandonStatement,
    UnexpectedEnd,
}

type PResult<T> = Result<T, Flow>;

/// A pending binary operator on the climbing stack.
#[derive(Debug, Clone)]
struct PendingOp {
    kind: OpKind,
    priority: u8,
    span: Span,
}

#[derive(Debug, Clone)]
enum OpKind {
    /// Symbolic or word-form operator, kept textual.
    Symbolic(String),
    /// Identifier in operator position: `a op b` is `a.op(b)`.
    Named(String),
}

/// Priority groups, high to low. All groups are left-associative.
fn binary_priority(op: &str) -> Option<u8> {
    Some(match op {
        ".." => 12,
        "^^" => 11,
        "*" | "/" | "%" => 10,
        "+" | "-" => 9,
        "<<" | ">>" | ">>>" => 8,
        "<" | ">" | "<=" | ">=" | "==" | "!=" | "===" | "!==" | "is" | "not" | "in" => 7,
        "&" => 6,
        "^" => 5,
        "|" => 4,
        "&&" | "and" => 3,
        "||" | "or" => 2,
        ":=" => 1,
        _ => return None,
    })
}

/// Identifiers in operator position bind at the concatenation level.
const NAMED_OP_PRIORITY: u8 = 12;

const PREFIX_OPS: &[&str] = &["+", "-", "!", "~", "++", "--"];

struct Parser<'t> {
    tree: &'t TokenTree,
    cursor: Option<NodeId>,
    /// Span of the most recently consumed node, for end-of-input errors.
    last_span: Span,
    /// Snapshot of variable names visible from enclosing layers plus
    /// names declared in this layer. Children receive a copy, never a
    /// live reference.
    used_names: Vec<String>,
    map_literal_mode: bool,
    diagnostics: Vec<Diagnostic>,
    /// Modifiers seen but not yet attached to a definition.
    pending_modifiers: Vec<Modifier>,
    pending_annotations: Vec<Annotation>,
    /// Prefix operators currently pending; while nonempty, binary
    /// resolution must not short-circuit past the operand being built.
    unary_stack: Vec<String>,
}

impl<'t> Parser<'t> {
    fn new(tree: &'t TokenTree, layer: NodeId, used_names: Vec<String>, map_mode: bool) -> Self {
        let cursor = tree.first_child(layer);
        let last_span = tree.node(layer).span;
        Parser {
            tree,
            cursor,
            last_span,
            used_names,
            map_literal_mode: map_mode,
            diagnostics: Vec::new(),
            pending_modifiers: Vec::new(),
            pending_annotations: Vec::new(),
            unary_stack: Vec::new(),
        }
    }

    fn child(&self, layer: NodeId, map_mode: bool) -> Parser<'t> {
        Parser::new(self.tree, layer, self.used_names.clone(), map_mode)
    }

    // -- cursor helpers ----------------------------------------------------

    fn peek(&self) -> Option<NodeId> {
        self.cursor
    }

    fn advance(&mut self) {
        if let Some(id) = self.cursor {
            self.last_span = self.tree.node(id).span;
            self.cursor = self.tree.node(id).next;
        }
    }

    fn node_span(&self, id: NodeId) -> Span {
        self.tree.node(id).span
    }

    fn peek_element(&self) -> Option<&'t Element> {
        self.cursor.and_then(|id| self.tree.element(id))
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek_element(), Some(e) if e.kind == TokenKind::Symbol && e.text == symbol)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek_element(), Some(e) if e.kind == TokenKind::Keyword && e.text == word)
    }

    fn at_ending(&self) -> Option<EndingKind> {
        match self.cursor.map(|id| &self.tree.node(id).payload) {
            Some(NodePayload::Ending(kind)) => Some(*kind),
            _ => None,
        }
    }

    fn at_layer(&self) -> bool {
        matches!(
            self.cursor.map(|id| &self.tree.node(id).payload),
            Some(NodePayload::LayerStart { .. })
        )
    }

    /// Node id of the next non-ending node, without consuming anything.
    fn peek_past_endings(&self) -> Option<NodeId> {
        let mut cursor = self.cursor;
        while let Some(id) = cursor {
            if !matches!(self.tree.node(id).payload, NodePayload::Ending(_)) {
                return Some(id);
            }
            cursor = self.tree.node(id).next;
        }
        None
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics
            .push(Diagnostic::error(message, span).with_code("E0201"));
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let span = self
            .cursor
            .map(|id| self.node_span(id))
            .unwrap_or(self.last_span);
        self.error(message, span);
    }

    /// Skip forward to the next ending so parsing can resume.
    fn recover(&mut self) {
        while let Some(id) = self.cursor {
            if matches!(self.tree.node(id).payload, NodePayload::Ending(_)) {
                return;
            }
            self.advance();
        }
    }

    // -- statement loop ----------------------------------------------------

    fn parse_layer(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        loop {
            while self.at_ending().is_some() {
                self.advance();
            }
            if self.peek().is_none() {
                break;
            }
            match self.parse_statement() {
                Ok(Some(stmt)) => statements.push(stmt),
                Ok(None) => {}
                Err(_) => {
                    self.diagnostics.push(Diagnostic::note(
                        "skipping to the next statement",
                        self.last_span,
                    ));
                    self.recover();
                }
            }
        }
        if !self.pending_modifiers.is_empty() || !self.pending_annotations.is_empty() {
            let span = self.last_span;
            self.error("modifiers or annotations attached to nothing", span);
            self.pending_modifiers.clear();
            self.pending_annotations.clear();
        }
        statements
    }

    /// Reports and clears pending modifiers/annotations before a
    /// construct that cannot carry them. Recoverable.
    fn assert_no_pending(&mut self, what: &str) {
        if !self.pending_modifiers.is_empty() || !self.pending_annotations.is_empty() {
            self.error_here(format!("{what} cannot carry modifiers or annotations"));
            self.pending_modifiers.clear();
            self.pending_annotations.clear();
        }
    }

    fn take_modifiers(&mut self) -> (Vec<Modifier>, Vec<Annotation>) {
        (
            std::mem::take(&mut self.pending_modifiers),
            std::mem::take(&mut self.pending_annotations),
        )
    }

    /// After a complete statement the next node must be an ending (or
    /// the end of the layer); anything else is a trailing-garbage error.
    fn expect_statement_end(&mut self) -> PResult<()> {
        if self.peek().is_none() || self.at_ending().is_some() {
            return Ok(());
        }
        self.error_here("expected end of statement");
        Err(Flow::AbandonStatement)
    }

    fn parse_statement(&mut self) -> PResult<Option<Stmt>> {
        let start = self
            .peek()
            .map(|id| self.node_span(id))
            .unwrap_or(self.last_span);

        if let Some(element) = self.peek_element() {
            let kind = element.kind;
            let text = element.text.clone();

            if kind == TokenKind::Modifier {
                let Some(modifier) = Modifier::from_word(&text) else {
                    self.error_here(format!("unknown modifier `{text}`"));
                    return Err(Flow::AbandonStatement);
                };
                self.advance();
                self.pending_modifiers.push(modifier);
                return self.parse_statement();
            }

            if kind == TokenKind::Symbol && text == "@" {
                let annotation = self.parse_annotation()?;
                self.pending_annotations.push(annotation);
                // Annotations may close the line; the definition they
                // decorate follows after the ending.
                while self.at_ending().is_some() && self.peek_past_endings().is_some() {
                    self.advance();
                }
                return self.parse_statement();
            }

            if kind == TokenKind::Keyword {
                return self.parse_keyword_statement(&text, start);
            }
        }

        // Method-definition recognition by structural lookahead, then
        // generic expression parsing.
        if let Some(stmt) = self.try_parse_method_def(start)? {
            return Ok(Some(stmt));
        }
        self.parse_expression_statement(start).map(Some)
    }

    fn parse_keyword_statement(&mut self, word: &str, start: Span) -> PResult<Option<Stmt>> {
        match word {
            "sync" => {
                self.assert_no_pending("sync blocks");
                self.advance();
                let lock = self.parse_expression()?;
                let body = self.parse_body()?;
                self.finish_stmt(StmtKind::Sync { lock, body }, start)
            }
            "if" => {
                self.assert_no_pending("if statements");
                self.advance();
                self.parse_if(start)
            }
            "elseif" | "else" => {
                self.error_here(format!("`{word}` without a preceding `if`"));
                Err(Flow::AbandonStatement)
            }
            "for" => {
                self.assert_no_pending("for loops");
                self.advance();
                self.parse_for(start)
            }
            "while" => {
                self.assert_no_pending("while loops");
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_body()?;
                self.finish_stmt(
                    StmtKind::While {
                        condition,
                        body,
                        do_while: false,
                    },
                    start,
                )
            }
            "do" => {
                self.assert_no_pending("do-while loops");
                self.advance();
                let body = self.parse_body()?;
                self.skip_endings_before_keyword("while");
                if !self.at_keyword("while") {
                    self.error_here("expected `while` after `do` body");
                    return Err(Flow::AbandonStatement);
                }
                self.advance();
                let condition = self.parse_expression()?;
                self.finish_stmt(
                    StmtKind::While {
                        condition,
                        body,
                        do_while: true,
                    },
                    start,
                )
            }
            "class" => {
                self.advance();
                self.parse_class(start)
            }
            "interface" => {
                self.advance();
                self.parse_interface(start)
            }
            "fn" => {
                // `fn (` and `fn ->` begin lambda literals, not
                // definitions; only `fn name` declares a function.
                let next = self.peek().and_then(|id| self.tree.node(id).next);
                let is_lambda = matches!(
                    next.and_then(|id| self.tree.element(id)),
                    Some(e) if e.kind == TokenKind::Symbol && (e.text == "(" || e.text == "->")
                );
                if is_lambda {
                    return self.parse_expression_statement(start).map(Some);
                }
                self.advance();
                self.parse_fn_def(start)
            }
            "try" => {
                self.assert_no_pending("try statements");
                self.advance();
                self.parse_try(start)
            }
            "catch" | "finally" => {
                self.error_here(format!("`{word}` without a preceding `try`"));
                Err(Flow::AbandonStatement)
            }
            "throw" => {
                self.assert_no_pending("throw statements");
                self.advance();
                let value = self.parse_expression()?;
                self.finish_stmt(StmtKind::Throw(value), start)
            }
            "package" => {
                self.assert_no_pending("package declarations");
                self.advance();
                let path = self.parse_dotted_path()?;
                self.finish_stmt(StmtKind::Package(path), start)
            }
            "import" => {
                self.assert_no_pending("imports");
                self.advance();
                let path = self.parse_dotted_path()?;
                self.finish_stmt(StmtKind::Import(path), start)
            }
            "continue" => {
                self.assert_no_pending("continue");
                self.advance();
                self.finish_stmt(StmtKind::Continue, start)
            }
            "break" => {
                self.assert_no_pending("break");
                self.advance();
                self.finish_stmt(StmtKind::Break, start)
            }
            "return" => {
                self.assert_no_pending("return");
                self.advance();
                let value = if self.at_ending().is_some() || self.peek().is_none() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.finish_stmt(StmtKind::Return(value), start)
            }
            "pass" => {
                self.assert_no_pending("pass");
                self.advance();
                self.finish_stmt(StmtKind::Pass, start)
            }
            "val" | "var" => {
                self.advance();
                self.parse_var_def(word == "var", start)
            }
            _ => {
                // Expression-leading keywords: new, null, fn handled in
                // operand position.
                self.parse_expression_statement(start).map(Some)
            }
        }
    }

    fn finish_stmt(&mut self, kind: StmtKind, start: Span) -> PResult<Option<Stmt>> {
        self.expect_statement_end()?;
        Ok(Some(Stmt {
            kind,
            span: start.merge(self.last_span),
        }))
    }

    fn keyword_follows(&self, word: &str) -> bool {
        match self.peek_past_endings() {
            Some(id) => {
                matches!(self.tree.element(id), Some(e) if e.kind == TokenKind::Keyword && e.text == word)
            }
            None => false,
        }
    }

    fn skip_endings_before_keyword(&mut self, word: &str) {
        if self.keyword_follows(word) {
            while self.at_ending().is_some() {
                self.advance();
            }
        }
    }

    // -- keyword constructs ------------------------------------------------

    fn parse_if(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let mut branches = Vec::new();
        let mut else_body = Vec::new();

        let condition = self.parse_expression()?;
        let body = self.parse_body()?;
        branches.push(IfBranch { condition, body });

        loop {
            if self.keyword_follows("elseif") {
                while self.at_ending().is_some() {
                    self.advance();
                }
                self.advance(); // elseif
                let condition = self.parse_expression()?;
                let body = self.parse_body()?;
                branches.push(IfBranch { condition, body });
                continue;
            }
            if self.keyword_follows("else") {
                while self.at_ending().is_some() {
                    self.advance();
                }
                self.advance(); // else
                else_body = self.parse_body()?;
            }
            break;
        }

        self.finish_stmt(
            StmtKind::If {
                branches,
                else_body,
            },
            start,
        )
    }

    fn parse_for(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let binding = self.expect_name("loop variable")?;
        if !self.at_keyword("in") {
            self.error_here("expected `in` after the loop variable");
            return Err(Flow::AbandonStatement);
        }
        self.advance();
        let iterable = self.parse_expression()?;
        self.used_names.push(binding.clone());
        let body = self.parse_body()?;
        self.finish_stmt(
            StmtKind::For {
                binding,
                iterable,
                body,
            },
            start,
        )
    }

    fn parse_try(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let body = self.parse_body()?;
        let mut catches = Vec::new();
        let mut finally = Vec::new();

        while self.keyword_follows("catch") {
            while self.at_ending().is_some() {
                self.advance();
            }
            self.advance(); // catch
            let binding = self.expect_name("exception variable")?;
            let mut exception_types = Vec::new();
            if self.at_symbol(":") {
                self.advance();
                loop {
                    exception_types.push(self.parse_type_name()?);
                    if self.at_symbol(",") {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.used_names.push(binding.clone());
            let body = self.parse_body()?;
            catches.push(CatchClause {
                binding,
                exception_types,
                body,
            });
        }
        if self.keyword_follows("finally") {
            while self.at_ending().is_some() {
                self.advance();
            }
            self.advance(); // finally
            finally = self.parse_body()?;
        }

        if catches.is_empty() && finally.is_empty() {
            self.error_here("`try` needs at least one `catch` or a `finally`");
        }
        self.finish_stmt(
            StmtKind::Try {
                body,
                catches,
                finally,
            },
            start,
        )
    }

    fn parse_class(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let (modifiers, annotations) = self.take_modifiers();
        let name = self.expect_name("class name")?;
        let params = if self.at_symbol("(") {
            self.parse_param_list()?
        } else {
            Vec::new()
        };
        let supers = self.parse_super_list()?;
        let body = if self.body_follows() {
            self.parse_body()?
        } else {
            Vec::new()
        };
        self.used_names.push(name.clone());
        self.finish_stmt(
            StmtKind::ClassDef {
                name,
                params,
                supers,
                body,
                modifiers,
                annotations,
            },
            start,
        )
    }

    fn parse_interface(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let (modifiers, annotations) = self.take_modifiers();
        let name = self.expect_name("interface name")?;
        let supers = self.parse_super_list()?;
        let body = if self.body_follows() {
            self.parse_body()?
        } else {
            Vec::new()
        };
        self.used_names.push(name.clone());
        self.finish_stmt(
            StmtKind::InterfaceDef {
                name,
                supers,
                body,
                modifiers,
                annotations,
            },
            start,
        )
    }

    fn parse_super_list(&mut self) -> PResult<Vec<String>> {
        let mut supers = Vec::new();
        if self.at_symbol(":") {
            self.advance();
            loop {
                supers.push(self.parse_type_name()?);
                if self.at_symbol(",") {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        Ok(supers)
    }

    /// `fn name(params) [: Type]` with a block body, `= expr`, or `= pass`.
    fn parse_fn_def(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let (modifiers, annotations) = self.take_modifiers();
        let name = self.expect_name("function name")?;
        let params = if self.at_symbol("(") {
            self.parse_param_list()?
        } else {
            Vec::new()
        };
        self.parse_method_tail(name, params, modifiers, annotations, start)
    }

    /// Shared tail of `fn` definitions and bare method definitions:
    /// `(params)` has been consumed; handles `: Type`, `= expr`,
    /// `= pass`, and block bodies.
    fn parse_method_tail(
        &mut self,
        name: String,
        params: Vec<Param>,
        modifiers: Vec<Modifier>,
        annotations: Vec<Annotation>,
        start: Span,
    ) -> PResult<Option<Stmt>> {
        let mut return_type = None;
        if self.at_symbol(":") {
            self.advance();
            return_type = Some(self.parse_type_name()?);
        }

        let body;
        if self.at_symbol("=") {
            self.advance();
            if self.at_keyword("pass") {
                self.advance();
                body = Vec::new();
            } else {
                let value_start = self
                    .peek()
                    .map(|id| self.node_span(id))
                    .unwrap_or(self.last_span);
                let value = self.parse_expression()?;
                let span = value_start.merge(self.last_span);
                body = vec![Stmt {
                    kind: StmtKind::Return(Some(value)),
                    span,
                }];
            }
        } else if self.body_follows() {
            let mut names = Vec::new();
            for param in &params {
                names.push(param.name.clone());
            }
            body = self.parse_body_with_names(names)?;
        } else {
            body = Vec::new();
        }

        self.used_names.push(name.clone());
        self.finish_stmt(
            StmtKind::FnDef {
                name,
                params,
                return_type,
                body,
                modifiers,
                annotations,
            },
            start,
        )
    }

    /// Recognizes `name(params)` method-definition forms by structural
    /// lookahead without consuming anything on failure.
    fn try_parse_method_def(&mut self, start: Span) -> PResult<Option<Stmt>> {
        let Some(name_id) = self.peek() else {
            return Ok(None);
        };
        let Some(element) = self.tree.element(name_id) else {
            return Ok(None);
        };
        if element.kind != TokenKind::Ident {
            return Ok(None);
        }
        let name = element.name().to_string();

        // Shape: Ident "(" Layer ")" then one of ":", "=", block.
        let open = self.tree.node(name_id).next;
        let Some(open) = open else { return Ok(None) };
        if !matches!(self.tree.element(open), Some(e) if e.kind == TokenKind::Symbol && e.text == "(")
        {
            return Ok(None);
        }
        let Some(layer) = self.tree.node(open).next else {
            return Ok(None);
        };
        if !matches!(self.tree.node(layer).payload, NodePayload::LayerStart { .. }) {
            return Ok(None);
        }
        let mut close = self.tree.node(layer).next;
        while let Some(id) = close {
            if !matches!(self.tree.node(id).payload, NodePayload::Ending(_)) {
                break;
            }
            close = self.tree.node(id).next;
        }
        let Some(close) = close else { return Ok(None) };
        if !matches!(self.tree.element(close), Some(e) if e.kind == TokenKind::Symbol && e.text == ")")
        {
            return Ok(None);
        }

        // What follows the closing paren decides the form.
        let mut after = self.tree.node(close).next;
        let mut is_def = !self.pending_modifiers.is_empty() || !self.pending_annotations.is_empty();
        let mut saw_weak = false;
        while let Some(id) = after {
            match &self.tree.node(id).payload {
                NodePayload::Ending(EndingKind::Weak | EndingKind::Synthetic) => {
                    saw_weak = true;
                    after = self.tree.node(id).next;
                }
                _ => break,
            }
        }
        match after.map(|id| &self.tree.node(id).payload) {
            Some(NodePayload::Element(e))
                if e.kind == TokenKind::Symbol && (e.text == ":" || e.text == "=") && !saw_weak =>
            {
                is_def = true;
            }
            Some(NodePayload::LayerStart { .. }) => is_def = true,
            _ => {}
        }
        if !is_def {
            return Ok(None);
        }

        let (modifiers, annotations) = self.take_modifiers();
        self.advance(); // name
        let params = self.parse_param_list()?;
        self.parse_method_tail(name, params, modifiers, annotations, start)
    }

    /// Parses `( ... )` into a parameter list. Caller guarantees the
    /// cursor is at `(`.
    fn parse_param_list(&mut self) -> PResult<Vec<Param>> {
        self.advance(); // "("
        if !self.at_layer() {
            self.error_here("expected a parameter list");
            return Err(Flow::AbandonStatement);
        }
        let layer = self.peek().ok_or(Flow::AbandonStatement)?;
        self.advance();
        while self.at_ending().is_some() {
            self.advance();
        }
        if !self.at_symbol(")") {
            self.error_here("expected `)` after parameters");
            return Err(Flow::AbandonStatement);
        }
        self.advance();

        let mut child = self.child(layer, false);
        let params = child.parse_params_inner();
        self.diagnostics.append(&mut child.diagnostics);
        Ok(params)
    }

    fn parse_params_inner(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        loop {
            while self.at_ending().is_some() || self.at_symbol(",") {
                self.advance();
            }
            if self.peek().is_none() {
                break;
            }
            let start = self
                .peek()
                .map(|id| self.node_span(id))
                .unwrap_or(self.last_span);
            let Ok(name) = self.expect_name("parameter name") else {
                self.recover();
                continue;
            };
            let mut declared_type = None;
            if self.at_symbol(":") {
                self.advance();
                match self.parse_type_name() {
                    Ok(t) => declared_type = Some(t),
                    Err(_) => {
                        self.recover();
                        continue;
                    }
                }
            }
            let mut default = None;
            if self.at_symbol("=") {
                self.advance();
                match self.parse_expression() {
                    Ok(expr) => default = Some(expr),
                    Err(_) => {
                        self.recover();
                        continue;
                    }
                }
            }
            params.push(Param {
                name,
                declared_type,
                default,
                span: start.merge(self.last_span),
            });
        }
        params
    }

    fn parse_var_def(&mut self, mutable: bool, start: Span) -> PResult<Option<Stmt>> {
        let (modifiers, annotations) = self.take_modifiers();
        let name = self.expect_name("variable name")?;
        if self.used_names.iter().any(|n| n == &name) {
            self.error(
                format!("duplicate variable name `{name}`"),
                self.last_span,
            );
        }
        let mut declared_type = None;
        if self.at_symbol(":") {
            self.advance();
            declared_type = Some(self.parse_type_name()?);
        }
        let mut init = None;
        if self.at_symbol("=") {
            self.advance();
            init = Some(self.parse_expression()?);
        }
        self.used_names.push(name.clone());
        self.finish_stmt(
            StmtKind::VarDef {
                name,
                mutable,
                declared_type,
                init,
                modifiers,
                annotations,
            },
            start,
        )
    }

    /// Generic expression statement, with the contextual
    /// definition-vs-assignment rule for `name = value`.
    fn parse_expression_statement(&mut self, start: Span) -> PResult<Stmt> {
        let had_pending =
            !self.pending_modifiers.is_empty() || !self.pending_annotations.is_empty();
        let expr = self.parse_expression()?;

        if self.at_symbol("=") {
            self.advance();
            let value = self.parse_expression()?;
            let span = start.merge(self.last_span);

            if let Some(name) = expr.as_bare_name() {
                let name = name.to_string();
                let is_new = !self.used_names.iter().any(|n| n == &name);
                if had_pending || is_new {
                    let (modifiers, annotations) = self.take_modifiers();
                    self.used_names.push(name.clone());
                    self.expect_statement_end()?;
                    return Ok(Stmt {
                        kind: StmtKind::VarDef {
                            name,
                            mutable: true,
                            declared_type: None,
                            init: Some(value),
                            modifiers,
                            annotations,
                        },
                        span,
                    });
                }
            }
            self.assert_no_pending("assignments");
            self.expect_statement_end()?;
            return Ok(Stmt {
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
                span,
            });
        }

        self.assert_no_pending("expression statements");
        self.expect_statement_end()?;
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            span: start.merge(self.last_span),
        })
    }

    // -- blocks and small helpers -------------------------------------------

    fn body_follows(&self) -> bool {
        if self.at_layer() || self.at_symbol("->") {
            return true;
        }
        // a weak ending separates a header line from its indented block
        matches!(
            self.peek_past_endings()
                .map(|id| &self.tree.node(id).payload),
            Some(NodePayload::LayerStart { .. })
        )
    }

    /// Parses a construct body: either an arrow layer (`-> ...`) or an
    /// indented layer that directly follows.
    fn parse_body(&mut self) -> PResult<Vec<Stmt>> {
        self.parse_body_with_names(Vec::new())
    }

    fn parse_body_with_names(&mut self, extra_names: Vec<String>) -> PResult<Vec<Stmt>> {
        if self.at_symbol("->") {
            self.advance();
        }
        while self.at_ending().is_some() && {
            // a weak ending may sit between the header and its block
            matches!(
                self.peek_past_endings()
                    .map(|id| &self.tree.node(id).payload),
                Some(NodePayload::LayerStart { .. })
            )
        } {
            self.advance();
        }
        let Some(layer) = self.peek().filter(|_| self.at_layer()) else {
            self.error_here("expected an indented block or `->`");
            return Err(Flow::AbandonStatement);
        };
        self.advance();

        let mut names = self.used_names.clone();
        names.extend(extra_names);
        let mut child = Parser::new(self.tree, layer, names, false);
        let statements = child.parse_layer();
        self.diagnostics.append(&mut child.diagnostics);
        Ok(statements)
    }

    fn expect_name(&mut self, what: &str) -> PResult<String> {
        match self.peek_element() {
            Some(e) if e.kind == TokenKind::Ident => {
                let name = e.name().to_string();
                self.advance();
                Ok(name)
            }
            Some(_) => {
                self.error_here(format!("expected {what}"));
                Err(Flow::AbandonStatement)
            }
            None => {
                self.error_here(format!("unexpected end, expected {what}"));
                Err(Flow::UnexpectedEnd)
            }
        }
    }

    fn parse_dotted_path(&mut self) -> PResult<Vec<String>> {
        let mut path = vec![self.expect_name("a name")?];
        while self.at_symbol(".") {
            self.advance();
            path.push(self.expect_name("a name")?);
        }
        Ok(path)
    }

    fn parse_type_name(&mut self) -> PResult<String> {
        Ok(self.parse_dotted_path()?.join("."))
    }

    fn parse_annotation(&mut self) -> PResult<Annotation> {
        let start = self
            .peek()
            .map(|id| self.node_span(id))
            .unwrap_or(self.last_span);
        self.advance(); // "@"
        let name = self.expect_name("annotation name")?;
        let mut args = Vec::new();
        if self.at_symbol("(") {
            self.advance();
            if !self.at_layer() {
                self.error_here("expected annotation arguments");
                return Err(Flow::AbandonStatement);
            }
            let layer = self.peek().ok_or(Flow::AbandonStatement)?;
            self.advance();
            while self.at_ending().is_some() {
                self.advance();
            }
            if !self.at_symbol(")") {
                self.error_here("expected `)` after annotation arguments");
                return Err(Flow::AbandonStatement);
            }
            self.advance();

            let mut child = self.child(layer, false);
            args = child.parse_named_pairs();
            self.diagnostics.append(&mut child.diagnostics);
        }
        Ok(Annotation {
            name,
            args,
            span: start.merge(self.last_span),
        })
    }

    /// `name = expr, ...` pairs inside annotation arguments.
    fn parse_named_pairs(&mut self) -> Vec<(String, Expr)> {
        let mut pairs = Vec::new();
        loop {
            while self.at_ending().is_some() || self.at_symbol(",") {
                self.advance();
            }
            if self.peek().is_none() {
                break;
            }
            let Ok(name) = self.expect_name("argument name") else {
                self.recover();
                continue;
            };
            if !self.at_symbol("=") {
                self.error_here("expected `=` in annotation argument");
                self.recover();
                continue;
            }
            self.advance();
            match self.parse_expression() {
                Ok(value) => pairs.push((name, value)),
                Err(_) => self.recover(),
            }
        }
        pairs
    }

    // -- expressions: precedence climbing ------------------------------------

    fn parse_expression(&mut self) -> PResult<Expr> {
        let mut expr_stack: Vec<Expr> = Vec::new();
        let mut op_stack: Vec<PendingOp> = Vec::new();

        loop {
            // operand position
            let operand = self.parse_operand()?;
            let operand = self.parse_postfix(operand)?;
            expr_stack.push(operand);

            // operator position
            let Some(op) = self.peek_binary_op() else {
                break;
            };

            if let OpKind::Named(name) = &op.kind {
                // A named operator with no following operand is a
                // zero-argument call applied immediately.
                if !self.operand_follows_after(1) {
                    self.advance(); // the identifier
                    let lhs = expr_stack.pop().ok_or(Flow::UnexpectedEnd)?;
                    expr_stack.push(make_named_call(lhs, name.clone(), None, op.span));
                    if self.peek_binary_op().is_none() {
                        break;
                    }
                    continue;
                }
            }

            // Resolve pending operators that bind at least as tightly,
            // unless a prefix operation is still pending.
            while self.unary_stack.is_empty()
                && op_stack
                    .last()
                    .is_some_and(|top| top.priority >= op.priority)
            {
                resolve_top(&mut expr_stack, &mut op_stack);
            }
            self.advance(); // the operator token
            op_stack.push(op);
            self.skip_weak_continuation();
        }

        while !op_stack.is_empty() {
            resolve_top(&mut expr_stack, &mut op_stack);
        }
        debug_assert_eq!(expr_stack.len(), 1, "climbing must leave one expression");
        expr_stack.pop().ok_or(Flow::UnexpectedEnd)
    }

    /// The next binary operator, if the cursor is at one. Does not
    /// consume. Weak endings followed by an operator are bridged.
    fn peek_binary_op(&mut self) -> Option<PendingOp> {
        if self.at_ending() == Some(EndingKind::Weak) {
            // `a +\n b` continues; `a\n + b` also continues. Bridge the
            // weak ending only when an operator follows it.
            let next = self.peek_past_endings()?;
            let element = self.tree.element(next)?;
            let is_op = match element.kind {
                TokenKind::Symbol | TokenKind::Keyword => binary_priority(&element.text).is_some(),
                _ => false,
            };
            if !is_op {
                return None;
            }
            while self.at_ending() == Some(EndingKind::Weak) {
                self.advance();
            }
        }

        let element = self.peek_element()?;
        match element.kind {
            TokenKind::Symbol | TokenKind::Keyword => {
                let priority = binary_priority(&element.text)?;
                Some(PendingOp {
                    kind: OpKind::Symbolic(element.text.clone()),
                    priority,
                    span: self.node_span(self.peek()?),
                })
            }
            TokenKind::Ident => {
                // Operator-style invocation: a bare identifier after a
                // parsed expression acts as a method in operator position.
                Some(PendingOp {
                    kind: OpKind::Named(element.name().to_string()),
                    priority: NAMED_OP_PRIORITY,
                    span: self.node_span(self.peek()?),
                })
            }
            _ => None,
        }
    }

    /// True if an operand begins `offset` nodes ahead of the cursor.
    fn operand_follows_after(&self, offset: usize) -> bool {
        let mut cursor = self.cursor;
        for _ in 0..offset {
            cursor = cursor.and_then(|id| self.tree.node(id).next);
        }
        let Some(id) = cursor else { return false };
        match &self.tree.node(id).payload {
            NodePayload::Ending(_) => false,
            NodePayload::LayerStart { .. } => false,
            NodePayload::Element(e) => match e.kind {
                TokenKind::Symbol => {
                    matches!(e.text.as_str(), "(" | "[" | "{") || PREFIX_OPS.contains(&e.text.as_str())
                }
                TokenKind::Keyword => matches!(e.text.as_str(), "new" | "null" | "fn"),
                _ => true,
            },
        }
    }

    /// After pushing a binary operator, a weak ending may separate it
    /// from its right-hand operand.
    fn skip_weak_continuation(&mut self) {
        while self.at_ending() == Some(EndingKind::Weak)
            && self.peek_past_endings().is_some()
        {
            self.advance();
        }
    }

    fn parse_operand(&mut self) -> PResult<Expr> {
        // Weak endings inside a pending expression are bridged.
        while self.at_ending() == Some(EndingKind::Weak) && self.peek_past_endings().is_some() {
            self.advance();
        }

        let Some(id) = self.peek() else {
            self.error_here("unexpected end of expression");
            return Err(Flow::UnexpectedEnd);
        };
        let span = self.node_span(id);

        match &self.tree.node(id).payload {
            NodePayload::Ending(_) => {
                self.error_here("unexpected end of expression");
                Err(Flow::UnexpectedEnd)
            }
            NodePayload::LayerStart { .. } => {
                self.error_here("expected an expression, found a block");
                Err(Flow::AbandonStatement)
            }
            NodePayload::Element(element) => {
                let text = element.text.clone();
                match element.kind {
                    TokenKind::Number => {
                        self.advance();
                        Ok(Expr::new(ExprKind::NumberLit(text), span))
                    }
                    TokenKind::Bool => {
                        self.advance();
                        Ok(Expr::new(ExprKind::BoolLit(text == "true"), span))
                    }
                    TokenKind::Str => {
                        self.advance();
                        Ok(Expr::new(ExprKind::StringLit(strip_quotes(&text)), span))
                    }
                    TokenKind::Char => {
                        self.advance();
                        Ok(Expr::new(ExprKind::CharLit(strip_quotes(&text)), span))
                    }
                    TokenKind::Regex => {
                        self.advance();
                        let inner = text
                            .strip_prefix("r`")
                            .and_then(|t| t.strip_suffix('`'))
                            .unwrap_or(&text)
                            .to_string();
                        Ok(Expr::new(ExprKind::RegexLit(inner), span))
                    }
                    TokenKind::Ident => {
                        let name = element.name().to_string();
                        self.advance();
                        Ok(Expr::new(ExprKind::Access { target: None, name }, span))
                    }
                    TokenKind::Keyword => self.parse_keyword_operand(&text, span),
                    TokenKind::Modifier => {
                        self.error_here(format!("`{text}` is not valid in an expression"));
                        Err(Flow::AbandonStatement)
                    }
                    TokenKind::Symbol => self.parse_symbol_operand(&text, span),
                }
            }
        }
    }

    fn parse_keyword_operand(&mut self, word: &str, span: Span) -> PResult<Expr> {
        match word {
            "null" => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, span))
            }
            "new" => {
                self.advance();
                let type_name = self.parse_type_name()?;
                let mut args = Vec::new();
                if self.at_symbol("(") {
                    let (positional, named) = self.parse_call_args()?;
                    if !named.is_empty() {
                        self.error_here("constructor calls take positional arguments");
                    }
                    args = positional;
                }
                Ok(Expr::new(
                    ExprKind::New { type_name, args },
                    span.merge(self.last_span),
                ))
            }
            "fn" => self.parse_lambda(span),
            _ => {
                self.error_here(format!("`{word}` cannot start an expression"));
                Err(Flow::AbandonStatement)
            }
        }
    }

    /// `fn (params) -> body` or `fn -> body` in operand position.
    fn parse_lambda(&mut self, span: Span) -> PResult<Expr> {
        self.advance(); // fn
        let params = if self.at_symbol("(") {
            self.parse_param_list()?
        } else {
            Vec::new()
        };
        let names = params.iter().map(|p| p.name.clone()).collect();
        let body = self.parse_body_with_names(names)?;
        Ok(Expr::new(
            ExprKind::Lambda { params, body },
            span.merge(self.last_span),
        ))
    }

    fn parse_symbol_operand(&mut self, symbol: &str, span: Span) -> PResult<Expr> {
        if PREFIX_OPS.contains(&symbol) {
            self.unary_stack.push(symbol.to_string());
            self.advance();
            let result = self
                .parse_operand()
                .and_then(|operand| self.parse_postfix(operand));
            let op = self.unary_stack.pop().unwrap_or_else(|| symbol.to_string());
            let operand = result?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    prefix: true,
                    operand: Box::new(operand),
                },
                span.merge(self.last_span),
            ));
        }
        match symbol {
            "(" => {
                self.advance();
                if !self.at_layer() {
                    self.error_here("expected an expression after `(`");
                    return Err(Flow::AbandonStatement);
                }
                let layer = self.peek().ok_or(Flow::AbandonStatement)?;
                self.advance();
                while self.at_ending().is_some() {
                    self.advance();
                }
                if !self.at_symbol(")") {
                    self.error_here("expected `)`");
                    return Err(Flow::AbandonStatement);
                }
                self.advance();

                let mut child = self.child(layer, false);
                child.skip_leading_endings();
                let inner = child.parse_expression();
                self.diagnostics.append(&mut child.diagnostics);
                inner
            }
            "[" => {
                let items = self.parse_bracket_items()?;
                Ok(Expr::new(
                    ExprKind::ArrayLit(items),
                    span.merge(self.last_span),
                ))
            }
            "{" => {
                let entries = self.parse_map_entries()?;
                Ok(Expr::new(
                    ExprKind::MapLit(entries),
                    span.merge(self.last_span),
                ))
            }
            _ => {
                self.error_here(format!("unexpected token `{symbol}`"));
                Err(Flow::AbandonStatement)
            }
        }
    }

    fn skip_leading_endings(&mut self) {
        while self.at_ending().is_some() {
            self.advance();
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> PResult<Expr> {
        loop {
            if self.at_symbol(".") {
                self.advance();
                let name = self.expect_name("a member name")?;
                let span = expr.span.merge(self.last_span);
                expr = Expr::new(
                    ExprKind::Access {
                        target: Some(Box::new(expr)),
                        name,
                    },
                    span,
                );
                continue;
            }
            if self.at_symbol("(") {
                let (args, named_args) = self.parse_call_args()?;
                let span = expr.span.merge(self.last_span);
                expr = Expr::new(
                    ExprKind::Invocation {
                        target: Box::new(expr),
                        args,
                        named_args,
                    },
                    span,
                );
                continue;
            }
            if self.at_symbol("[") {
                let args = self.parse_bracket_items()?;
                let span = expr.span.merge(self.last_span);
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        args,
                    },
                    span,
                );
                continue;
            }
            if self.at_symbol("++") || self.at_symbol("--") {
                let op = if self.at_symbol("++") { "++" } else { "--" }.to_string();
                self.advance();
                let span = expr.span.merge(self.last_span);
                expr = Expr::new(
                    ExprKind::Unary {
                        op,
                        prefix: false,
                        operand: Box::new(expr),
                    },
                    span,
                );
                continue;
            }
            if self.at_keyword("as") {
                self.advance();
                let target_type = self.parse_type_name()?;
                let span = expr.span.merge(self.last_span);
                expr = Expr::new(
                    ExprKind::Cast {
                        expr: Box::new(expr),
                        target_type,
                    },
                    span,
                );
                continue;
            }
            break;
        }
        Ok(expr)
    }

    /// `( ... )` call arguments: positional and `name = value` pairs.
    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.advance(); // "("
        if !self.at_layer() {
            self.error_here("expected call arguments");
            return Err(Flow::AbandonStatement);
        }
        let layer = self.peek().ok_or(Flow::AbandonStatement)?;
        self.advance();
        while self.at_ending().is_some() {
            self.advance();
        }
        if !self.at_symbol(")") {
            self.error_here("expected `)` after arguments");
            return Err(Flow::AbandonStatement);
        }
        self.advance();

        let mut child = self.child(layer, false);
        let result = child.parse_args_inner();
        self.diagnostics.append(&mut child.diagnostics);
        Ok(result)
    }

    fn parse_args_inner(&mut self) -> (Vec<Expr>, Vec<(String, Expr)>) {
        let mut args = Vec::new();
        let mut named = Vec::new();
        loop {
            while self.at_ending().is_some() || self.at_symbol(",") {
                self.advance();
            }
            if self.peek().is_none() {
                break;
            }
            let Ok(expr) = self.parse_expression() else {
                self.recover();
                continue;
            };
            if self.at_symbol("=") {
                self.advance();
                match (expr.as_bare_name(), self.parse_expression()) {
                    (Some(name), Ok(value)) => named.push((name.to_string(), value)),
                    (None, Ok(_)) => {
                        self.error("argument name must be a bare identifier", expr.span)
                    }
                    (_, Err(_)) => {
                        self.recover();
                        continue;
                    }
                }
            } else {
                if !named.is_empty() {
                    self.error(
                        "positional arguments cannot follow named arguments",
                        expr.span,
                    );
                }
                args.push(expr);
            }
        }
        (args, named)
    }

    /// `[ ... ]` items for array literals and index access.
    fn parse_bracket_items(&mut self) -> PResult<Vec<Expr>> {
        self.advance(); // "["
        if !self.at_layer() {
            self.error_here("expected `]`");
            return Err(Flow::AbandonStatement);
        }
        let layer = self.peek().ok_or(Flow::AbandonStatement)?;
        self.advance();
        while self.at_ending().is_some() {
            self.advance();
        }
        if !self.at_symbol("]") {
            self.error_here("expected `]`");
            return Err(Flow::AbandonStatement);
        }
        self.advance();

        let mut child = self.child(layer, false);
        let mut items = Vec::new();
        loop {
            while child.at_ending().is_some() || child.at_symbol(",") {
                child.advance();
            }
            if child.peek().is_none() {
                break;
            }
            match child.parse_expression() {
                Ok(expr) => items.push(expr),
                Err(_) => child.recover(),
            }
        }
        self.diagnostics.append(&mut child.diagnostics);
        Ok(items)
    }

    /// `{ k : v, ... }` map-literal entries, parsed in map mode so `:`
    /// separates keys from values.
    fn parse_map_entries(&mut self) -> PResult<Vec<(Expr, Expr)>> {
        self.advance(); // "{"
        if !self.at_layer() {
            self.error_here("expected `}`");
            return Err(Flow::AbandonStatement);
        }
        let layer = self.peek().ok_or(Flow::AbandonStatement)?;
        self.advance();
        while self.at_ending().is_some() {
            self.advance();
        }
        if !self.at_symbol("}") {
            self.error_here("expected `}`");
            return Err(Flow::AbandonStatement);
        }
        self.advance();

        let mut child = self.child(layer, true);
        let mut entries = Vec::new();
        loop {
            while child.at_ending().is_some() || child.at_symbol(",") {
                child.advance();
            }
            if child.peek().is_none() {
                break;
            }
            let Ok(key) = child.parse_expression() else {
                child.recover();
                continue;
            };
            if !child.at_symbol(":") {
                child.error_here("expected `:` between map key and value");
                child.recover();
                continue;
            }
            child.advance();
            match child.parse_expression() {
                Ok(value) => entries.push((key, value)),
                Err(_) => child.recover(),
            }
        }
        self.diagnostics.append(&mut child.diagnostics);
        Ok(entries)
    }
}

fn strip_quotes(text: &str) -> String {
    let mut chars = text.chars();
    let first = chars.next();
    let inner: &str = match first {
        Some(q @ ('"' | '\'')) => {
            let rest = &text[q.len_utf8()..];
            rest.strip_suffix(q).unwrap_or(rest)
        }
        _ => text,
    };
    inner.to_string()
}

/// Pops one pending operator and its two operands, pushing the
/// resolved expression. Named operators resolve to method calls.
fn resolve_top(expr_stack: &mut Vec<Expr>, op_stack: &mut Vec<PendingOp>) {
    let (Some(op), Some(right), Some(left)) = (op_stack.pop(), expr_stack.pop(), expr_stack.pop())
    else {
        return;
    };
    let span = left.span.merge(right.span);
    let resolved = match op.kind {
        OpKind::Symbolic(text) => Expr::new(
            ExprKind::Binary {
                op: text,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        ),
        OpKind::Named(name) => make_named_call(left, name, Some(right), op.span),
    };
    expr_stack.push(resolved);
}

/// Builds `target.name(arg?)` for operator-style invocation.
fn make_named_call(target: Expr, name: String, arg: Option<Expr>, op_span: Span) -> Expr {
    let span = match &arg {
        Some(a) => target.span.merge(a.span),
        None => target.span.merge(op_span),
    };
    let access = Expr::new(
        ExprKind::Access {
            target: Some(Box::new(target)),
            name,
        },
        op_span,
    );
    Expr::new(
        ExprKind::Invocation {
            target: Box::new(access),
            args: arg.into_iter().collect(),
            named_args: Vec::new(),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::diagnostic::any_errors;
    use crate::scanner::scan;
    use crate::span::FileId;

    fn parse_source(source: &str) -> ParseResult {
        let scanned = scan(FileId(0), source, &ScanConfig::default()).expect("scan");
        assert!(
            !any_errors(&scanned.diagnostics),
            "scan errors: {:?}",
            scanned.diagnostics
        );
        parse(&scanned.tree, scanned.tree.root())
    }

    fn parse_one_expr(source: &str) -> Expr {
        let result = parse_source(source);
        assert!(
            !any_errors(&result.diagnostics),
            "parse errors: {:?}",
            result.diagnostics
        );
        assert_eq!(result.statements.len(), 1, "{:?}", result.statements);
        match &result.statements[0].kind {
            StmtKind::Expr(expr) => expr.clone(),
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    fn binary_shape(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", binary_shape(left), op, binary_shape(right))
            }
            ExprKind::NumberLit(text) => text.clone(),
            ExprKind::Access { target: None, name } => name.clone(),
            ExprKind::Invocation { target, args, .. } => {
                let inner: Vec<String> = args.iter().map(binary_shape).collect();
                format!("{}({})", binary_shape(target), inner.join(","))
            }
            ExprKind::Access {
                target: Some(t),
                name,
            } => format!("{}.{}", binary_shape(t), name),
            ExprKind::Unary {
                op,
                prefix: true,
                operand,
            } => format!("({op}{})", binary_shape(operand)),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_one_expr("1 + 2 * 3\n");
        assert_eq!(binary_shape(&expr), "(1 + (2 * 3))");

        let expr = parse_one_expr("1 * 2 + 3 * 4\n");
        assert_eq!(binary_shape(&expr), "((1 * 2) + (3 * 4))");
    }

    #[test]
    fn same_priority_is_left_associative() {
        let expr = parse_one_expr("1 - 2 - 3\n");
        assert_eq!(binary_shape(&expr), "((1 - 2) - 3)");

        let expr = parse_one_expr("8 / 4 / 2\n");
        assert_eq!(binary_shape(&expr), "((8 / 4) / 2)");
    }

    #[test]
    fn full_priority_ladder() {
        let expr = parse_one_expr("1 | 2 ^ 3 & 4 == 5 << 6 + 7 * 8\n");
        assert_eq!(
            binary_shape(&expr),
            "(1 | (2 ^ (3 & (4 == (5 << (6 + (7 * 8)))))))"
        );
    }

    #[test]
    fn logical_operators_bind_loosest() {
        let expr = parse_one_expr("a == b and c == d or e\n");
        assert_eq!(binary_shape(&expr), "(((a == b) and (c == d)) or e)");
    }

    #[test]
    fn word_form_relational_operators() {
        let expr = parse_one_expr("x in xs and y is z\n");
        assert_eq!(binary_shape(&expr), "((x in xs) and (y is z))");
    }

    #[test]
    fn prefix_unary_binds_tightest() {
        let expr = parse_one_expr("-a * b\n");
        assert_eq!(binary_shape(&expr), "((-a) * b)");

        let expr = parse_one_expr("a + -b * c\n");
        assert_eq!(binary_shape(&expr), "(a + ((-b) * c))");
    }

    #[test]
    fn operator_style_invocation_one_arg() {
        let expr = parse_one_expr("a foo b\n");
        assert_eq!(binary_shape(&expr), "a.foo(b)");
    }

    #[test]
    fn operator_style_invocation_matches_explicit_call() {
        let implicit = parse_one_expr("a foo b\n");
        let explicit = parse_one_expr("a.foo(b)\n");
        assert_eq!(binary_shape(&implicit), binary_shape(&explicit));
    }

    #[test]
    fn operator_style_invocation_zero_args() {
        let expr = parse_one_expr("a size\n");
        assert_eq!(binary_shape(&expr), "a.size()");
    }

    #[test]
    fn named_operator_obeys_priority() {
        // named ops bind at the concatenation level, above `+`
        let expr = parse_one_expr("a plus b + c\n");
        assert_eq!(binary_shape(&expr), "(a.plus(b) + c)");
    }

    #[test]
    fn parenthesized_expression_overrides_priority() {
        let expr = parse_one_expr("(1 + 2) * 3\n");
        assert_eq!(binary_shape(&expr), "((1 + 2) * 3)");
    }

    #[test]
    fn weak_ending_bridged_when_operator_continues() {
        let result = parse_source("val x = 1 +\n2\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert_eq!(result.statements.len(), 1);
    }

    #[test]
    fn strong_ending_is_never_crossed() {
        let result = parse_source("x; + 2\n");
        // `+ 2` alone is a unary expression statement, so both parse,
        // proving the strong ending split them.
        assert_eq!(result.statements.len(), 2);
    }

    #[test]
    fn val_definition_with_initializer() {
        let result = parse_source("val x = 1 + 2\n");
        assert!(!any_errors(&result.diagnostics));
        assert_eq!(result.statements.len(), 1);
        match &result.statements[0].kind {
            StmtKind::VarDef {
                name,
                mutable,
                init,
                ..
            } => {
                assert_eq!(name, "x");
                assert!(!mutable);
                assert!(init.is_some());
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_val_is_reported() {
        let result = parse_source("val x = 1\nval x = 2\n");
        assert!(any_errors(&result.diagnostics));
    }

    #[test]
    fn bare_assignment_defines_then_assigns() {
        let result = parse_source("x = 1\nx = 2\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert_eq!(result.statements.len(), 2);
        assert!(matches!(
            result.statements[0].kind,
            StmtKind::VarDef { .. }
        ));
        assert!(matches!(result.statements[1].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn assignment_to_member_is_not_a_definition() {
        let result = parse_source("val o = new Box()\no.value = 1\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert!(matches!(result.statements[1].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn if_elseif_else_chain() {
        let source = "if a\n    x = 1\nelseif b\n    x = 2\nelse\n    x = 3\n";
        let result = parse_source(source);
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert_eq!(result.statements.len(), 1);
        match &result.statements[0].kind {
            StmtKind::If {
                branches,
                else_body,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn arrow_bodies_parse_like_blocks() {
        let result = parse_source("if a -> x = 1\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::If { branches, .. } => assert_eq!(branches[0].body.len(), 1),
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn while_and_do_while() {
        let result = parse_source("while a\n    b()\n");
        assert!(matches!(
            result.statements[0].kind,
            StmtKind::While {
                do_while: false,
                ..
            }
        ));

        let result = parse_source("do\n    b()\nwhile a\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert!(matches!(
            result.statements[0].kind,
            StmtKind::While { do_while: true, .. }
        ));
    }

    #[test]
    fn for_in_loop() {
        let result = parse_source("for item in items\n    use(item)\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::For {
                binding, body, ..
            } => {
                assert_eq!(binding, "item");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn try_catch_finally() {
        let source = "try\n    risky()\ncatch e : java.io.IOException\n    handle(e)\nfinally\n    cleanup()\n";
        let result = parse_source(source);
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::Try {
                catches, finally, ..
            } => {
                assert_eq!(catches.len(), 1);
                assert_eq!(catches[0].exception_types, vec!["java.io.IOException"]);
                assert_eq!(finally.len(), 1);
            }
            other => panic!("expected Try, got {other:?}"),
        }
    }

    #[test]
    fn class_with_params_and_super() {
        let source = "class Point(x, y) : Base\n    fn norm()\n        return x\n";
        let result = parse_source(source);
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::ClassDef {
                name,
                params,
                supers,
                body,
                ..
            } => {
                assert_eq!(name, "Point");
                assert_eq!(params.len(), 2);
                assert_eq!(supers, &vec!["Base".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected ClassDef, got {other:?}"),
        }
    }

    #[test]
    fn modifiers_attach_to_definitions() {
        let result = parse_source("public static val x = 1\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::VarDef { modifiers, .. } => {
                assert_eq!(modifiers, &vec![Modifier::Public, Modifier::Static]);
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
    }

    #[test]
    fn modifiers_on_plain_statements_are_an_error() {
        let result = parse_source("public if a -> x = 1\n");
        assert!(any_errors(&result.diagnostics));
        // recovered: the if statement itself still parses
        assert!(result
            .statements
            .iter()
            .any(|s| matches!(s.kind, StmtKind::If { .. })));
    }

    #[test]
    fn annotations_accumulate_onto_next_definition() {
        let result = parse_source("@Deprecated\nval x = 1\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        match &result.statements[0].kind {
            StmtKind::VarDef { annotations, .. } => {
                assert_eq!(annotations.len(), 1);
                assert_eq!(annotations[0].name, "Deprecated");
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
    }

    #[test]
    fn method_definition_forms() {
        let source = "\
fn empty() = pass
fn doubled(x) = x * 2
fn typed(x) : Int
    return x
plain(y)
    return y
";
        let result = parse_source(source);
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert_eq!(result.statements.len(), 4);
        for stmt in &result.statements {
            assert!(matches!(stmt.kind, StmtKind::FnDef { .. }), "{stmt:?}");
        }
        match &result.statements[2].kind {
            StmtKind::FnDef { return_type, .. } => {
                assert_eq!(return_type.as_deref(), Some("Int"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn bare_call_is_not_a_method_definition() {
        let result = parse_source("val a = 1\nfoo(a)\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert!(matches!(result.statements[1].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn named_call_arguments() {
        let expr = parse_one_expr("f(1, mode = 2)\n");
        match expr.kind {
            ExprKind::Invocation {
                args, named_args, ..
            } => {
                assert_eq!(args.len(), 1);
                assert_eq!(named_args.len(), 1);
                assert_eq!(named_args[0].0, "mode");
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn array_map_and_index() {
        let expr = parse_one_expr("[1, 2, 3]\n");
        assert!(matches!(expr.kind, ExprKind::ArrayLit(items) if items.len() == 3));

        let expr = parse_one_expr("{1 : 2, 3 : 4}\n");
        assert!(matches!(expr.kind, ExprKind::MapLit(entries) if entries.len() == 2));

        let expr = parse_one_expr("xs[0]\n");
        assert!(matches!(expr.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn lambda_literal() {
        let expr = parse_one_expr("fn (x) -> x + 1\n");
        match expr.kind {
            ExprKind::Lambda { params, body } => {
                assert_eq!(params.len(), 1);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected Lambda, got {other:?}"),
        }
    }

    #[test]
    fn cast_with_as() {
        let expr = parse_one_expr("x as java.lang.Long\n");
        assert!(
            matches!(expr.kind, ExprKind::Cast { target_type, .. } if target_type == "java.lang.Long")
        );
    }

    #[test]
    fn package_and_import() {
        let result = parse_source("package demo.app\nimport java.util\n");
        assert!(!any_errors(&result.diagnostics), "{:?}", result.diagnostics);
        assert!(matches!(&result.statements[0].kind, StmtKind::Package(p) if p.len() == 2));
        assert!(matches!(&result.statements[1].kind, StmtKind::Import(p) if p.len() == 2));
    }

    #[test]
    fn malformed_statement_recovers_at_ending() {
        let result = parse_source("val = 1\nval y = 2\n");
        assert!(any_errors(&result.diagnostics));
        // the second statement still parses
        assert!(result
            .statements
            .iter()
            .any(|s| matches!(&s.kind, StmtKind::VarDef { name, .. } if name == "y")));
    }

    #[test]
    fn unexpected_end_is_reported() {
        let result = parse_source("val x = 1 +\n");
        assert!(any_errors(&result.diagnostics));
    }

    #[test]
    fn end_to_end_scenario_statement_shape() {
        // `val x = 1 + 2` at depth 0
        let result = parse_source("val x = 1 + 2\n");
        assert!(!any_errors(&result.diagnostics));
        assert_eq!(result.statements.len(), 1);
        match &result.statements[0].kind {
            StmtKind::VarDef { name, init, .. } => {
                assert_eq!(name, "x");
                let init = init.as_ref().expect("initializer");
                assert_eq!(binary_shape(init), "(1 + 2)");
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
    }
}
