//! Token tree produced by the scanner.
//!
//! Indentation does not become INDENT/DEDENT tokens; it becomes
//! structure. A `LayerStart` node owns the first node of a nested
//! layer, and siblings within a layer are chained through
//! previous/next links. The tree is stored in an arena of nodes
//! addressed by `NodeId`, which keeps splicing during normalization
//! O(1) without bidirectional ownership cycles.

use crate::span::Span;

/// Index of a node in a `TokenTree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Classification of an `Element` lexeme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Str,
    Char,
    Regex,
    Bool,
    Keyword,
    Modifier,
    Symbol,
    Ident,
}

/// Kind of a statement/expression separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndingKind {
    /// Written separator; parsing must not cross it implicitly.
    Strong,
    /// Implicit end-of-line; may be bridged when an expression
    /// continues onto the next token.
    Weak,
    /// Inserted during normalization so that every layer's first
    /// real node is preceded by a separator.
    Synthetic,
}

/// A classified lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub text: String,
    pub kind: TokenKind,
}

impl Element {
    /// Checks the lexeme against identifier-escaping rules.
    ///
    /// Plain identifiers are `[A-Za-z_][A-Za-z0-9_$]*`; anything else
    /// must be written backtick-quoted, in which case the quoted text
    /// may be any nonempty run without backticks or line breaks.
    /// Non-identifier elements are always valid. Computed on demand;
    /// the scanner's normalization pass is the only caller that needs
    /// it for every element.
    pub fn is_valid_name(&self) -> bool {
        if self.kind != TokenKind::Ident {
            return true;
        }
        let text = self.text.as_str();
        if let Some(inner) = text.strip_prefix('`') {
            let Some(inner) = inner.strip_suffix('`') else {
                return false;
            };
            return !inner.is_empty() && !inner.contains(['`', '\n', '\r']);
        }
        let mut bytes = text.bytes();
        let Some(first) = bytes.next() else {
            return false;
        };
        if !first.is_ascii_alphabetic() && first != b'_' {
            return false;
        }
        bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
    }

    /// The name an identifier denotes: quoted identifiers with the
    /// backticks stripped, everything else verbatim.
    pub fn name(&self) -> &str {
        self.text
            .strip_prefix('`')
            .and_then(|t| t.strip_suffix('`'))
            .unwrap_or(&self.text)
    }
}

/// Payload of one token-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePayload {
    Element(Element),
    /// A nested layer; exclusively owns its first child node.
    LayerStart {
        /// Indentation depth in spaces; an exact multiple of the
        /// configured unit once scanning has recovered.
        indent: u32,
        child: Option<NodeId>,
    },
    Ending(EndingKind),
}

/// One arena slot: payload plus sibling links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub payload: NodePayload,
    pub span: Span,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

/// The scanner's output: an arena of nodes plus the root layer.
#[derive(Debug, Clone)]
pub struct TokenTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl TokenTree {
    /// Creates a tree holding only an empty root layer at depth 0.
    pub fn new(span: Span) -> Self {
        let root = Node {
            payload: NodePayload::LayerStart {
                indent: 0,
                child: None,
            },
            span,
            prev: None,
            next: None,
        };
        TokenTree {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn alloc(&mut self, payload: NodePayload, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            payload,
            span,
            prev: None,
            next: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.node(id).payload {
            NodePayload::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn first_child(&self, layer: NodeId) -> Option<NodeId> {
        match self.node(layer).payload {
            NodePayload::LayerStart { child, .. } => child,
            _ => None,
        }
    }

    pub fn layer_indent(&self, layer: NodeId) -> u32 {
        match self.node(layer).payload {
            NodePayload::LayerStart { indent, .. } => indent,
            _ => 0,
        }
    }

    fn set_first_child(&mut self, layer: NodeId, first: Option<NodeId>) {
        match &mut self.node_mut(layer).payload {
            NodePayload::LayerStart { child, .. } => *child = first,
            _ => unreachable!("set_first_child on a non-layer node"),
        }
    }

    /// Links `node` directly after `prev` in `prev`'s sibling chain.
    pub fn link_after(&mut self, prev: NodeId, node: NodeId) {
        let old_next = self.node(prev).next;
        self.node_mut(prev).next = Some(node);
        self.node_mut(node).prev = Some(prev);
        self.node_mut(node).next = old_next;
        if let Some(next) = old_next {
            self.node_mut(next).prev = Some(node);
        }
    }

    /// Makes `node` the first child of `layer`, pushing any existing
    /// first child after it.
    pub fn push_front(&mut self, layer: NodeId, node: NodeId) {
        let old_first = self.first_child(layer);
        self.set_first_child(layer, Some(node));
        self.node_mut(node).prev = None;
        self.node_mut(node).next = old_first;
        if let Some(first) = old_first {
            self.node_mut(first).prev = Some(node);
        }
    }

    /// Appends `node` at the end of `layer`'s child chain.
    ///
    /// O(chain length); the scanner keeps per-layer tail cursors and
    /// uses `link_after` instead on the hot path.
    pub fn append_child(&mut self, layer: NodeId, node: NodeId) {
        match self.last_child(layer) {
            Some(last) => self.link_after(last, node),
            None => self.push_front(layer, node),
        }
    }

    pub fn last_child(&self, layer: NodeId) -> Option<NodeId> {
        let mut cursor = self.first_child(layer)?;
        while let Some(next) = self.node(cursor).next {
            cursor = next;
        }
        Some(cursor)
    }

    /// Unlinks `node` from `layer`'s child chain. The node stays in
    /// the arena but is no longer reachable from the tree.
    pub fn unlink(&mut self, layer: NodeId, node: NodeId) {
        let prev = self.node(node).prev;
        let next = self.node(node).next;
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.set_first_child(layer, next),
        }
        if let Some(next) = next {
            self.node_mut(next).prev = prev;
        }
        self.node_mut(node).prev = None;
        self.node_mut(node).next = None;
    }

    /// Iterates the sibling chain of `layer`'s children.
    pub fn children(&self, layer: NodeId) -> ChildIter<'_> {
        ChildIter {
            tree: self,
            cursor: self.first_child(layer),
        }
    }

    /// Renders the tree for `--emit tokens`, one node per line with
    /// two-space indentation per layer.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_layer(self.root, 0, &mut out);
        out
    }

    fn dump_layer(&self, layer: NodeId, depth: usize, out: &mut String) {
        let mut cursor = self.first_child(layer);
        while let Some(id) = cursor {
            for _ in 0..depth {
                out.push_str("  ");
            }
            match &self.node(id).payload {
                NodePayload::Element(element) => {
                    out.push_str(&format!("{:?} {:?}\n", element.kind, element.text));
                }
                NodePayload::Ending(kind) => {
                    out.push_str(&format!("Ending::{kind:?}\n"));
                }
                NodePayload::LayerStart { indent, .. } => {
                    out.push_str(&format!("Layer(indent={indent})\n"));
                    self.dump_layer(id, depth + 1, out);
                }
            }
            cursor = self.node(id).next;
        }
    }
}

/// Iterator over one layer's direct children.
pub struct ChildIter<'tree> {
    tree: &'tree TokenTree,
    cursor: Option<NodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cursor?;
        self.cursor = self.tree.node(id).next;
        Some(id)
    }
}
