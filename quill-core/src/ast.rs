//! Surface AST produced by the parser.
//!
//! A closed set of statement and expression variants; expressions are
//! statements too. Every node carries the span of the source it was
//! parsed from. Semantic analysis consumes this tree and produces the
//! typed instruction model in `ir`.

use crate::span::Span;

/// Access modifiers and member flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Internal,
    Static,
    Final,
    Abstract,
    Override,
    Implicit,
}

impl Modifier {
    pub fn from_word(word: &str) -> Option<Modifier> {
        Some(match word {
            "public" => Modifier::Public,
            "private" => Modifier::Private,
            "protected" => Modifier::Protected,
            "internal" => Modifier::Internal,
            "static" => Modifier::Static,
            "final" => Modifier::Final,
            "abstract" => Modifier::Abstract,
            "override" => Modifier::Override,
            "implicit" => Modifier::Implicit,
            _ => return None,
        })
    }
}

/// An annotation use: `@Name` or `@Name(arg = value, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<(String, Expr)>,
    pub span: Span,
}

/// A parameter of a function, constructor, or lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub declared_type: Option<String>,
    pub default: Option<Expr>,
    pub span: Span,
}

/// One `if`/`elseif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

/// One `catch` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub binding: String,
    pub exception_types: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `val`/`var` definition, or a contextual bare definition.
    VarDef {
        name: String,
        mutable: bool,
        declared_type: Option<String>,
        init: Option<Expr>,
        modifiers: Vec<Modifier>,
        annotations: Vec<Annotation>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        branches: Vec<IfBranch>,
        else_body: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        /// True for `do ... while cond`.
        do_while: bool,
    },
    For {
        binding: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Vec<Stmt>,
    },
    Throw(Expr),
    Sync {
        lock: Expr,
        body: Vec<Stmt>,
    },
    ClassDef {
        name: String,
        params: Vec<Param>,
        supers: Vec<String>,
        body: Vec<Stmt>,
        modifiers: Vec<Modifier>,
        annotations: Vec<Annotation>,
    },
    InterfaceDef {
        name: String,
        supers: Vec<String>,
        body: Vec<Stmt>,
        modifiers: Vec<Modifier>,
        annotations: Vec<Annotation>,
    },
    FnDef {
        name: String,
        params: Vec<Param>,
        return_type: Option<String>,
        body: Vec<Stmt>,
        modifiers: Vec<Modifier>,
        annotations: Vec<Annotation>,
    },
    Package(Vec<String>),
    Import(Vec<String>),
    Continue,
    Break,
    Return(Option<Expr>),
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Expr {
        Expr { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer or floating-point literal, kept textual until typing.
    NumberLit(String),
    BoolLit(bool),
    StringLit(String),
    CharLit(String),
    RegexLit(String),
    Null,
    /// `name` or `target.name`; chains fold left, and a package path
    /// prefix is just a chain of accesses resolved later.
    Access {
        target: Option<Box<Expr>>,
        name: String,
    },
    /// Positional or by-name invocation.
    Invocation {
        target: Box<Expr>,
        args: Vec<Expr>,
        named_args: Vec<(String, Expr)>,
    },
    Index {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    ArrayLit(Vec<Expr>),
    MapLit(Vec<(Expr, Expr)>),
    Lambda {
        params: Vec<Param>,
        body: Vec<Stmt>,
    },
    New {
        type_name: String,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target_type: String,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        prefix: bool,
        operand: Box<Expr>,
    },
}

impl Expr {
    /// True for a bare unqualified name.
    pub fn as_bare_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Access { target: None, name } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{FileId, Span};

    #[test]
    fn modifier_words_round_trip() {
        for word in ["public", "static", "final", "override"] {
            assert!(Modifier::from_word(word).is_some(), "{word}");
        }
        assert!(Modifier::from_word("val").is_none());
    }

    #[test]
    fn bare_name_detection() {
        let span = Span::point(FileId(0), 0);
        let bare = Expr::new(
            ExprKind::Access {
                target: None,
                name: "x".into(),
            },
            span,
        );
        assert_eq!(bare.as_bare_name(), Some("x"));

        let qualified = Expr::new(
            ExprKind::Access {
                target: Some(Box::new(bare)),
                name: "y".into(),
            },
            span,
        );
        assert_eq!(qualified.as_bare_name(), None);
    }
}
