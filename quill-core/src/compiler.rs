//! Front-to-back driver.
//!
//! `compile_source` runs the scanner and parser and hands back the
//! artifacts with merged diagnostics; `compile_to_class` continues
//! through the demo lowering into class bytes. The lowering covers the
//! arithmetic/local-variable subset end to end; statements outside it
//! fail with `CoreError::Unlowerable` so the caller can fall back to
//! the token or syntax-tree emit modes.

use std::collections::BTreeMap;

use crate::ast::{Expr, ExprKind, Stmt, StmtKind};
use crate::codegen::{self, TypeLookup};
use crate::config::ScanConfig;
use crate::diagnostic::{any_errors, Diagnostic};
use crate::error::CoreError;
use crate::ir::{access, BinOp, Const, Inst, MethodDecl, TypeDecl, TypeRef, UnOp};
use crate::parser;
use crate::scanner;
use crate::scope::ScopeChain;
use crate::span::FileId;
use crate::token::TokenTree;

/// Everything the frontend produced for one source file.
#[derive(Debug)]
pub struct FrontendArtifact {
    pub tree: TokenTree,
    pub statements: Vec<Stmt>,
    /// Scanner diagnostics first, parser diagnostics after.
    pub diagnostics: Vec<Diagnostic>,
    /// How many of `diagnostics` came from the scanner.
    pub scan_diagnostics: usize,
}

impl FrontendArtifact {
    pub fn has_errors(&self) -> bool {
        any_errors(&self.diagnostics)
    }

    fn stage_failure(&self) -> Option<CoreError> {
        let (scan, parse) = self.diagnostics.split_at(self.scan_diagnostics);
        for (stage, is_scan) in [(scan, true), (parse, false)] {
            let errors: Vec<&Diagnostic> = stage.iter().filter(|d| d.is_error()).collect();
            if let Some(first) = errors.first() {
                let count = errors.len();
                let first = first.message.clone();
                return Some(if is_scan {
                    CoreError::ScanFailed { count, first }
                } else {
                    CoreError::ParseFailed { count, first }
                });
            }
        }
        None
    }
}

/// Scans and parses one source file. Scanner and parser diagnostics
/// are merged in stage order.
pub fn compile_source(
    source: &str,
    config: &ScanConfig,
) -> Result<FrontendArtifact, CoreError> {
    let scanned = scanner::scan(FileId(0), source, config)?;
    let mut diagnostics = scanned.diagnostics;
    let scan_diagnostics = diagnostics.len();
    let parsed = parser::parse(&scanned.tree, scanned.tree.root());
    diagnostics.extend(parsed.diagnostics);
    Ok(FrontendArtifact {
        tree: scanned.tree,
        statements: parsed.statements,
        diagnostics,
        scan_diagnostics,
    })
}

/// Runs the whole pipeline and emits class bytes, keyed by internal
/// type name. Frontend errors fail fast with a stage-tagged error.
pub fn compile_to_class(
    class_name: &str,
    source: &str,
    config: &ScanConfig,
) -> Result<(BTreeMap<String, Vec<u8>>, Vec<Diagnostic>), CoreError> {
    let artifact = compile_source(source, config)?;
    if let Some(failure) = artifact.stage_failure() {
        return Err(failure);
    }

    let decl = lower_simple(class_name, &artifact.statements)?;
    let lookup = TypeLookup::from_decls(std::slice::from_ref(&decl));
    let classes = codegen::generate(std::slice::from_ref(&decl), &lookup)
        .map_err(|err| CoreError::Internal(err.to_string()))?;
    Ok((classes, artifact.diagnostics))
}

/// Lowers the arithmetic/local-variable subset into one synthesized
/// type with a static `run` method. `val`/`var` definitions become
/// int locals; everything outside the subset is rejected.
pub fn lower_simple(class_name: &str, statements: &[Stmt]) -> Result<TypeDecl, CoreError> {
    let mut lowering = Lowering {
        scope: ScopeChain::new(class_name, false),
        body: Vec::new(),
    };
    for stmt in statements {
        lowering.lower_stmt(stmt)?;
    }

    let mut decl = TypeDecl::new(class_name);
    decl.methods.push(MethodDecl {
        name: "run".to_string(),
        params: Vec::new(),
        return_type: TypeRef::Int,
        flags: access::PUBLIC | access::STATIC,
        body: Some(lowering.body),
        exception_table: Vec::new(),
        param_slots: 0,
    });
    Ok(decl)
}

struct Lowering {
    scope: ScopeChain,
    body: Vec<Inst>,
}

impl Lowering {
    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        match &stmt.kind {
            StmtKind::VarDef {
                name,
                init: Some(init),
                ..
            } => {
                let value = self.lower_expr(init)?;
                let local = self
                    .scope
                    .declare(name, TypeRef::Int)
                    .ok_or_else(|| CoreError::Unlowerable(format!("redefinition of `{name}`")))?;
                self.body.push(Inst::StoreLocal {
                    slot: local.slot,
                    ty: TypeRef::Int,
                    value: Box::new(value),
                });
                Ok(())
            }
            StmtKind::Assign { target, value } => {
                let name = target.as_bare_name().ok_or_else(|| {
                    CoreError::Unlowerable("assignment to a non-local target".to_string())
                })?;
                let slot = self
                    .scope
                    .lookup(name)
                    .map(|local| local.slot)
                    .ok_or_else(|| {
                        CoreError::Unlowerable(format!("assignment to undefined `{name}`"))
                    })?;
                let value = self.lower_expr(value)?;
                self.body.push(Inst::StoreLocal {
                    slot,
                    ty: TypeRef::Int,
                    value: Box::new(value),
                });
                Ok(())
            }
            StmtKind::Return(Some(expr)) => {
                let value = self.lower_expr(expr)?;
                self.body.push(Inst::Return(Some(Box::new(value))));
                Ok(())
            }
            StmtKind::Return(None) | StmtKind::Pass => Ok(()),
            other => Err(CoreError::Unlowerable(format!(
                "statement {} is outside the arithmetic subset",
                stmt_label(other)
            ))),
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Inst, CoreError> {
        match &expr.kind {
            ExprKind::NumberLit(text) => {
                let value: i32 = text.parse().map_err(|_| {
                    CoreError::Unlowerable(format!("non-integer literal `{text}`"))
                })?;
                Ok(Inst::Const(Const::Int(value)))
            }
            ExprKind::Access { target: None, name } => {
                let local = self.scope.lookup(name).ok_or_else(|| {
                    CoreError::Unlowerable(format!("reference to undefined `{name}`"))
                })?;
                Ok(Inst::LoadLocal {
                    slot: local.slot,
                    ty: TypeRef::Int,
                })
            }
            ExprKind::Binary { op, left, right } => {
                let bin = match op.as_str() {
                    "+" => BinOp::Add,
                    "-" => BinOp::Sub,
                    "*" => BinOp::Mul,
                    "/" => BinOp::Div,
                    "%" => BinOp::Rem,
                    "&" => BinOp::And,
                    "|" => BinOp::Or,
                    "^" => BinOp::Xor,
                    "<<" => BinOp::Shl,
                    ">>" => BinOp::Shr,
                    ">>>" => BinOp::Ushr,
                    other => {
                        return Err(CoreError::Unlowerable(format!(
                            "operator `{other}` is outside the arithmetic subset"
                        )))
                    }
                };
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                Ok(Inst::Binary {
                    op: bin,
                    ty: TypeRef::Int,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            ExprKind::Unary {
                op,
                prefix: true,
                operand,
            } => {
                let inner = self.lower_expr(operand)?;
                match op.as_str() {
                    "-" => Ok(Inst::Unary {
                        op: UnOp::Neg,
                        ty: TypeRef::Int,
                        operand: Box::new(inner),
                    }),
                    "+" => Ok(inner),
                    "~" => Ok(Inst::Unary {
                        op: UnOp::BitNot,
                        ty: TypeRef::Int,
                        operand: Box::new(inner),
                    }),
                    other => Err(CoreError::Unlowerable(format!(
                        "prefix `{other}` is outside the arithmetic subset"
                    ))),
                }
            }
            _ => Err(CoreError::Unlowerable(
                "expression is outside the arithmetic subset".to_string(),
            )),
        }
    }
}

fn stmt_label(kind: &StmtKind) -> &'static str {
    match kind {
        StmtKind::Expr(_) => "expression",
        StmtKind::VarDef { .. } => "definition without initializer",
        StmtKind::Assign { .. } => "assignment",
        StmtKind::If { .. } => "if",
        StmtKind::While { .. } => "while",
        StmtKind::For { .. } => "for",
        StmtKind::Try { .. } => "try",
        StmtKind::Throw(_) => "throw",
        StmtKind::Sync { .. } => "sync",
        StmtKind::ClassDef { .. } => "class",
        StmtKind::InterfaceDef { .. } => "interface",
        StmtKind::FnDef { .. } => "fn",
        StmtKind::Package(_) => "package",
        StmtKind::Import(_) => "import",
        StmtKind::Continue => "continue",
        StmtKind::Break => "break",
        StmtKind::Return(_) => "return",
        StmtKind::Pass => "pass",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile;

    #[test]
    fn frontend_merges_scanner_and_parser_diagnostics() {
        let config = ScanConfig::default();
        let artifact = compile_source("val x = \"open\n", &config).expect("frontend");
        assert!(artifact.has_errors());
    }

    #[test]
    fn compiles_arithmetic_to_class_bytes() {
        let config = ScanConfig::default();
        let source = "val x = 1 + 2 * 3\nval y = x - 4\nreturn y\n";
        let (classes, diagnostics) =
            compile_to_class("demo/Main", source, &config).expect("pipeline");
        assert!(!any_errors(&diagnostics));
        let bytes = classes.get("demo/Main").expect("emitted type");
        assert_eq!(&bytes[0..4], &classfile::MAGIC.to_be_bytes());
        assert_eq!(
            u16::from_be_bytes([bytes[6], bytes[7]]),
            classfile::MAJOR_VERSION
        );
    }

    #[test]
    fn reassignment_reuses_the_slot() {
        let config = ScanConfig::default();
        let source = "var x = 1\nx = x + 1\nreturn x\n";
        let artifact = compile_source(source, &config).expect("frontend");
        assert!(!artifact.has_errors());
        let decl = lower_simple("demo/Main", &artifact.statements).expect("lowering");
        let body = decl.methods[0].body.as_ref().expect("body");
        let stores: Vec<u16> = body
            .iter()
            .filter_map(|inst| match inst {
                Inst::StoreLocal { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![0, 0]);
    }

    #[test]
    fn out_of_subset_statement_is_unlowerable() {
        let config = ScanConfig::default();
        let source = "while 1\n    pass\n";
        let artifact = compile_source(source, &config).expect("frontend");
        assert!(!artifact.has_errors());
        let err = lower_simple("demo/Main", &artifact.statements).unwrap_err();
        assert!(matches!(err, CoreError::Unlowerable(_)));
        assert!(err.to_string().contains("not supported by the demo lowering"));
    }

    #[test]
    fn frontend_errors_fail_the_class_pipeline() {
        let config = ScanConfig::default();
        // scans cleanly, fails in the parser
        let err = compile_to_class("demo/Main", "val x = * 2\n", &config).unwrap_err();
        assert!(matches!(err, CoreError::ParseFailed { .. }));
    }

    #[test]
    fn scanner_errors_are_tagged_with_their_stage() {
        let config = ScanConfig::default();
        let err = compile_to_class("demo/Main", "val x = \"open\n", &config).unwrap_err();
        assert!(matches!(err, CoreError::ScanFailed { .. }));
    }
}
