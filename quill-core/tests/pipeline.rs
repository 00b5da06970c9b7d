//! End-to-end pipeline checks through the public API only.

use quill_core::ast::StmtKind;
use quill_core::classfile;
use quill_core::compiler::lower_simple;
use quill_core::ir::Inst;
use quill_core::{compile_source, compile_to_class, ScanConfig};

#[test]
fn scans_parses_and_lowers_a_definition() {
    let config = ScanConfig::default();
    let artifact = compile_source("val x = 1 + 2\n", &config).expect("frontend");
    assert!(!artifact.has_errors(), "{:?}", artifact.diagnostics);
    assert_eq!(artifact.statements.len(), 1);
    match &artifact.statements[0].kind {
        StmtKind::VarDef { name, mutable, init, .. } => {
            assert_eq!(name, "x");
            assert!(!mutable);
            assert!(init.is_some());
        }
        other => panic!("expected a definition, got {other:?}"),
    }

    let decl = lower_simple("Main", &artifact.statements).expect("lowering");
    let body = decl.methods[0].body.as_ref().expect("body");
    assert!(body
        .iter()
        .any(|inst| matches!(inst, Inst::StoreLocal { slot: 0, .. })));
}

#[test]
fn produces_a_wellformed_class_file() {
    let config = ScanConfig::default();
    let source = "val x = 1 + 2\nval y = x * x\nreturn y\n";
    let (classes, diagnostics) = compile_to_class("Main", source, &config).expect("pipeline");
    assert!(diagnostics.iter().all(|d| !d.is_error()));

    let bytes = classes.get("Main").expect("emitted class");
    assert_eq!(&bytes[0..4], &classfile::MAGIC.to_be_bytes());
    assert_eq!(
        u16::from_be_bytes([bytes[4], bytes[5]]),
        classfile::MINOR_VERSION
    );
    assert_eq!(
        u16::from_be_bytes([bytes[6], bytes[7]]),
        classfile::MAJOR_VERSION
    );
    // the synthesized type carries exactly one method
    assert_eq!(method_count(bytes), 1);
}

/// Walks the class-file structure far enough to read the method count.
fn method_count(bytes: &[u8]) -> u16 {
    let read_u16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let mut at = 8;
    let pool_count = read_u16(at);
    at += 2;
    let mut index = 1;
    while index < pool_count {
        let tag = bytes[at];
        at += 1;
        match tag {
            1 => at += 2 + read_u16(at) as usize,
            3 | 4 | 9 | 10 | 11 | 12 => at += 4,
            7 | 8 => at += 2,
            5 | 6 => {
                at += 8;
                index += 1; // wide entries take two pool slots
            }
            other => panic!("unexpected constant tag {other}"),
        }
        index += 1;
    }
    at += 6; // access flags, this_class, super_class
    let interfaces = read_u16(at);
    at += 2 + interfaces as usize * 2;
    let fields = read_u16(at);
    at += 2;
    for _ in 0..fields {
        at += 6;
        let attributes = read_u16(at);
        at += 2;
        for _ in 0..attributes {
            let length = u32::from_be_bytes([
                bytes[at + 2],
                bytes[at + 3],
                bytes[at + 4],
                bytes[at + 5],
            ]);
            at += 6 + length as usize;
        }
    }
    read_u16(at)
}

#[test]
fn indentation_blocks_survive_the_frontend() {
    let config = ScanConfig::default();
    let source = "if a\n    x = 1\nelse\n    x = 2\n";
    let artifact = compile_source(source, &config).expect("frontend");
    assert!(!artifact.has_errors(), "{:?}", artifact.diagnostics);
    assert_eq!(artifact.statements.len(), 1);
    match &artifact.statements[0].kind {
        StmtKind::If { branches, else_body } => {
            assert_eq!(branches.len(), 1);
            assert_eq!(branches[0].body.len(), 1);
            assert_eq!(else_body.len(), 1);
        }
        other => panic!("expected an if statement, got {other:?}"),
    }
}

#[test]
fn frontend_recovers_and_reports_every_error() {
    let config = ScanConfig::default();
    // two independent bad statements on separate lines
    let source = "val a = * 1\nval b = * 2\nval c = 3\n";
    let artifact = compile_source(source, &config).expect("frontend");
    let errors = artifact.diagnostics.iter().filter(|d| d.is_error()).count();
    assert!(errors >= 2, "{:?}", artifact.diagnostics);
    // the good statement still parses
    assert!(artifact
        .statements
        .iter()
        .any(|s| matches!(&s.kind, StmtKind::VarDef { name, .. } if name == "c")));
}
