//! Core compiler pipeline for the Quill language.
//!
//! The pipeline is roughly:
//!
//!   source .ql
//!     -> scanner    (layered token tree)
//!     -> parser     (statement/expression AST)
//!     -> lowering   (typed instruction model)
//!     -> codegen    (JVM class files)
//!
//! Higher-level tools (CLI, build integrations) should depend on this
//! crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: scanning and parsing
// ---------------------------------------------------------------------

pub mod config;
pub mod token;
pub mod scanner;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Back-end: instruction model, frames, class files
// ---------------------------------------------------------------------

pub mod ir;
pub mod scope;
pub mod frame;
pub mod classfile;
pub mod codegen;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{compile_source, compile_to_class, FrontendArtifact};
pub use config::ScanConfig;
pub use error::CoreError;
