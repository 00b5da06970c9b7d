use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("unsupported emit format: {0}")]
    UnsupportedFormat(String),
    #[error("source file was not found at {0}")]
    MissingSource(PathBuf),
    #[error("scanning produced {count} error(s); first: {first}")]
    ScanFailed { count: usize, first: String },
    #[error("parsing produced {count} error(s); first: {first}")]
    ParseFailed { count: usize, first: String },
    #[error("statement is not supported by the demo lowering: {0}")]
    Unlowerable(String),
    #[error("internal compiler invariant violated: {0}")]
    Internal(String),
}
