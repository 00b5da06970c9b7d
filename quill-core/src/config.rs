//! Scanner configuration.
//!
//! The original design kept delimiter sets and numbering bases in
//! global mutable state; here a single immutable value is threaded
//! through every `scan` call so multiple files can be scanned
//! concurrently.

/// Immutable per-scan configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Number of spaces per indentation level. Must be nonzero.
    pub indent_unit: u32,
    /// Base for user-facing line numbers (typically 1).
    pub line_base: u32,
    /// Base for user-facing column numbers (typically 1).
    pub column_base: u32,
}

impl ScanConfig {
    pub fn new(indent_unit: u32) -> Self {
        ScanConfig {
            indent_unit: indent_unit.max(1),
            line_base: 1,
            column_base: 1,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig::new(4)
    }
}
