//! Source positions for the Quill compiler.
//!
//! Spans are byte ranges into a single source file, identified by a
//! `FileId`. Line/column display is derived lazily through a `LineMap`
//! so that scanner and parser never pay for it on the hot path.

/// Identifies one source file within a compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A byte range within one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: FileId,
    /// Byte offset of the first byte covered.
    pub start: u32,
    /// Byte offset one past the last byte covered.
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Span { file, start, end }
    }

    /// A zero-width span, used for synthesized nodes.
    pub fn point(file: FileId, at: u32) -> Self {
        Span {
            file,
            start: at,
            end: at,
        }
    }

    /// Smallest span covering both `self` and `other`.
    ///
    /// Both spans must refer to the same file.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(self.file, other.file);
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }
}

/// A line/column pair in user-facing numbering.
///
/// The numbering base comes from `ScanConfig`; the compiler defaults
/// to 1-based lines and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

/// Precomputed table of line-start byte offsets for one source file.
///
/// Built once per file; `locate` is a binary search over line starts.
#[derive(Debug, Clone)]
pub struct LineMap {
    line_starts: Vec<u32>,
    line_base: u32,
    column_base: u32,
}

impl LineMap {
    pub fn new(source: &str, line_base: u32, column_base: u32) -> Self {
        let mut line_starts = vec![0u32];
        for (index, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(index as u32 + 1);
            }
        }
        LineMap {
            line_starts,
            line_base,
            column_base,
        }
    }

    /// Map a byte offset to user-facing line/column numbers.
    pub fn locate(&self, offset: u32) -> LineCol {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert) => insert - 1,
        };
        let line_start = self.line_starts[line_index];
        LineCol {
            line: line_index as u32 + self.line_base,
            column: offset - line_start + self.column_base,
        }
    }

    /// User-facing line number only, for line-number debug attributes.
    pub fn line_of(&self, offset: u32) -> u32 {
        self.locate(offset).line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_offsets_across_lines() {
        let map = LineMap::new("ab\ncd\n\nef", 1, 1);
        assert_eq!(map.locate(0), LineCol { line: 1, column: 1 });
        assert_eq!(map.locate(1), LineCol { line: 1, column: 2 });
        assert_eq!(map.locate(3), LineCol { line: 2, column: 1 });
        assert_eq!(map.locate(6), LineCol { line: 3, column: 1 });
        assert_eq!(map.locate(7), LineCol { line: 4, column: 1 });
    }

    #[test]
    fn honors_configured_bases() {
        let map = LineMap::new("x\ny", 0, 0);
        assert_eq!(map.locate(2), LineCol { line: 1, column: 0 });
    }

    #[test]
    fn merges_spans() {
        let file = FileId(0);
        let a = Span::new(file, 4, 9);
        let b = Span::new(file, 7, 12);
        assert_eq!(a.merge(b), Span::new(file, 4, 12));
    }
}
