//! Template source shared between the syntax tree and compiled templates.
//!
//! Source text is wrapped in an `Arc<str>` once. Literal text nodes keep a
//! `StrSlice` (the Arc plus byte offsets), so statics can be built from the
//! original template without copying it per node, and compiled templates stay
//! `'static + Send + Sync`.

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::Arc;

#[derive(Clone)]
pub struct SourceCode(Arc<str>);

impl SourceCode {
    pub fn new(code: impl Into<Arc<str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Slices `range` out of the source.
    ///
    /// Returns `None` when the range is out of bounds or splits a character.
    pub fn slice(&self, range: Range<usize>) -> Option<StrSlice> {
        self.0.get(range.clone())?;
        Some(StrSlice {
            source: self.clone(),
            start: range.start,
            end: range.end,
        })
    }
}

impl fmt::Debug for SourceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceCode({} bytes)", self.0.len())
    }
}

/// Cheaply clonable view into a [`SourceCode`].
#[derive(Clone)]
pub struct StrSlice {
    source: SourceCode,
    start: usize,
    end: usize,
}

impl StrSlice {
    #[inline]
    pub fn as_str(&self) -> &str {
        self.source.0.get(self.start..self.end).unwrap_or_default()
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Drops leading whitespace, the way a `-}}` marker eats the text after it.
    pub fn trim_start(&self) -> Self {
        let trimmed = self.as_str().trim_start_matches(is_space);
        Self {
            source: self.source.clone(),
            start: self.end - trimmed.len(),
            end: self.end,
        }
    }

    /// Drops trailing whitespace, the way a `{{-` marker eats the text before it.
    pub fn trim_end(&self) -> Self {
        let trimmed = self.as_str().trim_end_matches(is_space);
        Self {
            source: self.source.clone(),
            start: self.start,
            end: self.start + trimmed.len(),
        }
    }
}

fn is_space(character: char) -> bool {
    matches!(character, ' ' | '\t' | '\r' | '\n')
}

impl Deref for StrSlice {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for StrSlice {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for StrSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}..{}", self.as_str(), self.start, self.end)
    }
}

impl fmt::Display for StrSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for StrSlice {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StrSlice {}

impl PartialEq<str> for StrSlice {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StrSlice {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_share_the_source() {
        let source = SourceCode::new("<p>{{.Name}}</p>");
        let slice = source.slice(0..3).unwrap();
        assert_eq!(slice, "<p>");
        assert_eq!(slice.range(), 0..3);
        assert!(source.slice(0..99).is_none());
    }

    #[test]
    fn rejects_split_characters() {
        let source = SourceCode::new("héllo");
        assert!(source.slice(0..2).is_none());
        assert_eq!(source.slice(0..3).unwrap(), "hé");
    }

    #[test]
    fn trimming_narrows_offsets() {
        let source = SourceCode::new("  \n a b \t");
        let slice = source.slice(0..source.len()).unwrap();
        let start = slice.trim_start();
        assert_eq!(start, "a b \t");
        assert_eq!(start.start(), 4);
        let both = start.trim_end();
        assert_eq!(both, "a b");
        assert_eq!(both.range(), 4..7);
        assert!(source.slice(0..3).unwrap().trim_end().is_empty());
    }
}
