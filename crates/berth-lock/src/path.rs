//! Hierarchical lock paths.

use std::fmt;

/// A `/`-joined prefix of (app, sha, env). The empty path is the wildcard `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockPath {
    segments: Vec<String>,
}

impl LockPath {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn wildcard() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse the table form (`/app/sha`, `/`).
    pub fn parse(s: &str) -> Self {
        Self {
            segments: s
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment-wise prefix test; `/app1` is not a prefix of `/app10`.
    pub fn is_prefix_of(&self, other: &LockPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True when either path covers the other.
    pub fn overlaps(&self, other: &LockPath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for LockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}
