//! Composite resource identities
//!
//! Many remote resources have no single natural key, so the persisted handle
//! joins several identifiers: `{parentId}#{childId}[#{variant}...]`.

use crate::error::{ConvergeError, Result};
use std::fmt;

/// Separator between the parts of a persisted handle.
pub const FIELD_SEP: char = '#';

/// Separator for list-valued parts, e.g. a set of member ids packed into one part.
pub const COMMA_SEP: char = ',';

/// Encodes and decodes handles with a fixed separator.
///
/// Cloud identifiers in this domain are alphanumeric-with-hyphen, so the
/// separator never occurs inside a legitimate part. Parts that contain it,
/// or are empty, are rejected at encode time rather than escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCodec {
    separator: char,
}

impl Default for HandleCodec {
    fn default() -> Self {
        Self {
            separator: FIELD_SEP,
        }
    }
}

impl HandleCodec {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn encode<S: AsRef<str>>(&self, parts: &[S]) -> Result<String> {
        if parts.is_empty() {
            return Err(ConvergeError::Invalid(
                "a handle needs at least one part".to_string(),
            ));
        }

        for part in parts {
            let part = part.as_ref();
            if part.is_empty() {
                return Err(ConvergeError::Invalid(
                    "handle parts must not be empty".to_string(),
                ));
            }
            if part.contains(self.separator) {
                return Err(ConvergeError::Invalid(format!(
                    "handle part {:?} contains the separator {:?}",
                    part, self.separator
                )));
            }
        }

        let sep = self.separator.to_string();
        Ok(parts
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(&sep))
    }

    /// Split `handle` into exactly `expected` non-empty parts.
    pub fn decode(&self, handle: &str, expected: usize) -> Result<Vec<String>> {
        let parts: Vec<&str> = handle.split(self.separator).collect();

        if parts.len() != expected || parts.iter().any(|p| p.is_empty()) {
            return Err(ConvergeError::MalformedHandle {
                handle: handle.to_string(),
                expected,
                found: parts.iter().filter(|p| !p.is_empty()).count(),
            });
        }

        Ok(parts.into_iter().map(str::to_string).collect())
    }
}

/// Externally visible identity of a declared resource.
///
/// Created once at the end of a successful create and passed back unmodified
/// on every later read, update and delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    parts: Vec<String>,
    encoded: String,
}

impl ResourceHandle {
    /// Build a handle from server-assigned identifiers using [`FIELD_SEP`].
    pub fn new<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        let encoded = HandleCodec::default().encode(&parts)?;
        Ok(Self { parts, encoded })
    }

    /// Parse a persisted handle that must have exactly `expected` parts.
    pub fn parse(handle: &str, expected: usize) -> Result<Self> {
        let parts = HandleCodec::default().decode(handle, expected)?;
        Ok(Self {
            parts,
            encoded: handle.to_string(),
        })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for ResourceHandle {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}
