//! Hierarchical addressing for the Value Space.
//!
//! A [`Path`] is an ordered list of segments plus the textual encoding it was
//! written in. Layers that store values under `/`-separated keys use
//! [`PathEncoding::Slash`]; the document store, whose schema is
//! `identifier.settingName`, uses [`PathEncoding::Dot`]. Both encodings
//! address the same abstract structure and convert losslessly as long as no
//! segment contains the other encoding's separator.

mod error;

#[cfg(test)]
mod tests;

use std::{fmt, ops::Add, str::FromStr};

pub use error::PathError;

/// Textual encoding of a [`Path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathEncoding {
    /// `/Device/Network/State`; duplicate separators are collapsed.
    Slash,
    /// `Device.Network.State`; duplicate separators are rejected.
    Dot,
}

impl PathEncoding {
    /// The separator character for this encoding.
    pub const fn separator(self) -> char {
        match self {
            PathEncoding::Slash => '/',
            PathEncoding::Dot => '.',
        }
    }
}

/// An immutable, hierarchical Value Space path.
///
/// Two paths are equal iff their segments and encoding are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    encoding: PathEncoding,
    segments: Vec<String>,
}

impl Path {
    /// The root path for an encoding.
    pub fn root(encoding: PathEncoding) -> Self {
        Self {
            encoding,
            segments: Vec::new(),
        }
    }

    /// Parses a `/`-separated path.
    ///
    /// The leading slash is optional and empty segments are collapsed, so
    /// `"Device//State/"` and `"/Device/State"` are the same path.
    pub fn new(text: &str) -> Self {
        let segments = text
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            encoding: PathEncoding::Slash,
            segments,
        }
    }

    /// Parses a `.`-separated path.
    ///
    /// A single leading `/` or `.` is stripped. Every other empty segment is
    /// an error because the dot form doubles as a schema delimiter.
    ///
    /// # Errors
    /// Returns `PathError::EmptySegment` for doubled, trailing or lone
    /// separators.
    pub fn parse_dotted(text: &str) -> Result<Self, PathError> {
        let body = text
            .strip_prefix('/')
            .or_else(|| text.strip_prefix('.'))
            .unwrap_or(text);

        if body.is_empty() {
            return Ok(Self::root(PathEncoding::Dot));
        }

        let mut segments = Vec::new();
        for (index, segment) in body.split('.').enumerate() {
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: text.to_string(),
                    index,
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self {
            encoding: PathEncoding::Dot,
            segments,
        })
    }

    /// Parses `text` with the rules of `encoding`.
    ///
    /// # Errors
    /// Returns `PathError::EmptySegment` for malformed dot paths.
    pub fn parse_with(text: &str, encoding: PathEncoding) -> Result<Self, PathError> {
        match encoding {
            PathEncoding::Slash => Ok(Self::new(text)),
            PathEncoding::Dot => Self::parse_dotted(text),
        }
    }

    /// Builds a path directly from segments.
    ///
    /// # Errors
    /// Returns `PathError::InvalidSegment` if a segment is empty or contains
    /// the encoding's separator.
    pub fn from_segments<I, S>(encoding: PathEncoding, segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || s.contains(encoding.separator()))
        {
            return Err(PathError::InvalidSegment {
                segment: bad.clone(),
                encoding,
            });
        }

        Ok(Self { encoding, segments })
    }

    /// The encoding this path renders with.
    pub fn encoding(&self) -> PathEncoding {
        self.encoding
    }

    /// The path segments, root first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this path has no segments. Same as [`Path::is_root`].
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path. The root is its own parent.
    pub fn parent(&self) -> Path {
        let mut segments = self.segments.clone();
        segments.pop();
        Self {
            encoding: self.encoding,
            segments,
        }
    }

    /// Appends `segment`, splitting it on this path's separator.
    pub fn child(&self, segment: &str) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(
            segment
                .split(self.encoding.separator())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self {
            encoding: self.encoding,
            segments,
        }
    }

    /// Concatenates `other` onto this path, keeping this path's encoding.
    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self {
            encoding: self.encoding,
            segments,
        }
    }

    /// Whether this path is an ancestor of, or equal to, `other`.
    ///
    /// Paths of different encodings never include one another.
    pub fn includes(&self, other: &Path) -> bool {
        self.encoding == other.encoding
            && self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// The path of `self` relative to `ancestor`.
    ///
    /// Returns `None` unless `ancestor.includes(self)`. The result keeps this
    /// path's encoding, so `ancestor.join(&rel) == self`.
    pub fn strip_prefix(&self, ancestor: &Path) -> Option<Path> {
        if !ancestor.includes(self) {
            return None;
        }

        Some(Self {
            encoding: self.encoding,
            segments: self.segments[ancestor.segments.len()..].to_vec(),
        })
    }

    /// Re-encodes this path.
    ///
    /// # Errors
    /// Returns `PathError::InvalidSegment` if a segment contains the target
    /// encoding's separator.
    pub fn with_encoding(&self, encoding: PathEncoding) -> Result<Path, PathError> {
        Self::from_segments(encoding, self.segments.iter().cloned())
    }

    /// Whether `self` and `other` lie on one ancestor chain.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.includes(other) || other.includes(self)
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::root(PathEncoding::Slash)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoding {
            PathEncoding::Slash => {
                if self.segments.is_empty() {
                    return f.write_str("/");
                }
                for segment in &self.segments {
                    write!(f, "/{segment}")?;
                }
                Ok(())
            }
            PathEncoding::Dot => f.write_str(&self.segments.join(".")),
        }
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Path::new(s))
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::new(value)
    }
}

impl Add<&Path> for &Path {
    type Output = Path;

    fn add(self, rhs: &Path) -> Path {
        self.join(rhs)
    }
}

impl Add<&str> for &Path {
    type Output = Path;

    fn add(self, rhs: &str) -> Path {
        self.child(rhs)
    }
}
