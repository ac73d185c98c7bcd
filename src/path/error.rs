use super::PathEncoding;

/// Errors raised while parsing or re-encoding a path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    /// A dot-encoded path contained `..`, a trailing `.` or similar
    #[error("empty segment {index} in path '{path}'")]
    EmptySegment {
        /// The offending input
        path: String,
        /// Zero-based index of the empty segment
        index: usize,
    },

    /// A segment cannot be represented in the requested encoding
    #[error("segment '{segment}' is not valid in {encoding:?} encoding")]
    InvalidSegment {
        /// The offending segment
        segment: String,
        /// Encoding that rejected it
        encoding: PathEncoding,
    },
}
