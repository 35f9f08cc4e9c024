//! Error types for decode operations.
//!
//! Every failure inside a decode is caught locally and surfaced as one
//! of the [`DecodeError`] variants; no error here is fatal to the
//! surrounding viewer. The [`DecodeError::is_out_of_memory`] predicate
//! separates resource exhaustion from malformed input so the caller can
//! offer a downsampled retry for the former.

use std::io;
use thiserror::Error;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur while decoding image data or metadata.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Signature, reserved-byte, version, bit-depth, color-mode or
    /// similar structural violation in a file header.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A read ran past the end of the buffer or file.
    #[error("truncated input")]
    Truncated,

    /// The file uses a feature this decoder does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A configured size limit was exceeded.
    ///
    /// Reported as out-of-memory so the viewer can offer its
    /// downsampling path instead of a plain error.
    #[error("{what} exceeds the limit of {limit}")]
    ResourceLimit {
        /// What exceeded the limit (file size, pixel count, ...).
        what: &'static str,
        /// The configured maximum.
        limit: u64,
    },

    /// A pixel or metadata buffer could not be allocated.
    #[error("failed to allocate {requested} bytes")]
    AllocationFailed {
        /// Bytes requested.
        requested: usize,
    },

    /// Expected data is absent from an otherwise well-formed file.
    #[error("missing data: {0}")]
    MissingData(&'static str),

    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl DecodeError {
    /// Creates a [`DecodeError::MalformedHeader`] error.
    #[inline]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedHeader(msg.into())
    }

    /// Creates a [`DecodeError::Unsupported`] error.
    #[inline]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Returns `true` when the failure was resource exhaustion rather
    /// than malformed input.
    ///
    /// Callers use this to distinguish "retry with a downsampled path"
    /// from "the file is broken".
    #[inline]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::ResourceLimit { .. } | Self::AllocationFailed { .. }
        )
    }
}

impl From<io::Error> for DecodeError {
    /// Short reads become [`DecodeError::Truncated`]; everything else
    /// stays an I/O error.
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }
}

/// Allocates a zero-filled byte buffer, mapping allocator failure to
/// [`DecodeError::AllocationFailed`].
pub(crate) fn alloc_bytes(len: usize) -> DecodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DecodeError::AllocationFailed { requested: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_classification() {
        assert!(DecodeError::ResourceLimit {
            what: "pixel count",
            limit: 1
        }
        .is_out_of_memory());
        assert!(DecodeError::AllocationFailed { requested: 64 }.is_out_of_memory());
        assert!(!DecodeError::Truncated.is_out_of_memory());
        assert!(!DecodeError::malformed("bad magic").is_out_of_memory());
    }

    #[test]
    fn test_eof_maps_to_truncated() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(DecodeError::from(eof), DecodeError::Truncated));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(DecodeError::from(denied), DecodeError::Io(_)));
    }
}
