// error.rs - Custom error types for tzst
//
// This module defines all error types used throughout the crate.
// Using thiserror makes error definitions clean and implements std::error::Error automatically.
// The security rejection variants carry the offending member name so callers
// can report exactly which archive entry was refused.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all archive operations
#[derive(Error, Debug)]
pub enum TzstError {
    /// Generic failure involving the archive as a whole (open, structural
    /// corruption of the tar stream, I/O during add or extract)
    #[error("{0}")]
    Archive(String),

    /// Zstandard refused to encode valid input
    #[error("{0}")]
    Compression(String),

    /// Zstandard refused to decode, or the decoded stream failed tar parsing
    /// at the decompression boundary
    #[error("{0}")]
    Decompression(String),

    /// An input file or the archive itself is missing
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Compression level, mode, filter name, or conflict policy outside the
    /// allowed set
    #[error("{0}")]
    InvalidArgument(String),

    /// Requested operation is rejected by contract (append mode)
    #[error("{0}")]
    NotImplemented(String),

    /// Operation attempted in the wrong handle state (closed, wrong mode,
    /// streaming + selective extraction)
    #[error("{0}")]
    Runtime(String),

    /// Member name is absolute after separator stripping
    #[error("member '{name}' has an absolute path")]
    AbsolutePath { name: String },

    /// Link member points at an absolute target
    #[error("member '{name}' links to absolute target '{linkname}'")]
    AbsoluteLink { name: String, linkname: String },

    /// Member would be written outside the destination directory
    #[error("member '{name}' would be extracted outside the destination")]
    OutsideDestination { name: String },

    /// Link member's target resolves outside the destination directory
    #[error("member '{name}' links to '{linkname}' outside the destination")]
    LinkOutsideDestination { name: String, linkname: String },

    /// Character device, block device, or FIFO rejected by the data filter
    #[error("member '{name}' is a special file (device or FIFO)")]
    SpecialFile { name: String },

    /// I/O error (permission denied, disk full, etc.)
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for archive operations
pub type TzstResult<T> = Result<T, TzstError>;

impl TzstError {
    /// Whether this error is one of the security filter rejections.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            TzstError::AbsolutePath { .. }
                | TzstError::AbsoluteLink { .. }
                | TzstError::OutsideDestination { .. }
                | TzstError::LinkOutsideDestination { .. }
                | TzstError::SpecialFile { .. }
        )
    }
}
