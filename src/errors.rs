//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`FableError`] covers all failure modes including:
//! - Resource loading and parsing errors
//! - Binary stream decoding errors
//!
//! Runtime conditions that are expected during normal play (a resource that
//! has not finished loading, a bone that does not exist in a skeleton) are
//! not errors: the affected entity is skipped for the tick. Caller misuse of
//! public accessors (bad index, wrong input type) is logged as a warning and
//! the call becomes a no-op.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, FableError>`.
//!
//! ```rust,ignore
//! use fable::errors::{FableError, Result};
//!
//! fn load_resource() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the Fable engine.
///
/// This enum covers all possible error conditions that can occur
/// during engine operation. Each variant provides specific context
/// about what went wrong.
#[derive(Error, Debug)]
pub enum FableError {
    // ========================================================================
    // Resource Loading Errors
    // ========================================================================
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A resource file was read but its content is invalid.
    #[error("Failed to parse resource '{path}': {message}")]
    ResourceParse {
        /// Path of the offending resource
        path: String,
        /// Description of what is wrong with it
        message: String,
    },

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Binary Stream Errors
    // ========================================================================
    /// A serialized stream ended in the middle of a value.
    #[error("Stream ended while reading {0}")]
    BlobOverrun(&'static str),

    /// A serialized path exceeds the fixed maximum length.
    #[error("Serialized path exceeds the maximum length of {max} bytes")]
    PathTooLong {
        /// The maximum allowed path length
        max: usize,
    },

    /// A serialized stream declares a format version this build does not know.
    #[error("Unknown stream version: {0}")]
    UnknownVersion(u32),
}

/// Alias for `Result<T, FableError>`.
pub type Result<T> = std::result::Result<T, FableError>;
