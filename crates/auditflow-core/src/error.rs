//! # Error Types
//!
//! Errors raised while constructing core primitives. Domain crates define
//! their own `thiserror` enums and wrap this one where needed.

use thiserror::Error;

/// Error constructing or parsing a core primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A timestamp string or epoch value could not be interpreted.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An identifier string was not a valid UUID.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected input.
        value: String,
        /// Parser diagnostic.
        reason: String,
    },
}
