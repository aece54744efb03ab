//! Error types for the EZB SDK

/// Errors raised while parsing type or method descriptors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Descriptor ended in the middle of a type
    #[error("Unexpected end of descriptor: {0}")]
    UnexpectedEnd(String),

    /// Unknown type tag
    #[error("Invalid type tag '{tag}' in descriptor {descriptor}")]
    InvalidTag {
        /// The offending character
        tag: char,
        /// The whole descriptor
        descriptor: String,
    },

    /// Method descriptor without parentheses
    #[error("Malformed method descriptor: {0}")]
    MalformedMethod(String),

    /// Trailing characters after a complete descriptor
    #[error("Trailing characters in descriptor: {0}")]
    Trailing(String),
}

/// Errors raised while encoding or decoding wire messages
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// JSON (de)serialization failed
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message exceeds the size limit
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Allowed size
        max: usize,
    },
}
