//! Error types for the group share network
//!
//! This module defines the error taxonomy shared by the tracker and the
//! peer node. Tracker-side failures are rendered into a single `ERROR: `
//! response line and parsed back into typed errors on the client.

use std::fmt;

/// Prefix carried by every failed tracker response
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Error type for tracker and peer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    /// Malformed or insufficient command arguments
    ArgumentError {
        message: String,
        field: Option<String>,
    },

    /// Unknown user, group, file or peer
    NotFoundError {
        message: String,
        entity: Option<String>,
    },

    /// Bad passcode, non-owner or non-member action
    AuthorizationError {
        message: String,
        user: Option<String>,
    },

    /// Connect, send or receive failure, including timeouts
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Piece or whole-file digest mismatch
    IntegrityError {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// File open, seek, read, write or resize failure
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },
}

impl ShareError {
    /// Create a new ArgumentError
    pub fn argument_error(message: impl Into<String>) -> Self {
        ShareError::ArgumentError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ArgumentError naming the offending field
    pub fn argument_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        ShareError::ArgumentError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NotFoundError
    pub fn not_found(message: impl Into<String>) -> Self {
        ShareError::NotFoundError {
            message: message.into(),
            entity: None,
        }
    }

    /// Create a new NotFoundError naming the missing entity kind
    pub fn not_found_with_entity(message: impl Into<String>, entity: impl Into<String>) -> Self {
        ShareError::NotFoundError {
            message: message.into(),
            entity: Some(entity.into()),
        }
    }

    /// Create a new AuthorizationError
    pub fn authorization_error(message: impl Into<String>) -> Self {
        ShareError::AuthorizationError {
            message: message.into(),
            user: None,
        }
    }

    /// Create a new AuthorizationError for a specific user
    pub fn authorization_error_with_user(message: impl Into<String>, user: impl Into<String>) -> Self {
        ShareError::AuthorizationError {
            message: message.into(),
            user: Some(user.into()),
        }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        ShareError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with address
    pub fn network_error_with_address(message: impl Into<String>, address: impl Into<String>) -> Self {
        ShareError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        ShareError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new IntegrityError
    pub fn integrity_error(message: impl Into<String>) -> Self {
        ShareError::IntegrityError {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Create a new IntegrityError with the expected and actual digests
    pub fn integrity_mismatch(message: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ShareError::IntegrityError {
            message: message.into(),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        ShareError::StorageError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new StorageError with path
    pub fn storage_error_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        ShareError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: None,
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        ShareError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Render the error as a single tracker response
    pub fn to_response(&self) -> String {
        format!("{}{}", ERROR_PREFIX, self)
    }

    /// Check whether a tracker response reports a failure
    pub fn is_error_response(response: &str) -> bool {
        response.starts_with(ERROR_PREFIX)
    }

    /// Rebuild a typed error from a failed tracker response
    ///
    /// The category is recovered from the rendered prefix; the remaining
    /// text, context included, becomes the message.
    pub fn from_response(response: &str) -> Self {
        let body = response.strip_prefix(ERROR_PREFIX).unwrap_or(response).trim();

        const KINDS: [(&str, fn(String) -> ShareError); 6] = [
            ("Argument error: ", ShareError::argument_error),
            ("Not found: ", ShareError::not_found),
            ("Authorization error: ", ShareError::authorization_error),
            ("Network error: ", ShareError::network_error),
            ("Integrity error: ", ShareError::integrity_error),
            ("Storage error: ", ShareError::storage_error),
        ];

        for (prefix, build) in KINDS {
            if let Some(message) = body.strip_prefix(prefix) {
                return build(message.to_string());
            }
        }
        ShareError::argument_error(body.to_string())
    }
}

impl fmt::Display for ShareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareError::ArgumentError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Argument error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Argument error: {}", message)
                }
            }
            ShareError::NotFoundError { message, entity } => {
                if let Some(e) = entity {
                    write!(f, "Not found: {} (entity: {})", message, e)
                } else {
                    write!(f, "Not found: {}", message)
                }
            }
            ShareError::AuthorizationError { message, user } => {
                if let Some(u) = user {
                    write!(f, "Authorization error: {} (user: {})", message, u)
                } else {
                    write!(f, "Authorization error: {}", message)
                }
            }
            ShareError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            ShareError::IntegrityError { message, expected, actual } => {
                match (expected, actual) {
                    (Some(e), Some(a)) => write!(f, "Integrity error: {} (expected: {}, actual: {})", message, e, a),
                    _ => write!(f, "Integrity error: {}", message),
                }
            }
            ShareError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
        }
    }
}

impl std::error::Error for ShareError {}

impl From<std::io::Error> for ShareError {
    fn from(err: std::io::Error) -> Self {
        ShareError::StorageError {
            message: err.to_string(),
            path: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(err: serde_json::Error) -> Self {
        ShareError::StorageError {
            message: "Failed to parse JSON data".to_string(),
            path: None,
            source: Some(err.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for ShareError {
    fn from(err: std::net::AddrParseError) -> Self {
        ShareError::argument_error_with_field(format!("Failed to parse address: {}", err), "address")
    }
}

impl From<tokio::time::error::Elapsed> for ShareError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ShareError::network_error("Operation timed out")
    }
}
