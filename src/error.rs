//! Error types and handling for pmshelf

/// Result type alias for shelf operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Error types for the shelf and its named memory stores
#[derive(Debug, thiserror::Error)]
pub enum ShelfError {
    /// I/O related errors (file operations, mmap, fsync)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Region not found or doesn't exist
    #[error("Region not found: {name}")]
    RegionNotFound { name: String },

    /// Region already exists
    #[error("Region already exists: {name}")]
    RegionExists { name: String },

    /// Shelf capacity exhausted
    #[error("Insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// Buffer does not hold a header of the expected format
    #[error("Format error: {message}")]
    Format { message: String },

    /// A value or region of the wrong logical type was supplied
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Valid header but the payload cannot be decoded
    #[error("Corrupt region {name}: {message}")]
    Corruption { name: String, message: String },

    /// Region-local transaction failure
    #[error("Transaction error on {name}: {message}")]
    Transaction { name: String, message: String },

    /// Arithmetic failure (overflow, division by zero, bad shift)
    #[error("Arithmetic error: {message}")]
    Arithmetic { message: String },

    /// The name is already bound by a live instance in this process
    #[error("Region busy: {name} is bound by another live instance")]
    Busy { name: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl ShelfError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a region not found error
    pub fn region_not_found(name: impl Into<String>) -> Self {
        Self::RegionNotFound { name: name.into() }
    }

    /// Create a region exists error
    pub fn region_exists(name: impl Into<String>) -> Self {
        Self::RegionExists { name: name.into() }
    }

    /// Create an insufficient space error
    pub fn insufficient_space(requested: usize, available: usize) -> Self {
        Self::InsufficientSpace {
            requested,
            available,
        }
    }

    /// Create a format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a corruption error
    pub fn corruption(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transaction {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an arithmetic error
    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::Arithmetic {
            message: message.into(),
        }
    }

    /// Create a busy error
    pub fn busy(name: impl Into<String>) -> Self {
        Self::Busy { name: name.into() }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Whether this error only means "not an instance of the probed type"
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }
}

impl From<std::io::Error> for ShelfError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for ShelfError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ShelfError::region_not_found("x");
        assert!(matches!(err, ShelfError::RegionNotFound { .. }));

        let err = ShelfError::insufficient_space(1024, 512);
        assert!(matches!(err, ShelfError::InsufficientSpace { .. }));

        let err = ShelfError::type_mismatch("float-number", "ndarray");
        assert!(matches!(err, ShelfError::TypeMismatch { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = ShelfError::corruption("x", "payload is not hex");
        let display = format!("{}", err);
        assert!(display.contains("Corrupt region x"));
        assert!(display.contains("payload is not hex"));
    }

    #[test]
    fn test_format_errors_are_probe_negative() {
        assert!(ShelfError::format("bad magic").is_format());
        assert!(!ShelfError::region_exists("x").is_format());
    }
}
