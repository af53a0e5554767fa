//! Domain error types.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Byte received where an LED command was expected
    #[error("Invalid command byte: {byte:#04x} (expected 0x00 or 0x01)")]
    InvalidCommandByte { byte: u8 },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_command_byte_display() {
        let err = DomainError::InvalidCommandByte { byte: 0x7f };
        assert!(err.to_string().contains("0x7f"));
    }
}
