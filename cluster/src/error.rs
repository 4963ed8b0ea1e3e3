use thiserror::Error;

/// Errors raised while encoding or decoding a wire message
#[derive(Error, Debug)]
pub enum MessageError {
    /// The type tag does not belong to the message being decoded
    #[error("Unexpected message type: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedType {
        /// Tag of the requested message type
        expected: u8,
        /// Tag found on the wire
        found: u8,
    },

    /// The frame is not exactly one tag byte plus the fixed body
    #[error("Invalid message length: expected {expected} bytes, found {found}")]
    InvalidLength {
        /// Required frame length
        expected: usize,
        /// Actual frame length
        found: usize,
    },

    /// The body could not be serialized or deserialized
    #[error("Message codec failed: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_expected_and_found() {
        let error = MessageError::UnexpectedType {
            expected: 0xC5,
            found: 0x01,
        };
        assert_eq!(
            error.to_string(),
            "Unexpected message type: expected 0xc5, found 0x01"
        );

        let error = MessageError::InvalidLength {
            expected: 22,
            found: 3,
        };
        assert_eq!(
            error.to_string(),
            "Invalid message length: expected 22 bytes, found 3"
        );
    }
}
