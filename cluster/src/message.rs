use crate::MessageError;
use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Fixed-width integers in network byte order.
pub(crate) fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

/// A fixed-layout cluster message.
///
/// `write` and `read` handle the body only; [`encode`] and [`decode`] add and
/// check the type tag.
pub trait Message: Sized {
    /// Type tag written before the body
    const TYPE: u8;

    /// Exact body length in bytes
    const BODY_LEN: usize;

    /// Write the body, fields in wire order.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Codec`] if the writer fails.
    fn write<W: Write>(&self, writer: W) -> Result<(), MessageError>;

    /// Read a body written by [`Message::write`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Codec`] if the reader runs out of bytes.
    fn read<R: Read>(reader: R) -> Result<Self, MessageError>;
}

/// Write a serde body with the wire options.
pub(crate) fn write_body<T: Serialize, W: Write>(value: &T, writer: W) -> Result<(), MessageError> {
    wire_options().serialize_into(writer, value)?;
    Ok(())
}

/// Read a serde body with the wire options.
pub(crate) fn read_body<T: DeserializeOwned, R: Read>(reader: R) -> Result<T, MessageError> {
    Ok(wire_options().deserialize_from(reader)?)
}

/// Frame `message` as its type tag followed by its body.
///
/// # Errors
///
/// Returns [`MessageError::Codec`] if the body cannot be serialized.
pub fn encode<M: Message>(message: &M) -> Result<Vec<u8>, MessageError> {
    let mut bytes = Vec::with_capacity(1 + M::BODY_LEN);
    bytes.push(M::TYPE);
    message.write(&mut bytes)?;
    Ok(bytes)
}

/// Decode one framed message of type `M`.
///
/// # Errors
///
/// - [`MessageError::InvalidLength`] unless `bytes` is exactly one tag plus the body
/// - [`MessageError::UnexpectedType`] if the tag is not `M::TYPE`
/// - [`MessageError::Codec`] if the body cannot be deserialized
pub fn decode<M: Message>(bytes: &[u8]) -> Result<M, MessageError> {
    let expected = 1 + M::BODY_LEN;
    if bytes.len() != expected {
        return Err(MessageError::InvalidLength {
            expected,
            found: bytes.len(),
        });
    }

    let (&tag, body) = bytes.split_first().ok_or(MessageError::InvalidLength {
        expected,
        found: 0,
    })?;
    if tag != M::TYPE {
        return Err(MessageError::UnexpectedType {
            expected: M::TYPE,
            found: tag,
        });
    }
    M::read(body)
}
