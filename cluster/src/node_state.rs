use crate::MessageError;
use crate::message::{Message, read_body, write_body};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Synchronization state a node advertises to its peers.
///
/// Body layout, big-endian:
///
/// | field            | width |
/// |------------------|-------|
/// | `view_id`        | 8     |
/// | `transaction_id` | 8     |
/// | `sync_mode`      | 1     |
/// | `sync_port`      | 4     |
///
/// Field declaration order is the wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeState {
    /// Cluster epoch the node belongs to
    pub view_id: i64,
    /// Last transaction the node applied
    pub transaction_id: i64,
    /// Replication strategy selector
    pub sync_mode: u8,
    /// Port of the node's data channel
    pub sync_port: i32,
}

impl NodeState {
    /// Create a node state record.
    #[must_use]
    pub const fn new(view_id: i64, transaction_id: i64, sync_mode: u8, sync_port: i32) -> Self {
        Self {
            view_id,
            transaction_id,
            sync_mode,
            sync_port,
        }
    }
}

impl Message for NodeState {
    const TYPE: u8 = 0xC5;
    const BODY_LEN: usize = 8 + 8 + 1 + 4;

    fn write<W: Write>(&self, writer: W) -> Result<(), MessageError> {
        write_body(self, writer)
    }

    fn read<R: Read>(reader: R) -> Result<Self, MessageError> {
        read_body(reader)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeState{{view_id={}, transaction_id={}, sync_mode={}, sync_port={}}}",
            self.view_id, self.transaction_id, self.sync_mode, self.sync_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};

    #[test]
    fn body_is_fields_in_order() {
        let mut body = Vec::new();
        let written = NodeState::new(1, 2, 3, 4).write(&mut body);
        assert!(written.is_ok());
        assert_eq!(
            body,
            vec![
                0, 0, 0, 0, 0, 0, 0, 1, // view_id
                0, 0, 0, 0, 0, 0, 0, 2, // transaction_id
                3, // sync_mode
                0, 0, 0, 4, // sync_port
            ]
        );
        assert_eq!(body.len(), NodeState::BODY_LEN);
    }

    #[test]
    fn encoded_frame_is_tag_plus_body() {
        let bytes = encode(&NodeState::new(-1, i64::MAX, u8::MAX, i32::MIN)).ok();
        assert_eq!(bytes.as_ref().map(Vec::len), Some(22));
        assert_eq!(bytes.as_ref().map(|b| b[0]), Some(0xC5));
    }

    #[test]
    fn short_body_fails_to_read() {
        let read = NodeState::read(&[0_u8; 20][..]);
        assert!(matches!(read, Err(MessageError::Codec(_))));
    }

    #[test]
    fn decode_rejects_foreign_tag() {
        let mut bytes = vec![0_u8; 22];
        bytes[0] = 0xC4;
        assert!(matches!(
            decode::<NodeState>(&bytes),
            Err(MessageError::UnexpectedType {
                expected: 0xC5,
                found: 0xC4
            })
        ));
    }

    #[test]
    fn display_lists_every_field() {
        assert_eq!(
            NodeState::new(7, 99, 2, 8080).to_string(),
            "NodeState{view_id=7, transaction_id=99, sync_mode=2, sync_port=8080}"
        );
    }
}
