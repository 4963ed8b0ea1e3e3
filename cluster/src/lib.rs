//! # Txpipe Cluster
//!
//! Wire messages exchanged between txpipe nodes.
//!
//! Every message is framed as a one-byte type tag followed by a fixed-width,
//! big-endian body. There is no length prefix: the tag determines the body
//! length.
//!
//! ## Example
//!
//! ```
//! use txpipe_cluster::{NodeState, decode, encode};
//!
//! # fn main() -> Result<(), txpipe_cluster::MessageError> {
//! let state = NodeState::new(3, 1_042, 1, 9_500);
//! let bytes = encode(&state)?;
//! assert_eq!(bytes[0], 0xC5);
//! assert_eq!(decode::<NodeState>(&bytes)?, state);
//! # Ok(())
//! # }
//! ```

/// Wire codec errors
pub mod error;

/// The message trait and framing helpers
pub mod message;

/// Node synchronization state
pub mod node_state;

pub use error::MessageError;
pub use message::{Message, decode, encode};
pub use node_state::NodeState;
