use crate::wire::WireError;
use thiserror::Error as ThisError;

/// Errors surfaced by a [`Connection`](crate::Connection).
///
/// None of these are fatal to the connection. Dead-link detection is state,
/// not an error; see [`Connection::state`](crate::Connection::state).
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The message would fragment into more pieces than the fragment field
    /// can count. The caller should split it.
    #[error("message would fragment into {fragments} segments, more than fit in the fragment field")]
    OversizedMessage { fragments: usize },
    /// No complete message is staged for delivery yet.
    #[error("no complete message is ready")]
    WouldBlock,
    /// The caller's buffer cannot hold the next message.
    #[error("the next message is {required} bytes but the buffer holds {provided}")]
    BufferTooSmall { required: usize, provided: usize },
    /// The datagram is not a well-formed train of segments. Whatever was
    /// parsed before the damage has already been applied; the rest is
    /// discarded.
    #[error("malformed datagram: {0}")]
    BadFormat(#[from] WireError),
    /// The datagram belongs to a different conversation. Usually a
    /// demultiplexer bug; see [`wire::peek_conv`](crate::wire::peek_conv).
    #[error("conversation id {found:#010x} does not match {expected:#010x}")]
    ConvMismatch { expected: u32, found: u32 },
    /// The requested MTU cannot hold a header and a minimal payload.
    #[error("mtu of {0} bytes is below the supported minimum")]
    InvalidMtu(usize),
}
