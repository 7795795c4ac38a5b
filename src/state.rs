/// The life state of a connection.
///
/// There is no handshake and no orderly shutdown in this protocol, so the
/// state machine is small: a connection is usable until retransmission of
/// some segment exceeds the dead-link threshold, at which point the caller
/// should tear the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// The link is carrying traffic normally.
    Alive,
    /// Some segment has been transmitted `dead_link` times without being
    /// acknowledged. The connection is considered broken; it keeps accepting
    /// calls but the caller is expected to discard it.
    DeadLink,
}
