//! A reliable, ordered, connection-oriented transport core for unreliable
//! datagram links.
//!
//! The crate implements the hard center of a TCP-like protocol that runs
//! above UDP or any other lossy datagram substrate: sliding-window delivery,
//! segmentation and reassembly, selective and cumulative acknowledgement, an
//! RTT-driven retransmission timer with fast retransmit, and a small
//! congestion controller with window probing. Compared to kernel TCP it
//! trades bandwidth for latency, retransmitting aggressively and giving the
//! caller knobs to push the trade further.
//!
//! # Organization
//!
//! - [`Connection`] is the per-conversation control block and the whole API:
//!   `send`/`recv` face the application, `input`/`update`/`check` face the
//!   caller's socket and clock.
//! - [`Output`] is the sink a connection writes finished datagrams to.
//! - [`wire`] describes the segment header and lets a demultiplexer peek at
//!   the conversation id of a raw datagram.
//!
//! # Driving a connection
//!
//! The crate does no IO and owns no clock. A caller owns the socket and the
//! event loop, feeds every received datagram to
//! [`input`](Connection::input), calls [`update`](Connection::update) on a
//! monotonic millisecond clock, and sleeps until the time
//! [`check`](Connection::check) reports. Everything is single-threaded;
//! servers with many conversations own many connections.

mod connection;
mod error;
mod segment;
mod seq;
mod state;
pub mod wire;

pub use connection::{Connection, Output};
pub use error::Error;
pub use state::State;
pub use wire::peek_conv;
