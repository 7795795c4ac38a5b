//! The per-connection control block of the transport.
//!
//! [`Connection`] is a sans-IO state machine: it never touches a socket or a
//! clock on its own. The caller feeds it inbound datagrams through
//! [`input`](Connection::input), drives time through
//! [`update`](Connection::update), and receives finished outbound datagrams
//! through the [`Output`] sink it supplied at construction. Keeping the block
//! free of IO lets it be exercised end to end in plain unit tests, with two
//! blocks wired back to back through an in-memory channel.
//!
//! One `Connection` is one direction pair of one conversation, identified by
//! the 32-bit conversation id that every segment carries. Demultiplexing by
//! peer address and conversation id is the caller's job;
//! [`wire::peek_conv`](crate::wire::peek_conv) reads the id off a datagram
//! without a connection.

use crate::error::Error;
use crate::segment::{Segment, Transmit};
use crate::seq::{seq_diff, seq_leq, seq_lt};
use crate::state::State;
use crate::wire::{Command, Header, WireError, HEADER_LEN};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::io;

#[cfg(test)]
mod tests;

/// Minimum retransmission timeout in nodelay mode, in ms.
const RTO_NODELAY_MIN: u32 = 30;
/// Minimum retransmission timeout, in ms.
const RTO_MIN: u32 = 100;
/// Retransmission timeout before the first RTT sample, in ms.
const RTO_DEFAULT: u32 = 200;
/// Ceiling on the retransmission timeout, in ms.
const RTO_MAX: u32 = 60_000;

const DEFAULT_MTU: usize = 1400;
const MIN_MTU: usize = 50;
const DEFAULT_WINDOW: u16 = 32;
/// Floor on the configurable receive window, preserving room for window
/// probing and large fragment trains.
const WINDOW_FLOOR: u16 = 128;
const DEFAULT_INTERVAL: u32 = 100;
const DEFAULT_DEAD_LINK: u32 = 20;
const DEFAULT_FAST_LIMIT: u32 = 5;
const SSTHRESH_INIT: u16 = 2;
const SSTHRESH_MIN: u16 = 2;

/// Initial wait before probing a closed remote window, in ms.
const PROBE_INIT: u32 = 7_000;
/// Ceiling on the probe backoff, in ms.
const PROBE_LIMIT: u32 = 120_000;

/// The fragment index is one byte, so a message may span at most this many
/// segments.
const MAX_FRAGMENTS: usize = 255;

/// A window probe request is due on the next flush.
const PROBE_ASK: u32 = 0x01;
/// A window advertisement is due on the next flush.
const PROBE_TELL: u32 = 0x02;

/// The downstream half of a connection: accepts finished datagrams for
/// delivery toward the peer.
///
/// Implementations typically capture a socket and a peer address. The sink is
/// invoked synchronously from within [`Connection::flush`]. The return value
/// reports bytes accepted; failures are logged by the connection and
/// otherwise ignored, since retransmission already covers lost datagrams.
pub trait Output {
    fn transmit(&mut self, datagram: &[u8]) -> io::Result<usize>;
}

impl<F> Output for F
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    fn transmit(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self(datagram)
    }
}

/// The control block for one conversation.
///
/// All operations mutate the block and must be serialized by the caller; the
/// block is single-threaded by design and contains no locking. Multi-session
/// servers own many blocks and shard them however they like.
#[derive(Debug)]
pub struct Connection<O: Output> {
    /// Conversation id carried by every segment in both directions.
    conv: u32,
    /// Largest datagram handed to the output sink.
    mtu: usize,
    /// Largest payload one segment may carry, `mtu` less the header.
    mss: usize,
    state: State,

    /// Lowest sequence number sent but not yet acknowledged.
    snd_una: u32,
    /// Next sequence number to assign to an outgoing segment.
    snd_nxt: u32,
    /// Next sequence number expected from the peer.
    rcv_nxt: u32,

    /// Configured send window, in segments.
    snd_wnd: u16,
    /// Configured receive window, in segments.
    rcv_wnd: u16,
    /// The peer's most recently advertised receive window.
    rmt_wnd: u16,
    /// Congestion window, in segments.
    cwnd: u16,
    /// Slow-start threshold, in segments.
    ssthresh: u16,
    /// Congestion window growth accumulator, in bytes.
    incr: usize,

    /// Smoothed round-trip time, in ms. Zero until the first sample.
    srtt: u32,
    /// Round-trip time variance, in ms.
    rttval: u32,
    /// Current retransmission timeout, in ms.
    rto: u32,
    min_rto: u32,

    /// Pending probe commands, a combination of [`PROBE_ASK`] and
    /// [`PROBE_TELL`].
    probe: u32,
    /// When the next window probe may be sent.
    ts_probe: u32,
    /// Current probe backoff, in ms. Zero while the remote window is open.
    probe_wait: u32,

    /// The caller's clock as of the last `update`, in ms.
    current: u32,
    /// Flush cadence, in ms.
    interval: u32,
    /// When the next periodic flush is due.
    ts_flush: u32,
    /// Whether `update` has ever run. Flushing is meaningless before it has.
    updated: bool,

    /// Messages accepted from the caller, fragmented but not yet admitted to
    /// the send window. No sequence numbers yet.
    snd_queue: VecDeque<Segment>,
    /// Segments in flight, ordered by sequence number.
    snd_buf: VecDeque<Transmit>,
    /// Out-of-order arrivals staged until the gap before them fills,
    /// ordered by sequence number.
    rcv_buf: VecDeque<Segment>,
    /// In-order segments ready for `recv`.
    rcv_queue: VecDeque<Segment>,

    /// Acknowledgements owed to the peer, `(sn, ts)` in reception order.
    acks: Vec<(u32, u32)>,

    /// Staging buffer for outbound datagrams, drained to the sink whenever
    /// the next segment would push it past `mtu`.
    scratch: BytesMut,

    nodelay: bool,
    /// Duplicate-ack count that triggers a fast retransmit. Zero disables.
    fastresend: u32,
    /// Most transmissions a segment may have and still fast-retransmit.
    /// Zero means unlimited.
    fastlimit: u32,
    /// Disables the congestion window when set.
    nocwnd: bool,
    /// Stream mode: coalesce sends and give up message boundaries.
    stream: bool,
    /// Transmission count at which the link is declared dead.
    dead_link: u32,
    /// Total timeout retransmissions over the life of the connection.
    xmit: u32,

    output: O,
}

impl<O: Output> Connection<O> {
    /// Creates a connection in message mode: each `send` is delivered as one
    /// `recv` on the peer. Both endpoints must use the same `conv`.
    pub fn new(conv: u32, output: O) -> Self {
        Self::with_mode(conv, output, false)
    }

    /// Creates a connection in stream mode: message boundaries are not
    /// preserved and small sends coalesce into shared segments.
    pub fn new_stream(conv: u32, output: O) -> Self {
        Self::with_mode(conv, output, true)
    }

    fn with_mode(conv: u32, output: O, stream: bool) -> Self {
        let mss = DEFAULT_MTU - HEADER_LEN;
        Self {
            conv,
            mtu: DEFAULT_MTU,
            mss,
            state: State::Alive,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            snd_wnd: DEFAULT_WINDOW,
            rcv_wnd: DEFAULT_WINDOW,
            rmt_wnd: DEFAULT_WINDOW,
            cwnd: 1,
            ssthresh: SSTHRESH_INIT,
            incr: mss,
            srtt: 0,
            rttval: 0,
            rto: RTO_DEFAULT,
            min_rto: RTO_MIN,
            probe: 0,
            ts_probe: 0,
            probe_wait: 0,
            current: 0,
            interval: DEFAULT_INTERVAL,
            ts_flush: DEFAULT_INTERVAL,
            updated: false,
            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            acks: Vec::new(),
            scratch: BytesMut::with_capacity((DEFAULT_MTU + HEADER_LEN) * 3),
            nodelay: false,
            fastresend: 0,
            fastlimit: DEFAULT_FAST_LIMIT,
            nocwnd: false,
            stream,
            dead_link: DEFAULT_DEAD_LINK,
            xmit: 0,
            output,
        }
    }

    /// Accepts a message for transmission.
    ///
    /// The message is fragmented into segments of at most [`mss`](Self::mss)
    /// bytes and queued; sequence numbers are assigned later, when the send
    /// window admits the fragments during a flush. Returns the number of
    /// bytes accepted, which is the whole message on success.
    pub fn send(&mut self, mut data: &[u8]) -> Result<usize, Error> {
        let mut accepted = 0;

        // In stream mode, top up the queue tail before cutting new segments.
        // Only queued segments may grow this way; once a segment enters the
        // send buffer its sequence number and length are fixed.
        if self.stream {
            if let Some(tail) = self.snd_queue.back_mut() {
                if tail.payload.len() < self.mss {
                    let take = (self.mss - tail.payload.len()).min(data.len());
                    let (head, rest) = data.split_at(take);
                    tail.payload.extend_from_slice(head);
                    tail.header.frg = 0;
                    data = rest;
                    accepted += take;
                }
            }
            if data.is_empty() {
                return Ok(accepted);
            }
        }

        let fragments = if data.len() <= self.mss {
            1
        } else {
            (data.len() + self.mss - 1) / self.mss
        };
        if fragments >= MAX_FRAGMENTS {
            tracing::debug!(
                bytes = data.len(),
                mss = self.mss,
                "send rejected, message too large"
            );
            return Err(Error::OversizedMessage { fragments });
        }

        for i in 0..fragments {
            let take = self.mss.min(data.len());
            let (chunk, rest) = data.split_at(take);
            let header = Header {
                conv: self.conv,
                cmd: Command::Push,
                frg: if self.stream {
                    0
                } else {
                    (fragments - 1 - i) as u8
                },
                wnd: 0,
                ts: 0,
                sn: 0,
                una: 0,
                len: chunk.len() as u32,
            };
            self.snd_queue
                .push_back(Segment::new(header, BytesMut::from(chunk)));
            data = rest;
            accepted += take;
        }

        Ok(accepted)
    }

    /// The size of the next message `recv` would deliver, without consuming
    /// it. [`Error::WouldBlock`] until a complete message is staged.
    pub fn peek_size(&self) -> Result<usize, Error> {
        let front = self.rcv_queue.front().ok_or(Error::WouldBlock)?;
        if front.header.frg == 0 {
            return Ok(front.payload.len());
        }
        if self.rcv_queue.len() < front.header.frg as usize + 1 {
            return Err(Error::WouldBlock);
        }
        let mut size = 0;
        for segment in &self.rcv_queue {
            size += segment.payload.len();
            if segment.header.frg == 0 {
                break;
            }
        }
        Ok(size)
    }

    /// Delivers the next complete message into `buf`, returning its length.
    ///
    /// Non-blocking: [`Error::WouldBlock`] when nothing is ready, and
    /// [`Error::BufferTooSmall`] with the required size when `buf` cannot
    /// hold the message.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = self.peek_size()?;
        if size > buf.len() {
            return Err(Error::BufferTooSmall {
                required: size,
                provided: buf.len(),
            });
        }

        let was_full = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut copied = 0;
        while let Some(segment) = self.rcv_queue.pop_front() {
            buf[copied..copied + segment.payload.len()].copy_from_slice(&segment.payload);
            copied += segment.payload.len();
            tracing::trace!(sn = segment.header.sn, "recv");
            if segment.header.frg == 0 {
                break;
            }
        }
        debug_assert_eq!(copied, size);

        self.promote_contiguous();

        // The queue was full and has room again: have the next flush tell
        // the peer its window is back.
        if was_full && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe |= PROBE_TELL;
        }

        Ok(copied)
    }

    /// Feeds one inbound datagram, a train of back-to-back segments.
    ///
    /// Acknowledgements slide the send window and feed the RTT estimator,
    /// data segments are staged and promoted for `recv`, and window probes
    /// arm replies for the next flush. A malformed segment aborts parsing of
    /// the rest of the datagram; whatever was already parsed stays applied.
    pub fn input(&mut self, data: &[u8]) -> Result<(), Error> {
        tracing::trace!(bytes = data.len(), "input");

        if data.len() < HEADER_LEN {
            return Err(Error::BadFormat(WireError::HeaderTooShort));
        }

        let prior_una = self.snd_una;
        let mut max_ack: Option<(u32, u32)> = None;

        let mut buf = data;
        while buf.len() >= HEADER_LEN {
            let header = Header::read(&mut buf)?;
            if header.conv != self.conv {
                return Err(Error::ConvMismatch {
                    expected: self.conv,
                    found: header.conv,
                });
            }
            let len = header.len as usize;
            if buf.len() < len {
                return Err(Error::BadFormat(WireError::TruncatedPayload {
                    declared: len,
                    remaining: buf.len(),
                }));
            }

            self.rmt_wnd = header.wnd;
            self.apply_cumulative_ack(header.una);
            self.advance_send_base();

            match header.cmd {
                Command::Ack => {
                    let rtt = seq_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.update_rtt(rtt as u32);
                    }
                    self.remove_acked(header.sn);
                    self.advance_send_base();
                    max_ack = match max_ack {
                        None => Some((header.sn, header.ts)),
                        Some((sn, ts))
                            if seq_diff(header.sn, sn) > 0 && seq_diff(header.ts, ts) > 0 =>
                        {
                            Some((header.sn, header.ts))
                        }
                        keep => keep,
                    };
                    tracing::trace!(sn = header.sn, rtt, rto = self.rto, "ack");
                }
                Command::Push => {
                    tracing::trace!(sn = header.sn, ts = header.ts, "push");
                    if seq_lt(header.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd as u32)) {
                        // Acknowledge even duplicates; the peer may have
                        // missed the earlier ack.
                        self.acks.push((header.sn, header.ts));
                        if seq_leq(self.rcv_nxt, header.sn) {
                            let payload = BytesMut::from(&buf[..len]);
                            self.stage(Segment::new(header, payload));
                        }
                    }
                }
                Command::WindowProbe => {
                    tracing::trace!("window probe");
                    self.probe |= PROBE_TELL;
                }
                Command::WindowUpdate => {
                    // The window itself arrived in the header's wnd field.
                    tracing::trace!(wnd = header.wnd, "window update");
                }
            }

            buf = &buf[len..];
        }

        if let Some((sn, ts)) = max_ack {
            self.tally_fast_acks(sn, ts);
        }

        if seq_lt(prior_una, self.snd_una) {
            self.grow_congestion_window();
        }

        Ok(())
    }

    /// Drives the clock forward and flushes when the tick is due.
    ///
    /// Call this repeatedly, either every 10 to 100 ms or at the time
    /// [`check`](Connection::check) suggests. `current` must come from a
    /// monotonic millisecond clock shared with nothing else.
    pub fn update(&mut self, current: u32) {
        self.current = current;

        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut since_flush = seq_diff(self.current, self.ts_flush);

        // A clock jump of more than ten seconds in either direction forces
        // the tick schedule to resync.
        if since_flush >= 10_000 || since_flush < -10_000 {
            self.ts_flush = self.current;
            since_flush = 0;
        }

        if since_flush >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if seq_diff(self.current, self.ts_flush) >= 0 {
                self.ts_flush = self.current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// When the caller must next invoke [`update`](Connection::update), as an
    /// absolute time on the caller's clock.
    ///
    /// Returns `current` when an update is already due. The answer accounts
    /// for the flush cadence and the earliest pending retransmission, so an
    /// event loop can sleep exactly until work exists instead of polling.
    pub fn check(&self, current: u32) -> u32 {
        if !self.updated {
            return current;
        }

        let mut ts_flush = self.ts_flush;
        if seq_diff(current, ts_flush) >= 10_000 || seq_diff(current, ts_flush) < -10_000 {
            ts_flush = current;
        }
        if seq_diff(current, ts_flush) >= 0 {
            return current;
        }

        let until_flush = seq_diff(ts_flush, current) as u32;
        let mut until_resend = u32::MAX;
        for transmit in &self.snd_buf {
            let until = seq_diff(transmit.resend_at, current);
            if until <= 0 {
                return current;
            }
            until_resend = until_resend.min(until as u32);
        }

        current.wrapping_add(until_flush.min(until_resend).min(self.interval))
    }

    /// Runs one output pass: pending acks, window probes, newly admitted
    /// segments, and due retransmissions, all coalesced into mtu-sized
    /// datagrams. A no-op until `update` has run at least once.
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }

        let wnd_unused = self.unused_recv_window();
        let template = Header {
            conv: self.conv,
            cmd: Command::Ack,
            frg: 0,
            wnd: wnd_unused,
            ts: 0,
            sn: 0,
            una: self.rcv_nxt,
            len: 0,
        };

        // Owed acknowledgements, one header each.
        for &(sn, ts) in &self.acks {
            if self.scratch.len() + HEADER_LEN > self.mtu {
                flush_scratch(&mut self.output, &mut self.scratch);
            }
            Header { sn, ts, ..template }.write(&mut self.scratch);
        }
        self.acks.clear();

        self.schedule_window_probe();

        if self.probe & PROBE_ASK != 0 {
            if self.scratch.len() + HEADER_LEN > self.mtu {
                flush_scratch(&mut self.output, &mut self.scratch);
            }
            Header {
                cmd: Command::WindowProbe,
                ..template
            }
            .write(&mut self.scratch);
        }
        if self.probe & PROBE_TELL != 0 {
            if self.scratch.len() + HEADER_LEN > self.mtu {
                flush_scratch(&mut self.output, &mut self.scratch);
            }
            Header {
                cmd: Command::WindowUpdate,
                ..template
            }
            .write(&mut self.scratch);
        }
        self.probe = 0;

        let mut window = self.snd_wnd.min(self.rmt_wnd);
        if !self.nocwnd {
            window = window.min(self.cwnd);
        }

        // Admit queued segments while the window has room, assigning
        // sequence numbers in order.
        while seq_lt(self.snd_nxt, self.snd_una.wrapping_add(window as u32)) {
            match self.snd_queue.pop_front() {
                Some(mut segment) => {
                    segment.header.conv = self.conv;
                    segment.header.cmd = Command::Push;
                    segment.header.wnd = wnd_unused;
                    segment.header.ts = self.current;
                    segment.header.sn = self.snd_nxt;
                    segment.header.una = self.rcv_nxt;
                    self.snd_nxt = self.snd_nxt.wrapping_add(1);
                    self.snd_buf.push_back(Transmit::new(segment, self.rto));
                }
                None => break,
            }
        }

        let resend_threshold = if self.fastresend > 0 {
            self.fastresend
        } else {
            u32::MAX
        };

        let mut lost = false;
        let mut change = 0u32;

        for transmit in &mut self.snd_buf {
            let mut needs_send = false;

            if transmit.transmissions == 0 {
                // First transmission.
                needs_send = true;
                transmit.transmissions = 1;
                transmit.rto = self.rto;
                transmit.resend_at = self.current.wrapping_add(transmit.rto + self.interval);
            } else if seq_leq(transmit.resend_at, self.current) {
                // Timed out.
                needs_send = true;
                transmit.transmissions += 1;
                self.xmit += 1;
                let growth = transmit.rto.max(self.rto);
                transmit.rto = transmit
                    .rto
                    .saturating_add(if self.nodelay { growth / 2 } else { growth });
                transmit.resend_at = self.current.wrapping_add(transmit.rto);
                lost = true;
                tracing::debug!(
                    sn = transmit.segment.header.sn,
                    rto = transmit.rto,
                    "timeout retransmit"
                );
            } else if transmit.fast_acks >= resend_threshold
                && (self.fastlimit == 0 || transmit.transmissions <= self.fastlimit)
            {
                // Enough later segments were acknowledged past this one.
                needs_send = true;
                transmit.transmissions += 1;
                transmit.fast_acks = 0;
                transmit.resend_at = self.current.wrapping_add(transmit.rto);
                change += 1;
                tracing::debug!(sn = transmit.segment.header.sn, "fast retransmit");
            }

            if needs_send {
                transmit.segment.header.ts = self.current;
                transmit.segment.header.wnd = wnd_unused;
                transmit.segment.header.una = self.rcv_nxt;

                if self.scratch.len() + transmit.segment.wire_len() > self.mtu {
                    flush_scratch(&mut self.output, &mut self.scratch);
                }
                transmit.segment.write(&mut self.scratch);

                if transmit.transmissions >= self.dead_link {
                    self.state = State::DeadLink;
                }
            }
        }

        flush_scratch(&mut self.output, &mut self.scratch);

        // Congestion response. A fast retransmit halves the threshold
        // against the inflight count; a timeout collapses the window to one
        // segment and restarts slow start.
        if change > 0 {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.ssthresh = ((inflight / 2) as u16).max(SSTHRESH_MIN);
            self.cwnd = self.ssthresh + resend_threshold as u16;
            self.incr = self.cwnd as usize * self.mss;
        }
        if lost {
            self.ssthresh = (window / 2).max(SSTHRESH_MIN);
            self.cwnd = 1;
            self.incr = self.mss;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss;
        }
    }

    /// Changes the MTU. The default is 1400 bytes.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), Error> {
        if mtu < MIN_MTU {
            return Err(Error::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        self.mss = mtu - HEADER_LEN;
        let target = (mtu + HEADER_LEN) * 3;
        if target > self.scratch.capacity() {
            self.scratch.reserve(target - self.scratch.capacity());
        }
        Ok(())
    }

    /// Sets the send and receive windows, in segments. Zero leaves a side
    /// unchanged. The receive window is floored at 128 segments so window
    /// probing and long fragment trains keep working.
    pub fn set_window(&mut self, send: u16, recv: u16) {
        if send > 0 {
            self.snd_wnd = send;
        }
        if recv > 0 {
            self.rcv_wnd = recv.max(WINDOW_FLOOR);
        }
    }

    /// Configures the latency profile in one call.
    ///
    /// `nodelay` tightens the minimum RTO and slows RTO growth on timeouts.
    /// `interval` is the flush cadence in ms, clamped to `[10, 5000]`.
    /// `resend` enables fast retransmit after that many duplicate acks, zero
    /// disables. `no_congestion` turns the congestion window off entirely.
    ///
    /// The lowest-latency profile is `set_nodelay(true, 10, 2, true)`.
    pub fn set_nodelay(&mut self, nodelay: bool, interval: u32, resend: u32, no_congestion: bool) {
        self.nodelay = nodelay;
        self.min_rto = if nodelay { RTO_NODELAY_MIN } else { RTO_MIN };
        self.set_interval(interval);
        self.fastresend = resend;
        self.nocwnd = no_congestion;
    }

    /// Sets the flush cadence in ms, clamped to `[10, 5000]`.
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.clamp(10, 5000);
    }

    /// Overrides the minimum retransmission timeout.
    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.min_rto = min_rto;
    }

    /// Sets the duplicate-ack count that triggers a fast retransmit. Zero
    /// disables fast retransmission.
    pub fn set_fast_resend(&mut self, resend: u32) {
        self.fastresend = resend;
    }

    /// Sets the transmission count at which the link is declared dead.
    pub fn set_dead_link(&mut self, threshold: u32) {
        self.dead_link = threshold;
    }

    /// Segments accepted but not yet acknowledged, across the queue and the
    /// send buffer. Callers throttle by watching this.
    pub fn wait_send(&self) -> usize {
        self.snd_queue.len() + self.snd_buf.len()
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest payload one segment may carry.
    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether retransmission of some segment has exceeded the dead-link
    /// threshold. A dead connection should be discarded by the caller.
    pub fn is_dead_link(&self) -> bool {
        self.state == State::DeadLink
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn send_window(&self) -> u16 {
        self.snd_wnd
    }

    pub fn recv_window(&self) -> u16 {
        self.rcv_wnd
    }

    /// The peer's most recently advertised receive window.
    pub fn remote_window(&self) -> u16 {
        self.rmt_wnd
    }

    /// Total timeout retransmissions over the life of the connection.
    pub fn total_retransmits(&self) -> u32 {
        self.xmit
    }

    /// Drops every send-buffer segment the cumulative ack covers.
    fn apply_cumulative_ack(&mut self, una: u32) {
        while let Some(transmit) = self.snd_buf.front() {
            if seq_lt(transmit.segment.header.sn, una) {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    /// Re-derives `snd_una` from the send buffer head.
    fn advance_send_base(&mut self) {
        self.snd_una = match self.snd_buf.front() {
            Some(transmit) => transmit.segment.header.sn,
            None => self.snd_nxt,
        };
    }

    /// Removes the selectively acknowledged segment. Acks outside
    /// `[snd_una, snd_nxt)` are ignored.
    fn remove_acked(&mut self, sn: u32) {
        if seq_lt(sn, self.snd_una) || seq_leq(self.snd_nxt, sn) {
            return;
        }
        for i in 0..self.snd_buf.len() {
            match seq_diff(sn, self.snd_buf[i].segment.header.sn) {
                0 => {
                    self.snd_buf.remove(i);
                    break;
                }
                d if d < 0 => break,
                _ => {}
            }
        }
    }

    /// Counts the highest ack of this input against every older segment
    /// still waiting, so the flush pass can retransmit ahead of the timeout.
    fn tally_fast_acks(&mut self, sn: u32, ts: u32) {
        if seq_lt(sn, self.snd_una) || seq_leq(self.snd_nxt, sn) {
            return;
        }
        for transmit in &mut self.snd_buf {
            if seq_lt(sn, transmit.segment.header.sn) {
                break;
            }
            if sn != transmit.segment.header.sn && seq_leq(transmit.segment.header.ts, ts) {
                transmit.fast_acks += 1;
            }
        }
    }

    /// Inserts a received segment into the staging buffer in sequence order,
    /// dropping duplicates, then promotes whatever became contiguous.
    fn stage(&mut self, segment: Segment) {
        let sn = segment.header.sn;
        if seq_leq(self.rcv_nxt.wrapping_add(self.rcv_wnd as u32), sn) || seq_lt(sn, self.rcv_nxt)
        {
            return;
        }

        let mut repeat = false;
        let mut index = self.rcv_buf.len();
        for staged in self.rcv_buf.iter().rev() {
            if staged.header.sn == sn {
                repeat = true;
                break;
            }
            if seq_lt(staged.header.sn, sn) {
                break;
            }
            index -= 1;
        }

        if repeat {
            tracing::trace!(sn, "duplicate segment dropped");
        } else {
            self.rcv_buf.insert(index, segment);
        }

        self.promote_contiguous();
    }

    /// Moves the contiguous run at the head of the staging buffer into the
    /// receive queue, stopping when the queue fills its window.
    fn promote_contiguous(&mut self) {
        while self.rcv_queue.len() < self.rcv_wnd as usize {
            match self.rcv_buf.front() {
                Some(front) if front.header.sn == self.rcv_nxt => {}
                _ => break,
            }
            if let Some(segment) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(segment);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    /// Folds one RTT sample into the smoothed estimate and recomputes the
    /// retransmission timeout.
    fn update_rtt(&mut self, sample: u32) {
        if self.srtt == 0 {
            self.srtt = sample;
            self.rttval = sample / 2;
        } else {
            let delta = sample.abs_diff(self.srtt);
            self.rttval = (3 * self.rttval + delta) / 4;
            self.srtt = ((7 * self.srtt + sample) / 8).max(1);
        }
        let rto = self.srtt + self.interval.max(4 * self.rttval);
        self.rto = rto.clamp(self.min_rto, RTO_MAX);
    }

    /// Opens the congestion window after cumulative-ack progress: slow start
    /// below the threshold, roughly one segment per round trip above it.
    fn grow_congestion_window(&mut self) {
        if self.cwnd >= self.rmt_wnd {
            return;
        }
        let mss = self.mss;
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            self.incr += mss * mss / self.incr + mss / 16;
            if (self.cwnd as usize + 1) * mss <= self.incr {
                self.cwnd = ((self.incr + mss - 1) / mss.max(1)) as u16;
            }
        }
        if self.cwnd > self.rmt_wnd {
            self.cwnd = self.rmt_wnd;
            self.incr = self.rmt_wnd as usize * mss;
        }
    }

    /// Schedules window probing while the peer advertises a closed window:
    /// seven seconds before the first probe, half again longer after each,
    /// capped at two minutes. Resets as soon as the window reopens.
    fn schedule_window_probe(&mut self) {
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = self.current.wrapping_add(self.probe_wait);
            } else if seq_diff(self.current, self.ts_probe) >= 0 {
                if self.probe_wait < PROBE_INIT {
                    self.probe_wait = PROBE_INIT;
                }
                self.probe_wait += self.probe_wait / 2;
                if self.probe_wait > PROBE_LIMIT {
                    self.probe_wait = PROBE_LIMIT;
                }
                self.ts_probe = self.current.wrapping_add(self.probe_wait);
                self.probe |= PROBE_ASK;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }
    }

    /// Receive-queue slack advertised to the peer, in segments.
    fn unused_recv_window(&self) -> u16 {
        (self.rcv_wnd as usize).saturating_sub(self.rcv_queue.len()) as u16
    }
}

/// Hands the staged datagram to the sink and clears the stage. Sink failures
/// are logged and swallowed; retransmission already covers the loss.
fn flush_scratch<O: Output>(output: &mut O, scratch: &mut BytesMut) {
    if scratch.is_empty() {
        return;
    }
    if let Err(error) = output.transmit(scratch) {
        tracing::warn!(%error, "output sink rejected a datagram");
    }
    scratch.clear();
}
