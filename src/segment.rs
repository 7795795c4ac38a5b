use crate::wire::{Header, HEADER_LEN};
use bytes::{BufMut, BytesMut};

/// One segment: a header and its payload.
///
/// The same type flows through the whole pipeline. Segments queued by
/// [`send`](crate::Connection::send) carry only fragment metadata until the
/// flush pass assigns them a sequence number; received segments arrive fully
/// formed from the wire.
#[derive(Debug, Clone)]
pub struct Segment {
    pub header: Header,
    pub payload: BytesMut,
}

impl Segment {
    pub fn new(header: Header, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Bytes this segment occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Appends the encoded segment to `buf`. The header's length field is
    /// derived from the payload rather than trusted, since stream-mode sends
    /// may have grown the payload after the header was first filled in.
    pub fn write(&self, buf: &mut BytesMut) {
        let mut header = self.header;
        header.len = self.payload.len() as u32;
        header.write(buf);
        buf.put_slice(&self.payload);
    }
}

/// A segment sitting in the send buffer, together with its retransmission
/// state. The segment itself is what goes on the wire; the bookkeeping here
/// decides when it goes again.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub segment: Segment,
    /// Absolute time of the next retransmission, in ms.
    pub resend_at: u32,
    /// Per-segment retransmission timeout, grown on every timeout.
    pub rto: u32,
    /// How many segments sent after this one have been acknowledged while
    /// this one waits. Reaching the fast-resend threshold triggers a
    /// retransmission ahead of the timeout.
    pub fast_acks: u32,
    /// Transmission count, including the first send.
    pub transmissions: u32,
}

impl Transmit {
    pub fn new(segment: Segment, rto: u32) -> Self {
        Self {
            segment,
            resend_at: 0,
            rto,
            fast_acks: 0,
            transmissions: 0,
        }
    }
}
