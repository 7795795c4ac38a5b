//! The wire image of a segment: a fixed 24-byte little-endian header
//! followed by `len` bytes of payload. Datagrams carry one or more segments
//! back to back, all with the same conversation id.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error as ThisError;

/// Bytes a header occupies on the wire.
pub const HEADER_LEN: usize = 24;

/// The command byte of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Data segment, ordered by `sn`.
    Push = 81,
    /// Selective acknowledgement of one `sn`; `ts` echoes the sender's
    /// timestamp for RTT measurement.
    Ack = 82,
    /// Ask the peer to advertise its receive window.
    WindowProbe = 83,
    /// Window advertisement; the `wnd` field carries the answer.
    WindowUpdate = 84,
}

impl TryFrom<u8> for Command {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            81 => Ok(Command::Push),
            82 => Ok(Command::Ack),
            83 => Ok(Command::WindowProbe),
            84 => Ok(Command::WindowUpdate),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

/// A decoded segment header. All multi-byte fields are little-endian on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Conversation id; both endpoints must agree on it.
    pub conv: u32,
    pub cmd: Command,
    /// Fragment index, counting down to zero for the last piece of a
    /// message.
    pub frg: u8,
    /// The sender's currently unused receive window, in segments.
    pub wnd: u16,
    /// The sender's clock at the moment of transmission, in ms.
    pub ts: u32,
    /// Segment sequence number, or the acknowledged sequence number for an
    /// ack.
    pub sn: u32,
    /// The next sequence number the sender expects to receive.
    pub una: u32,
    /// Payload length following the header.
    pub len: u32,
}

impl Header {
    /// Decodes one header, consuming [`HEADER_LEN`] bytes.
    pub fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_LEN {
            return Err(WireError::HeaderTooShort);
        }
        let conv = buf.get_u32_le();
        let cmd = Command::try_from(buf.get_u8())?;
        let frg = buf.get_u8();
        let wnd = buf.get_u16_le();
        let ts = buf.get_u32_le();
        let sn = buf.get_u32_le();
        let una = buf.get_u32_le();
        let len = buf.get_u32_le();
        Ok(Header {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }

    /// Appends the encoded header to `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }
}

/// Reads the conversation id off the front of a datagram without a
/// connection, letting a demultiplexer pick the right one before any further
/// parsing. Returns `None` when fewer than four bytes are present.
pub fn peek_conv(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("the segment header is incomplete")]
    HeaderTooShort,
    #[error("unrecognized command byte {0}")]
    UnknownCommand(u8),
    #[error("payload length {declared} overruns the {remaining} bytes left in the datagram")]
    TruncatedPayload { declared: usize, remaining: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: Header = Header {
        conv: 0x11223344,
        cmd: Command::Push,
        frg: 3,
        wnd: 120,
        ts: 5000,
        sn: 42,
        una: 17,
        len: 6,
    };

    #[test]
    fn round_trip() -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        HEADER.write(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = Header::read(&mut buf.freeze())?;
        assert_eq!(decoded, HEADER);
        Ok(())
    }

    #[test]
    fn little_endian_layout() {
        let mut buf = BytesMut::new();
        HEADER.write(&mut buf);
        assert_eq!(&buf[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(buf[4], 81);
        assert_eq!(buf[5], 3);
        assert_eq!(&buf[6..8], &[120, 0]);
    }

    #[test]
    fn peek_conv_matches_encoded_conv() {
        let mut buf = BytesMut::new();
        HEADER.write(&mut buf);
        assert_eq!(peek_conv(&buf), Some(0x11223344));
        assert_eq!(peek_conv(&buf[..3]), None);
    }

    #[test]
    fn rejects_unknown_command() {
        let mut buf = BytesMut::new();
        HEADER.write(&mut buf);
        buf[4] = 80;
        assert_eq!(
            Header::read(&mut buf.freeze()),
            Err(WireError::UnknownCommand(80))
        );
    }

    #[test]
    fn rejects_short_header() {
        let mut buf = BytesMut::new();
        HEADER.write(&mut buf);
        let mut short = buf.freeze().slice(..HEADER_LEN - 1);
        assert_eq!(Header::read(&mut short), Err(WireError::HeaderTooShort));
    }
}
