use super::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

const CONV: u32 = 0x11223344;

/// An in-memory wire. Datagrams written by a connection pile up here until
/// the test carries them to the peer, so every loss, reorder, and duplicate
/// is under the test's control.
#[derive(Clone, Default)]
struct Wire {
    datagrams: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl Wire {
    fn take(&self) -> Vec<Vec<u8>> {
        self.datagrams.borrow_mut().drain(..).collect()
    }
}

impl Output for Wire {
    fn transmit(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.datagrams.borrow_mut().push_back(datagram.to_vec());
        Ok(datagram.len())
    }
}

fn pair() -> (Connection<Wire>, Wire, Connection<Wire>, Wire) {
    let wire_a = Wire::default();
    let wire_b = Wire::default();
    let a = Connection::new(CONV, wire_a.clone());
    let b = Connection::new(CONV, wire_b.clone());
    (a, wire_a, b, wire_b)
}

/// Carries every pending datagram from one side's wire into the peer.
fn deliver(from: &Wire, to: &mut Connection<Wire>) {
    for datagram in from.take() {
        to.input(&datagram).unwrap();
    }
}

#[test]
fn hello_echo() {
    //     Peer A                                Peer B
    // 1.  send "hello"
    // 2.  update  --> <PUSH sn=0 "hello">   --> recv "hello"
    // 3.          <-- <ACK sn=0><PUSH sn=0> <-- send "hello", update
    // 4.  recv "hello"
    let (mut a, wire_a, mut b, wire_b) = pair();

    a.send(b"hello").unwrap();
    a.update(0);

    deliver(&wire_a, &mut b);
    let mut buf = [0u8; 32];
    assert_eq!(b.recv(&mut buf), Ok(5));
    assert_eq!(&buf[..5], b"hello");

    b.send(b"hello").unwrap();
    b.update(1);
    deliver(&wire_b, &mut a);

    assert_eq!(a.recv(&mut buf), Ok(5));
    assert_eq!(&buf[..5], b"hello");
    // the ack that rode along cleared A's send buffer
    assert_eq!(a.wait_send(), 0);
}

#[test]
fn fragmentation_and_out_of_order_reassembly() {
    let (mut a, wire_a, mut b, _wire_b) = pair();
    a.set_mtu(60).unwrap();
    assert_eq!(a.mss(), 36);
    // keep the congestion window out of the way so both fragments go at once
    a.set_nodelay(false, 100, 0, true);

    let message = [0xAB; 72];
    a.send(&message).unwrap();
    a.update(0);

    let datagrams = wire_a.take();
    assert_eq!(datagrams.len(), 2);

    let first = Header::read(&mut &datagrams[0][..]).unwrap();
    let second = Header::read(&mut &datagrams[1][..]).unwrap();
    assert_eq!((first.frg, first.len), (1, 36));
    assert_eq!((second.frg, second.len), (0, 36));

    // the trailing fragment arrives first and has to wait in staging
    b.input(&datagrams[1]).unwrap();
    let mut buf = [0u8; 128];
    assert_eq!(b.recv(&mut buf), Err(Error::WouldBlock));
    assert_eq!(b.rcv_buf.len(), 1);

    b.input(&datagrams[0]).unwrap();
    assert_eq!(b.recv(&mut buf), Ok(72));
    assert!(buf[..72].iter().all(|&byte| byte == 0xAB));
}

#[test]
fn duplicate_acks_trigger_fast_retransmit() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    a.set_nodelay(false, 100, 2, true);

    for _ in 0..8 {
        a.send(&[0x42; 16]).unwrap();
    }
    a.update(0);
    let datagrams = wire_a.take();
    assert_eq!(datagrams.len(), 1);
    let datagram = &datagrams[0];

    // segment 0 is lost; segments 1 through 3 arrive one at a time, so each
    // ack reaches A in its own datagram
    b.update(0);
    for segment in datagram[40..].chunks(40).take(3) {
        b.input(segment).unwrap();
        b.flush();
    }
    deliver(&wire_b, &mut a);

    assert_eq!(a.snd_buf.front().unwrap().fast_acks, 3);

    a.flush();
    let retransmits = wire_a.take();
    assert_eq!(retransmits.len(), 1);
    let header = Header::read(&mut &retransmits[0][..]).unwrap();
    assert_eq!(header.sn, 0);

    let front = a.snd_buf.front().unwrap();
    assert_eq!(front.transmissions, 2);
    assert_eq!(front.fast_acks, 0);
    // eight segments were in flight when the loss was detected
    assert_eq!(a.ssthresh, 4);
    assert_eq!(a.cwnd, 6);
}

#[test]
fn timeout_retransmission_backs_off_and_kills_the_link() {
    let wire = Wire::default();
    let mut a = Connection::new(CONV, wire.clone());

    a.send(b"are you there").unwrap();
    a.update(0);
    assert_eq!(wire.take().len(), 1);

    // not due until rto + interval has passed
    a.update(100);
    a.update(200);
    assert!(wire.take().is_empty());

    a.update(300);
    assert_eq!(wire.take().len(), 1);
    let front = a.snd_buf.front().unwrap();
    assert_eq!(front.transmissions, 2);
    assert!(front.rto >= 400);

    // every further timeout doubles the backoff until the link is declared
    // dead at the twentieth transmission
    let mut now = 300;
    while !a.is_dead_link() && now < 300_000_000 {
        now += 5_000;
        a.update(now);
    }
    assert_eq!(a.state(), State::DeadLink);
    assert_eq!(a.snd_buf.front().unwrap().transmissions, 20);
    assert_eq!(a.total_retransmits(), 19);
}

#[test]
fn zero_window_probing_and_recovery() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    // a one-segment receive window, below anything set_window would allow
    a.rcv_wnd = 1;

    b.set_nodelay(false, 100, 0, true);
    b.send(b"one").unwrap();
    b.send(b"two").unwrap();
    b.update(0);
    deliver(&wire_b, &mut a);

    // the first message fills the queue; the second waits in staging
    assert_eq!(a.rcv_queue.len(), 1);
    assert_eq!(a.rcv_buf.len(), 1);

    // A's acks advertise a closed window
    a.update(0);
    deliver(&wire_a, &mut b);
    assert_eq!(b.remote_window(), 0);
    assert_eq!(b.wait_send(), 0);

    // with the window closed B schedules a probe seven seconds out
    b.update(100);
    assert!(wire_b.take().is_empty());
    b.update(7_200);
    let probes = wire_b.take();
    assert_eq!(probes.len(), 1);
    let header = Header::read(&mut &probes[0][..]).unwrap();
    assert_eq!(header.cmd, Command::WindowProbe);
    a.input(&probes[0]).unwrap();

    // draining the queue reopens the window
    let mut buf = [0u8; 16];
    assert_eq!(a.recv(&mut buf), Ok(3));
    assert_eq!(&buf[..3], b"one");
    assert_eq!(a.recv(&mut buf), Ok(3));
    assert_eq!(&buf[..3], b"two");

    a.update(7_300);
    let replies = wire_a.take();
    assert_eq!(replies.len(), 1);
    let header = Header::read(&mut &replies[0][..]).unwrap();
    assert_eq!(header.cmd, Command::WindowUpdate);
    assert_eq!(header.wnd, 1);

    b.input(&replies[0]).unwrap();
    assert_eq!(b.remote_window(), 1);
}

#[test]
fn stream_mode_coalesces_small_sends() {
    let wire_a = Wire::default();
    let wire_b = Wire::default();
    let mut a = Connection::new_stream(CONV, wire_a.clone());
    let mut b = Connection::new_stream(CONV, wire_b.clone());

    a.send(b"ab").unwrap();
    a.send(b"cd").unwrap();
    assert_eq!(a.wait_send(), 1);

    a.update(0);
    let datagrams = wire_a.take();
    assert_eq!(datagrams.len(), 1);
    let header = Header::read(&mut &datagrams[0][..]).unwrap();
    assert_eq!((header.cmd, header.frg, header.len), (Command::Push, 0, 4));

    b.input(&datagrams[0]).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(b.recv(&mut buf), Ok(4));
    assert_eq!(&buf, b"abcd");
}

#[test]
fn messages_arrive_in_order_with_boundaries() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    let messages: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; (i as usize + 1) * 10]).collect();
    for message in &messages {
        a.send(message).unwrap();
    }

    let mut now = 0;
    for _ in 0..20 {
        a.update(now);
        deliver(&wire_a, &mut b);
        b.update(now);
        deliver(&wire_b, &mut a);
        now += 100;
    }

    for message in &messages {
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &message[..]);
    }
}

#[test]
fn convergence_over_a_lossy_channel() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    a.set_nodelay(true, 10, 2, true);
    b.set_nodelay(true, 10, 2, true);
    let mut rng = SmallRng::seed_from_u64(7);

    let expected: Vec<u8> = (0..8000u32).map(|i| i as u8).collect();
    a.send(&expected).unwrap();

    let mut received = Vec::new();
    let mut now = 0;
    while received.len() < expected.len() && now < 120_000 {
        a.update(now);
        for datagram in wire_a.take() {
            if rng.gen::<f32>() < 0.5 {
                b.input(&datagram).unwrap();
            }
        }
        b.update(now);
        for datagram in wire_b.take() {
            if rng.gen::<f32>() < 0.5 {
                a.input(&datagram).unwrap();
            }
        }
        let mut buf = [0u8; 8192];
        if let Ok(n) = b.recv(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        now += 25;
    }

    assert_eq!(received, expected);
}

#[test]
fn duplicate_acks_are_idempotent() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    a.set_nodelay(false, 100, 0, true);
    a.send(b"first").unwrap();
    a.send(b"second").unwrap();
    a.update(42);

    // only the first segment reaches B
    let datagrams = wire_a.take();
    b.input(&datagrams[0][..29]).unwrap();
    b.update(50);

    let acks = wire_b.take();
    assert_eq!(acks.len(), 1);
    let header = Header::read(&mut &acks[0][..]).unwrap();
    assert_eq!(header.cmd, Command::Ack);
    // the ack echoes the push's transmission timestamp for RTT measurement
    assert_eq!(header.ts, 42);

    a.input(&acks[0]).unwrap();
    assert_eq!(a.snd_buf.len(), 1);
    assert_eq!(a.snd_una, 1);

    // the same ack again changes nothing
    a.input(&acks[0]).unwrap();
    assert_eq!(a.snd_buf.len(), 1);
    assert_eq!(a.snd_una, 1);
}

#[test]
fn wait_send_tracks_queue_and_buffer() {
    let (mut a, wire_a, mut b, wire_b) = pair();
    for _ in 0..4 {
        a.send(&[0; 8]).unwrap();
    }
    assert_eq!(a.wait_send(), 4);

    // the initial congestion window admits a single segment
    a.update(0);
    assert_eq!(a.snd_buf.len(), 1);
    assert_eq!(a.wait_send(), 4);

    deliver(&wire_a, &mut b);
    b.update(0);
    deliver(&wire_b, &mut a);
    assert_eq!(a.wait_send(), 3);
}

#[test]
fn oversized_message_is_rejected() {
    let wire = Wire::default();
    let mut a = Connection::new(CONV, wire);
    let message = vec![0u8; a.mss() * 255];
    assert!(matches!(
        a.send(&message),
        Err(Error::OversizedMessage { fragments: 255 })
    ));
    assert_eq!(a.wait_send(), 0);
}

#[test]
fn recv_reports_required_size() {
    let (mut a, wire_a, mut b, _wire_b) = pair();
    a.send(&[7u8; 100]).unwrap();
    a.update(0);
    deliver(&wire_a, &mut b);

    let mut small = [0u8; 10];
    assert_eq!(
        b.recv(&mut small),
        Err(Error::BufferTooSmall {
            required: 100,
            provided: 10
        })
    );

    let mut big = [0u8; 128];
    assert_eq!(b.recv(&mut big), Ok(100));
    assert_eq!(b.recv(&mut big), Err(Error::WouldBlock));
}

#[test]
fn malformed_and_foreign_datagrams_are_rejected() {
    let wire = Wire::default();
    let mut a = Connection::new(CONV, wire);

    assert_eq!(
        a.input(&[0u8; 10]),
        Err(Error::BadFormat(WireError::HeaderTooShort))
    );

    let header = Header {
        conv: 0x55667788,
        cmd: Command::Push,
        frg: 0,
        wnd: 0,
        ts: 0,
        sn: 0,
        una: 0,
        len: 0,
    };
    let mut foreign = BytesMut::new();
    header.write(&mut foreign);
    assert_eq!(
        a.input(&foreign),
        Err(Error::ConvMismatch {
            expected: CONV,
            found: 0x55667788
        })
    );

    // declared payload longer than the datagram
    let mut truncated = BytesMut::new();
    Header {
        conv: CONV,
        len: 64,
        ..header
    }
    .write(&mut truncated);
    assert!(matches!(
        a.input(&truncated),
        Err(Error::BadFormat(WireError::TruncatedPayload { .. }))
    ));
}

#[test]
fn pushes_beyond_the_receive_window_are_dropped() {
    let wire = Wire::default();
    let mut a = Connection::new(CONV, wire);

    let mut datagram = BytesMut::new();
    Header {
        conv: CONV,
        cmd: Command::Push,
        frg: 0,
        wnd: 32,
        ts: 0,
        sn: 32,
        una: 0,
        len: 0,
    }
    .write(&mut datagram);
    a.input(&datagram).unwrap();

    // out-of-window data earns neither staging nor an ack
    assert!(a.acks.is_empty());
    assert!(a.rcv_buf.is_empty());
}

#[test]
fn check_reports_the_next_deadline() {
    let wire = Wire::default();
    let mut a = Connection::new(CONV, wire);

    // before the first update the caller should come back immediately
    assert_eq!(a.check(0), 0);

    a.update(0);
    // nothing in flight: the flush tick is the only deadline
    assert_eq!(a.check(0), 100);

    a.send(b"x").unwrap();
    a.update(100);
    // the segment is due at 400; the flush tick at 200 comes first
    assert_eq!(a.check(150), 200);
    // past the flush tick: due immediately
    assert_eq!(a.check(250), 250);
}
