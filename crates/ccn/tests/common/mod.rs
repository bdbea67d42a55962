//! Test harness: two handles joined by an in-process forwarder stub.
//!
//! The stub stands in for the daemon at the byte level: every complete
//! element written by one handle is relayed verbatim to the other. Interest
//! matching happens in the receiving handle (filters and PIT), which is all
//! these tests need.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;

use ccn::Ccn;

pub struct Forwarder {
    a: UnixStream,
    b: UnixStream,
    to_a: VecDeque<u8>,
    to_b: VecDeque<u8>,
}

impl Forwarder {
    /// Build two connected handles and the forwarder joining them.
    pub fn pair() -> (Ccn, Ccn, Forwarder) {
        let (a_client, a_fwd) = UnixStream::pair().unwrap();
        let (b_client, b_fwd) = UnixStream::pair().unwrap();
        a_fwd.set_nonblocking(true).unwrap();
        b_fwd.set_nonblocking(true).unwrap();
        let mut a = Ccn::new();
        a.connect_stream(a_client).unwrap();
        let mut b = Ccn::new();
        b.connect_stream(b_client).unwrap();
        (
            a,
            b,
            Forwarder {
                a: a_fwd,
                b: b_fwd,
                to_a: VecDeque::new(),
                to_b: VecDeque::new(),
            },
        )
    }

    /// Move pending bytes in both directions.
    pub fn pump(&mut self) {
        let mut buf = [0u8; 65536];
        loop {
            match self.a.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.to_b.extend(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        loop {
            match self.b.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.to_a.extend(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        drain(&mut self.to_b, &mut self.b);
        drain(&mut self.to_a, &mut self.a);
    }
}

fn drain(queue: &mut VecDeque<u8>, sock: &mut UnixStream) {
    while !queue.is_empty() {
        let (front, _) = queue.as_slices();
        match sock.write(front) {
            Ok(0) => break,
            Ok(n) => {
                queue.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
}

/// Interleave both handles' run loops with the forwarder for `total_ms`,
/// stopping early once `done` reports true.
pub fn run_pair<F>(
    a: &mut Ccn,
    b: &mut Ccn,
    fwd: &mut Forwarder,
    total_ms: u64,
    mut done: F,
) -> bool
where
    F: FnMut(&mut Ccn, &mut Ccn) -> bool,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(total_ms);
    while std::time::Instant::now() < deadline {
        let _ = a.run(5);
        fwd.pump();
        let _ = b.run(5);
        fwd.pump();
        if done(a, b) {
            return true;
        }
    }
    false
}
