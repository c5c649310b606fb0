//! The sender loop: fills the congestion window from standard input,
//! retransmits on a per-entry timer, and reacts to cumulative/duplicate
//! ACKs. Mirrors the teacher's `segment_loop`: one free-standing loop that
//! ticks outstanding entries, polls the socket briefly, and dispatches.

use std::collections::BTreeMap;
use std::io::Read;
use std::net::UdpSocket;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, info, warn};

use crate::congestion::Congestion;
use crate::err::Error;
use crate::segment::{AckReply, DecodeError, Segment, DATA_SIZE, MAX_DATAGRAM};

/// How long to wait, per retransmit-pass check, for an ACK before resending
/// an outstanding entry: `0.2 * cwnd` seconds.
const RETRANSMIT_FACTOR_SECS: f64 = 0.2;

/// Global inactivity timeout: no ACK at all for this long triggers
/// `Congestion::on_timeout`.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(1);

/// Non-blocking poll granularity on the datagram socket.
const POLL_TIMEOUT_MS: i32 = 10;

const EOF_REPEAT: usize = 5;

struct OutstandingEntry {
    segment: Segment,
    last_send: Instant,
}

pub struct Sender<R> {
    input: R,
    socket: UdpSocket,
    congestion: Congestion,
    outstanding: BTreeMap<u64, OutstandingEntry>,
    next_to_send: u64,
    input_exhausted: bool,
    eof_sent: bool,
    last_ack_time: Instant,
}

impl<R: Read> Sender<R> {
    pub fn new(input: R, socket: UdpSocket) -> Result<Self, Error> {
        socket.set_nonblocking(true)?;
        Ok(Sender {
            input,
            socket,
            congestion: Congestion::default(),
            outstanding: BTreeMap::new(),
            next_to_send: 0,
            input_exhausted: false,
            eof_sent: false,
            last_ack_time: Instant::now(),
        })
    }

    pub fn cwnd(&self) -> f64 {
        self.congestion.cwnd()
    }

    /// Drive the sender to completion. Returns once all input has been sent
    /// and acknowledged and the EOF burst has gone out.
    pub fn run(&mut self) -> Result<(), Error> {
        self.refill()?;

        loop {
            let now = Instant::now();
            self.retransmit_pass(now)?;

            if now.duration_since(self.last_ack_time) >= INACTIVITY_TIMEOUT {
                warn!("inactivity timeout, backing off congestion window");
                self.congestion.on_timeout();
                self.last_ack_time = now;
            }

            if self.eof_sent {
                info!("eof burst sent, input exhausted, terminating");
                return Ok(());
            }

            if self.poll_readable()? {
                self.receive_one()?;
            }
        }
    }

    fn poll_readable(&self) -> Result<bool, Error> {
        let mut fds = [PollFd::new(self.socket.as_raw_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, POLL_TIMEOUT_MS).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        Ok(n > 0)
    }

    fn receive_one(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(n) => match AckReply::decode(&buf[..n]) {
                Ok(reply) => self.handle_ack(reply),
                Err(DecodeError::Json(_)) | Err(DecodeError::BadChecksum) => {
                    warn!("dropping malformed ack datagram");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::Io(e)),
        }
        Ok(())
    }

    fn handle_ack(&mut self, reply: AckReply) {
        let now = Instant::now();
        self.last_ack_time = now;

        if reply.ack > reply.expected_seq {
            if self.congestion.note_duplicate(reply.expected_seq) {
                info!(hole = reply.expected_seq, "fast retransmit after triple duplicate ack");
                self.congestion.on_triple_dup_ack();
                self.retransmit_entry(reply.expected_seq, now);
            }
        } else {
            self.congestion.clear_duplicate(reply.expected_seq);
        }

        if self.outstanding.remove(&reply.ack).is_some() {
            self.congestion.on_ack();
        }

        if self.outstanding.is_empty() {
            // refill() never fails on socket send here because the loop
            // will surface the error on the next retransmit pass instead;
            // a lost ACK-triggered refill send is covered by retransmission.
            let _ = self.refill();
        }
    }

    fn retransmit_entry(&mut self, sequence: u64, now: Instant) {
        if let Some(entry) = self.outstanding.get_mut(&sequence) {
            let _ = self.socket.send(&entry.segment.encode());
            entry.last_send = now;
        }
    }

    fn retransmit_pass(&mut self, now: Instant) -> Result<(), Error> {
        let threshold = Duration::from_secs_f64(RETRANSMIT_FACTOR_SECS * self.congestion.cwnd());
        let due: Vec<u64> = self
            .outstanding
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_send) >= threshold)
            .map(|(seq, _)| *seq)
            .collect();

        for sequence in due {
            debug!(sequence, "retransmitting due entry");
            self.retransmit_entry(sequence, now);
        }
        Ok(())
    }

    /// Read `floor(cwnd)` payloads of up to `DATA_SIZE` bytes and send them,
    /// per §4.2 step 5. Only called when `outstanding` is empty.
    fn refill(&mut self) -> Result<(), Error> {
        if self.input_exhausted {
            if self.outstanding.is_empty() {
                self.send_eof_burst()?;
            }
            return Ok(());
        }

        let budget = self.congestion.cwnd().floor().max(1.0) as usize;
        for _ in 0..budget {
            let mut buf = vec![0u8; DATA_SIZE];
            let n = self.input.read(&mut buf)?;
            if n == 0 {
                self.input_exhausted = true;
                break;
            }
            buf.truncate(n);
            let data = String::from_utf8(buf)?;

            let segment = Segment::data_segment(self.next_to_send, data);
            self.socket.send(&segment.encode())?;
            self.outstanding.insert(
                self.next_to_send,
                OutstandingEntry {
                    segment,
                    last_send: Instant::now(),
                },
            );
            self.next_to_send += n as u64;
        }

        if self.input_exhausted && self.outstanding.is_empty() {
            self.send_eof_burst()?;
        }
        Ok(())
    }

    fn send_eof_burst(&mut self) -> Result<(), Error> {
        let eof = Segment::eof_segment(self.next_to_send);
        let encoded = eof.encode();
        for _ in 0..EOF_REPEAT {
            self.socket.send(&encoded)?;
        }
        info!("sent eof burst ({} segments)", EOF_REPEAT);
        self.eof_sent = true;
        Ok(())
    }
}
