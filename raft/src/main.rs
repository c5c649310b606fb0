use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{error, warn};

use raft_replica::{Error, Message, Replica};

/// RAFT replica: listens on a unix datagram socket bound to its own id and
/// exchanges append-entries/vote/client RPCs with its peers.
#[derive(Parser, Debug)]
#[command(name = "raft-replica")]
struct Args {
    /// This replica's id.
    my_id: String,
    /// Every other replica's id.
    peers: Vec<String>,
}

/// Non-blocking poll granularity on the datagram socket, matching the RDT
/// sender's own poll loop.
const POLL_TIMEOUT_MS: i32 = 10;

fn socket_path(id: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/raft-replica-{id}.sock"))
}

struct Transport {
    socket: UnixDatagram,
}

impl Transport {
    fn bind(id: &str) -> Result<Self, Error> {
        let path = socket_path(id);
        let _ = std::fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;
        socket.set_nonblocking(true)?;
        Ok(Transport { socket })
    }

    fn send(&self, msg: &Message) {
        if msg.dst == raft_replica::message::UNKNOWN_OR_BROADCAST {
            return;
        }
        let encoded = msg.encode();
        if let Err(e) = self.socket.send_to(&encoded, socket_path(&msg.dst)) {
            warn!(dst = %msg.dst, error = %e, "failed to send message");
        }
    }

    fn poll_readable(&self) -> Result<bool, Error> {
        let mut fds = [PollFd::new(self.socket.as_raw_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, POLL_TIMEOUT_MS)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(n > 0)
    }

    fn recv(&self) -> Result<Option<Message>, Error> {
        let mut buf = [0u8; 65536];
        match self.socket.recv(&mut buf) {
            Ok(n) => match Message::decode(&buf[..n]) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn run() -> Result<(), Error> {
    let args = Args::parse();
    if args.peers.is_empty() {
        return Err(Error::NoPeers);
    }

    let transport = Transport::bind(&args.my_id)?;
    let now = Instant::now();
    let mut replica = Replica::new(args.my_id, args.peers, now);

    loop {
        let now = Instant::now();
        for msg in replica.tick(now) {
            transport.send(&msg);
        }

        if transport.poll_readable()? {
            if let Some(msg) = transport.recv()? {
                let now = Instant::now();
                for reply in replica.handle_message(msg, now) {
                    transport.send(&reply);
                }
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("raft-replica: {e}");
            ExitCode::FAILURE
        }
    }
}

