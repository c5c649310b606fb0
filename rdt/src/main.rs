use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use rdt_sender::{Error, Sender};

/// Reliable data transfer sender: reads bytes from stdin, sends them over an
/// unreliable UDP channel to `HOST:PORT` with sliding-window flow control.
#[derive(Parser, Debug)]
#[command(name = "rdt-sender")]
struct Args {
    /// Destination in HOST:PORT form.
    destination: String,
}

fn resolve(destination: &str) -> Result<SocketAddr, Error> {
    destination
        .to_socket_addrs()
        .map_err(|_| Error::InvalidAddress(destination.to_string()))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(destination.to_string()))
}

fn run() -> Result<(), Error> {
    let args = Args::parse();
    let peer = resolve(&args.destination)?;

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(peer)?;

    let mut sender = Sender::new(std::io::stdin(), socket)?;
    sender.run()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("rdt-sender: {e}");
            ExitCode::FAILURE
        }
    }
}
