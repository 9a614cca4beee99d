//! Send one control request to a running teleinfod and print the answer.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use teleinfo_ingest::control::MAX_DATAGRAM;
use tokio::net::{lookup_host, UdpSocket};

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Send requests to this host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Send requests to this UDP port
    #[arg(short, long, default_value_t = 54345)]
    port: u16,

    /// Command words, `stats` when none are given
    command: Vec<String>,
}

impl Args {
    fn request(&self) -> String {
        if self.command.is_empty() {
            "stats".to_string()
        } else {
            self.command.join(" ")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let peer = lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .with_context(|| format!("cannot resolve {}", args.host))?;
    let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(args.request().as_bytes(), peer).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (n, _) = tokio::time::timeout(REPLY_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .with_context(|| format!("no answer from {}", peer))??;
    print!("{}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}
