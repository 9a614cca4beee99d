//! Plain-text administrative queries over UDP.

use crate::aggregate::Aggregator;
use crate::config::ControlConfig;
use crate::error::{AppError, Result};
use crate::logging::LogLevel;
use crate::sink::SinkSet;
use crate::stats::Stats;
use std::fmt::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{error, info};

/// Largest request or response datagram.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Last,
    Stats,
    Average,
    Energy,
    Priority,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Help,
        Command::Last,
        Command::Stats,
        Command::Average,
        Command::Energy,
        Command::Priority,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Last => "last",
            Command::Stats => "stats",
            Command::Average => "average",
            Command::Energy => "energy",
            Command::Priority => "priority",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Command::Help => "this message",
            Command::Last => "last frame received",
            Command::Stats => "current statistics",
            Command::Average => "power averages over the last 1/5/30 minutes",
            Command::Energy => "energy consumption over the last days and hours",
            Command::Priority => "change the logging priority",
        }
    }

    /// First command whose key prefixes the request.
    pub fn lookup(request: &str) -> Option<Command> {
        Command::ALL
            .into_iter()
            .find(|c| request.starts_with(c.key()))
    }
}

/// What a request may look at or change.
pub struct ControlContext<'a> {
    pub aggregator: &'a Aggregator,
    pub stats: &'a Stats,
    pub sinks: &'a SinkSet,
    pub log: &'a mut LogLevel,
    pub serial_timeout: Duration,
}

/// Answer one request.
pub fn respond(request: &str, ctx: &mut ControlContext<'_>) -> String {
    let Some(cmd) = Command::lookup(request) else {
        return "unknown command\n".to_string();
    };
    handle(cmd, request, ctx).unwrap_or_else(|| format!("command '{}' failed\n", cmd.key()))
}

fn handle(cmd: Command, request: &str, ctx: &mut ControlContext<'_>) -> Option<String> {
    match cmd {
        Command::Help => {
            let mut out = String::new();
            for c in Command::ALL {
                let _ = writeln!(out, "{:<12} {}", c.key(), c.help());
            }
            Some(out)
        }
        Command::Last => Some(match ctx.aggregator.last() {
            Some(frame) => frame.to_string(),
            None => "no last frame\n".to_string(),
        }),
        Command::Stats => Some(
            ctx.stats
                .report(ctx.aggregator, ctx.sinks, ctx.serial_timeout),
        ),
        Command::Average => Some(format!(
            "averages 1/5/30: {}\n",
            ctx.aggregator.averages()
        )),
        Command::Energy => Some(ctx.aggregator.energy_report().to_string()),
        Command::Priority => {
            let name = priority_argument(request)?;
            match ctx.log.set(name) {
                Ok(p) => Some(format!("New priority is : {}\n", p.name())),
                Err(e) => {
                    error!("{}", e);
                    None
                }
            }
        }
    }
}

/// Lowercase word following `priority`.
fn priority_argument(request: &str) -> Option<&str> {
    let rest = request.strip_prefix("priority")?;
    let rest = rest.strip_prefix(|c: char| c.is_ascii_whitespace())?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Bound control endpoint.
pub struct ControlSocket {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl ControlSocket {
    pub async fn bind(cfg: &ControlConfig) -> Result<Self> {
        let addr = format!("{}:{}", cfg.bind, cfg.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| AppError::Control(format!("bind {} failed: {}", addr, e)))?;
        info!("listening on UDP port '{}'", addr);
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Next request, lossily decoded. Cancel safe.
    pub async fn recv(&mut self) -> Result<(String, SocketAddr)> {
        let (n, peer) = self.socket.recv_from(&mut self.buf).await?;
        info!("received {} bytes from {}", n, peer);
        Ok((String::from_utf8_lossy(&self.buf[..n]).into_owned(), peer))
    }

    pub async fn reply(&self, response: &str, peer: SocketAddr) -> Result<()> {
        let bytes = response.as_bytes();
        let bytes = &bytes[..bytes.len().min(MAX_DATAGRAM)];
        self.socket
            .send_to(bytes, peer)
            .await
            .map_err(|e| AppError::Control(format!("sendto({}) failed: {}", peer, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Priority;
    use pretty_assertions::assert_eq;

    fn ask(request: &str, log: &mut LogLevel) -> String {
        let aggregator = Aggregator::new();
        let stats = Stats::new();
        let sinks = SinkSet::new();
        let mut ctx = ControlContext {
            aggregator: &aggregator,
            stats: &stats,
            sinks: &sinks,
            log,
            serial_timeout: Duration::from_secs(3),
        };
        respond(request, &mut ctx)
    }

    #[test]
    fn help_lists_every_command() {
        let mut log = LogLevel::detached(Priority::Notice);
        assert_eq!(
            ask("help", &mut log),
            "help         this message\n\
             last         last frame received\n\
             stats        current statistics\n\
             average      power averages over the last 1/5/30 minutes\n\
             energy       energy consumption over the last days and hours\n\
             priority     change the logging priority\n"
        );
    }

    #[test]
    fn prefix_matching() {
        let mut log = LogLevel::detached(Priority::Notice);
        assert_eq!(ask("last\n", &mut log), "no last frame\n");
        assert_eq!(ask("averages please", &mut log), "averages 1/5/30: 0/0/0\n");
        assert_eq!(ask("ave", &mut log), "unknown command\n");
        assert_eq!(ask("", &mut log), "unknown command\n");
        assert!(ask("stats", &mut log).starts_with("Frames\n"));
    }

    #[test]
    fn energy_on_empty_history() {
        let mut log = LogLevel::detached(Priority::Notice);
        let out = ask("energy", &mut log);
        assert!(out.starts_with("days [00.000]: 00.000 "));
        assert!(out.contains("\nhours[00.000]: "));
    }

    #[test]
    fn priority_changes_level() {
        let mut log = LogLevel::detached(Priority::Notice);
        assert_eq!(ask("priority debug\n", &mut log), "New priority is : debug\n");
        assert_eq!(log.priority(), Priority::Debug);
        assert_eq!(ask("priority bogus", &mut log), "New priority is : warning\n");
        assert_eq!(ask("priority", &mut log), "command 'priority' failed\n");
        assert_eq!(ask("priority 42", &mut log), "command 'priority' failed\n");
    }

    #[tokio::test]
    async fn answers_over_udp() {
        let cfg = ControlConfig {
            port: 0,
            bind: "127.0.0.1".into(),
        };
        let mut server = ControlSocket::bind(&cfg).await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"help", addr).await.unwrap();

        let (request, peer) = server.recv().await.unwrap();
        assert_eq!(request, "help");
        server.reply("ok\n", peer).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ok\n");
    }
}
