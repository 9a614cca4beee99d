use crate::aggregate::Aggregator;
use crate::control::{respond, ControlContext, ControlSocket};
use crate::demux::Demultiplexer;
use crate::error::{FrameError, Result};
use crate::frame::{Decoder, Frame};
use crate::logging::LogLevel;
use crate::schema::Schema;
use crate::serial::SerialPort;
use crate::sink::{SinkContext, SinkSet};
use crate::stats::Stats;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// The processing pipeline: bytes in, accepted frames out to the sinks.
pub struct Station {
    demux: Demultiplexer,
    decoder: Decoder,
    aggregator: Aggregator,
    stats: Stats,
    sinks: SinkSet,
}

impl Station {
    pub fn new(schema: Schema, sinks: SinkSet) -> Self {
        Self {
            demux: Demultiplexer::new(),
            decoder: Decoder::new(schema),
            aggregator: Aggregator::new(),
            stats: Stats::new(),
            sinks,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Demultiplex and decode `bytes`, keeping the valid frames.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            let buffer = match self.demux.consume(byte) {
                Ok(Some(buffer)) => buffer,
                Ok(None) => continue,
                Err(e) => {
                    self.stats.record_error(&e);
                    continue;
                }
            };
            match self.decoder.decode(&buffer) {
                Ok(frame) => frames.push(frame),
                Err(e) => self.reject(e),
            }
        }
        frames
    }

    fn reject(&mut self, e: FrameError) {
        warn!(error = %e, "dropping frame");
        self.stats.record_error(&e);
    }

    /// Run `bytes` through the pipeline, stamping frames with the current
    /// time. Returns the number of frames accepted.
    pub async fn ingest(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for frame in self.decode(bytes) {
            self.accept(frame, Utc::now()).await;
            accepted += 1;
        }
        accepted
    }

    /// Same as [`ingest`](Self::ingest) with every frame stamped `now`.
    pub async fn ingest_at(&mut self, bytes: &[u8], now: DateTime<Utc>) -> usize {
        let mut accepted = 0;
        for frame in self.decode(bytes) {
            self.accept(frame, now).await;
            accepted += 1;
        }
        accepted
    }

    async fn accept(&mut self, frame: Frame, now: DateTime<Utc>) {
        let history = self.aggregator.accept_at(frame, now);
        let Some(frame) = self.aggregator.last() else {
            return;
        };
        debug!(seq = frame.seq(), power = frame.power(), history, "frame accepted");
        self.stats.record_frame(frame, history);

        let ctx = SinkContext {
            averages: self.aggregator.averages(),
        };
        // failures are logged and counted by the sinks
        let _ = self.sinks.push_all(frame, &ctx).await;
    }

    pub fn report(&self, serial_timeout: Duration) -> String {
        self.stats
            .report(&self.aggregator, &self.sinks, serial_timeout)
    }

    /// Answer one control request.
    pub fn control(&mut self, request: &str, log: &mut LogLevel, serial_timeout: Duration) -> String {
        self.stats.control_requests += 1;
        let mut ctx = ControlContext {
            aggregator: &self.aggregator,
            stats: &self.stats,
            sinks: &self.sinks,
            log,
            serial_timeout,
        };
        respond(request.trim_end_matches(['\0', '\n', '\r']), &mut ctx)
    }

    /// Account a read timeout. `receiving` tells whether data was flowing
    /// before it.
    pub fn lost_signal(&mut self, receiving: bool, timeout: Duration) {
        if receiving {
            warn!("signal lost");
            self.stats.serial_rx_errors += 1;
        }
        self.stats.data_loss_secs += timeout.as_secs();
    }

    pub async fn shutdown(&mut self, serial_timeout: Duration) {
        self.sinks.fini_all().await;
        self.stats
            .log(&self.aggregator, &self.sinks, serial_timeout);
        self.aggregator.clear();
    }
}

/// Event loop over the serial line, the control socket and signals.
pub struct Daemon {
    station: Station,
    log: LogLevel,
    serial_timeout: Duration,
}

impl Daemon {
    pub fn new(station: Station, log: LogLevel, serial_timeout: Duration) -> Self {
        Self {
            station,
            log,
            serial_timeout,
        }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    /// Run until a termination signal or a fatal serial error. Sinks are
    /// initialised first and finalised on the way out.
    pub async fn run(&mut self, serial: &mut SerialPort, control: &mut ControlSocket) -> Result<()> {
        self.station.sinks.init_all().await?;

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        let timeout = self.serial_timeout;
        let mut receiving = false;
        info!(port = serial.name(), "waiting for frames");

        let res = loop {
            let started = Instant::now();
            tokio::select! {
                read = tokio::time::timeout(timeout, serial.read()) => match read {
                    Err(_) => {
                        self.station.lost_signal(receiving, timeout);
                        receiving = false;
                    }
                    Ok(Err(e)) => {
                        error!(port = serial.name(), "serial read failed: {}", e);
                        break Err(e);
                    }
                    Ok(Ok(n)) => {
                        if !receiving {
                            info!("receiving data");
                        }
                        receiving = true;
                        self.station
                            .stats
                            .record_timeout_left(timeout.saturating_sub(started.elapsed()));
                        self.station.stats.record_read(n);
                        serial.capture(n).await;
                        self.station.ingest(serial.chunk(n)).await;
                    }
                },
                req = control.recv() => match req {
                    Ok((request, peer)) => {
                        let response = self.station.control(&request, &mut self.log, timeout);
                        if let Err(e) = control.reply(&response, peer).await {
                            error!("{}", e);
                        }
                    }
                    Err(e) => error!("control request failed: {}", e),
                },
                _ = sigusr1.recv() => {
                    info!("caught SIGUSR1");
                    self.station.stats.log(&self.station.aggregator, &self.station.sinks, timeout);
                }
                _ = sigint.recv() => {
                    info!("caught SIGINT");
                    break Ok(());
                }
                _ = sigterm.recv() => {
                    info!("caught SIGTERM");
                    break Ok(());
                }
                _ = sigquit.recv() => {
                    info!("caught SIGQUIT");
                    break Ok(());
                }
            }
        };

        self.station.shutdown(timeout).await;
        res
    }
}
