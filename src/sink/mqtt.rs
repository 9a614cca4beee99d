use super::{parse_number, RateLimit, Sink, SinkContext, SinkCounters};
use crate::error::{AppError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_TOPIC: &str = "sensors/power/teleinfo";
const DEFAULT_RATELIMIT_SECS: i64 = 60;

/// Publishes the index, the averages and the instantaneous power to an
/// MQTT broker.
pub struct MqttSink {
    host: String,
    port: u16,
    keepalive: u64,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    topic: String,
    ratelimit: RateLimit,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    eventloop: Option<JoinHandle<()>>,
    prev_power: Option<u32>,
    counters: SinkCounters,
}

impl Default for MqttSink {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive: 60,
            client_id: format!("teleinfod-{}", Uuid::new_v4()),
            username: None,
            password: None,
            topic: DEFAULT_TOPIC.to_string(),
            ratelimit: RateLimit::new(DEFAULT_RATELIMIT_SECS),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            eventloop: None,
            prev_power: None,
            counters: SinkCounters::default(),
        }
    }
}

impl MqttSink {
    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        opts.set_keep_alive(Duration::from_secs(self.keepalive));
        opts.set_clean_session(true);
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            opts.set_credentials(u.clone(), p.clone());
        }
        if self.port == 8883 {
            opts.set_transport(Transport::tls_with_default_config());
        }
        opts
    }

    /// Messages due for `frame`, in publication order. Updates the rate
    /// limit and the remembered power, and counts an unchanged power as a
    /// drop.
    pub(crate) fn plan(&mut self, frame: &Frame, ctx: &SinkContext) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let ts = frame.timestamp().unwrap_or_else(Utc::now);
        if self.ratelimit.allow(ts) {
            out.push((format!("{}/index", self.topic), frame.energy().to_string()));
            out.push((format!("{}/average", self.topic), ctx.averages.to_string()));
        }

        let power = frame.power();
        if self.prev_power == Some(power) {
            debug!(power, "power unchanged, not published");
            self.counters.dropped += 1;
        } else {
            out.push((format!("{}/power", self.topic), power.to_string()));
        }
        self.prev_power = Some(power);
        out
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn configure(&mut self, key: &str, value: &str) -> bool {
        match key {
            "host" => self.host = value.to_string(),
            "client_id" => self.client_id = value.to_string(),
            "topic" => self.topic = value.trim_end_matches('/').to_string(),
            "username" => self.username = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "port" => match parse_number(value) {
                Some(port) => self.port = port,
                None => return false,
            },
            "keepalive" => match parse_number(value) {
                Some(secs) => self.keepalive = secs,
                None => return false,
            },
            "ratelimit" => match parse_number(value) {
                Some(secs) => self.ratelimit.set_period(secs),
                None => return false,
            },
            // accepted for compatibility with older configs, never used
            "threshold" => debug!(value, "ignoring mqtt threshold"),
            _ => return false,
        }
        true
    }

    async fn init(&mut self) -> Result<()> {
        if self.host.is_empty() {
            return Err(AppError::Config("mqtt sink needs a host".into()));
        }
        info!(host = %self.host, port = self.port, client_id = %self.client_id, "connecting to MQTT broker");
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        let connected = self.connected.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                        connected.store(true, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.swap(false, Ordering::Relaxed) {
                            warn!("MQTT connection lost: {}", e);
                        } else {
                            debug!("MQTT event loop error: {}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        self.client = Some(client);
        self.eventloop = Some(handle);
        Ok(())
    }

    async fn push(&mut self, frame: &Frame, ctx: &SinkContext) -> Result<()> {
        if !self.connected.load(Ordering::Relaxed) {
            debug!("MQTT not connected, skipping frame");
            return Ok(());
        }
        let messages = self.plan(frame, ctx);
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Sink("mqtt sink is not initialised".into()))?;

        let mut failure = None;
        for (topic, payload) in messages {
            match client.try_publish(&topic, QoS::AtMostOnce, false, payload.into_bytes()) {
                Ok(()) => self.counters.pushed += 1,
                Err(e) => {
                    error!(topic = %topic, "MQTT publish failed: {}", e);
                    self.counters.errors += 1;
                    failure = Some(AppError::Mqtt(e.to_string()));
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    async fn fini(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect: {}", e);
            }
        }
        if let Some(handle) = self.eventloop.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    fn counters(&self) -> SinkCounters {
        self.counters
    }
}
