use super::{parse_number, RateLimit, Sink, SinkContext, SinkCounters};
use crate::error::{AppError, Result};
use crate::frame::Frame;
use crate::schema::{FieldId, ValueKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::{debug, error, info};

pub type DbPool = Pool<Postgres>;

const DEFAULT_TABLE: &str = "teleinfo";
const DEFAULT_RATELIMIT_SECS: i64 = 900;

/// Stores one row per rate-limit window in a PostgreSQL table.
pub struct DatabaseSink {
    url: Option<String>,
    table: String,
    ratelimit: RateLimit,
    pool: Option<DbPool>,
    counters: SinkCounters,
}

impl Default for DatabaseSink {
    fn default() -> Self {
        Self {
            url: None,
            table: DEFAULT_TABLE.to_string(),
            ratelimit: RateLimit::new(DEFAULT_RATELIMIT_SECS),
            pool: None,
            counters: SinkCounters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Ts(DateTime<Utc>),
    Text(String),
    I64(Option<i64>),
}

/// Column holding a field. Single-phase current labels share the first
/// phase column so one table serves both meter kinds.
pub(crate) fn column_name(id: FieldId) -> String {
    match id {
        FieldId::Iinst => "iinst1".to_string(),
        FieldId::Imax => "imax1".to_string(),
        other => other.label().to_ascii_lowercase(),
    }
}

pub(crate) fn build_insert(table: &str, frame: &Frame, ts: DateTime<Utc>) -> (String, Vec<SqlValue>) {
    let mut columns = vec!["ts".to_string()];
    let mut placeholders = vec!["$1".to_string()];
    let mut binds = vec![SqlValue::Ts(ts)];
    for (id, value) in frame.infos() {
        columns.push(column_name(id));
        placeholders.push(format!("${}", binds.len() + 1));
        binds.push(match id.spec().kind {
            ValueKind::Numeric => SqlValue::I64(value.parse().ok()),
            ValueKind::Text => SqlValue::Text(value.to_string()),
        });
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, binds)
}

#[async_trait]
impl Sink for DatabaseSink {
    fn name(&self) -> &'static str {
        "database"
    }

    fn configure(&mut self, key: &str, value: &str) -> bool {
        match key {
            "url" => self.url = Some(value.to_string()),
            "table" => self.table = value.to_string(),
            "ratelimit" => match parse_number(value) {
                Some(secs) => self.ratelimit.set_period(secs),
                None => return false,
            },
            _ => return false,
        }
        true
    }

    /// The pool connects lazily, so an unreachable server does not keep the
    /// daemon from starting.
    async fn init(&mut self) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::Config("database sink needs an url".into()))?;
        let pool = PgPoolOptions::new().max_connections(2).connect_lazy(url)?;
        self.pool = Some(pool);
        info!(table = %self.table, "database sink ready");
        Ok(())
    }

    async fn push(&mut self, frame: &Frame, _ctx: &SinkContext) -> Result<()> {
        let ts = frame.timestamp().unwrap_or_else(Utc::now);
        if !self.ratelimit.allow(ts) {
            return Ok(());
        }
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| AppError::Sink("database sink is not initialised".into()))?;

        let (sql, binds) = build_insert(&self.table, frame, ts);
        debug!(query = %sql, "database insert");
        let mut q = sqlx::query(&sql);
        for b in binds {
            q = match b {
                SqlValue::Ts(v) => q.bind(v),
                SqlValue::Text(v) => q.bind(v),
                SqlValue::I64(v) => q.bind(v),
            };
        }
        match q.execute(pool).await {
            Ok(_) => {
                self.counters.pushed += 1;
                Ok(())
            }
            Err(e) => {
                error!(table = %self.table, "database insert failed: {e}");
                self.counters.errors += 1;
                Err(e.into())
            }
        }
    }

    async fn fini(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    fn counters(&self) -> SinkCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Decoder, InformationGroup};
    use crate::schema::Schema;

    fn frame() -> Frame {
        let buf: Vec<u8> = [
            ("ADCO", "123456789012"),
            ("OPTARIF", "BASE"),
            ("ISOUSC", "30"),
            ("BASE", "012345678"),
            ("PTEC", "TH.."),
            ("IINST", "002"),
            ("IMAX", "030"),
            ("PAPP", "00450"),
            ("MOTDETAT", "000000"),
        ]
        .iter()
        .flat_map(|(l, v)| InformationGroup::encode(l, v))
        .collect();
        Decoder::new(Schema::new()).decode(&buf).unwrap()
    }

    #[test]
    fn insert_statement() {
        let ts = Utc::now();
        let (sql, binds) = build_insert("teleinfo", &frame(), ts);
        assert_eq!(
            sql,
            "INSERT INTO teleinfo (ts, adco, optarif, isousc, base, ptec, iinst1, imax1, papp, motdetat) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        assert_eq!(binds.len(), 10);
        assert_eq!(binds[0], SqlValue::Ts(ts));
        assert_eq!(binds[1], SqlValue::Text("123456789012".into()));
        assert_eq!(binds[4], SqlValue::I64(Some(12_345_678)));
        assert_eq!(binds[8], SqlValue::I64(Some(450)));
    }

    #[test]
    fn configure_keys() {
        let mut sink = DatabaseSink::default();
        assert!(sink.configure("url", "postgres://localhost/home"));
        assert!(sink.configure("table", "edf"));
        assert!(sink.configure("ratelimit", "60"));
        assert!(!sink.configure("ratelimit", "soon"));
        assert!(!sink.configure("password", "x"));
        assert_eq!(sink.table, "edf");
        assert_eq!(sink.ratelimit.period().num_seconds(), 60);
    }

    #[tokio::test]
    async fn init_requires_url() {
        let mut sink = DatabaseSink::default();
        assert!(matches!(sink.init().await, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn push_before_init_fails() {
        let mut sink = DatabaseSink::default();
        let mut frame = frame();
        frame.stamp(Utc::now());
        let res = sink.push(&frame, &SinkContext::default()).await;
        assert!(matches!(res, Err(AppError::Sink(_))));
    }
}
