use crate::aggregate::Aggregator;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::sink::SinkSet;
use std::fmt::Write;
use std::time::Duration;
use tracing::info;

/// Counters maintained by the daemon loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub frames_pushed: u64,
    pub duplicates: u64,
    pub frame_errors: u64,
    pub checksum_errors: u64,
    pub max_frame_len: usize,
    pub history: usize,
    pub history_max: usize,
    pub control_requests: u64,
    pub power_min: Option<u32>,
    pub power_max: u32,
    /// Loss-of-signal episodes.
    pub serial_rx_errors: u64,
    pub data_loss_secs: u64,
    pub max_read: usize,
    /// Smallest time left on the read timeout when data arrived.
    pub min_timeout_left: Option<Duration>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account an accepted frame and the resulting history size.
    pub fn record_frame(&mut self, frame: &Frame, history: usize) {
        self.frames_pushed += 1;
        self.max_frame_len = self.max_frame_len.max(frame.raw().len());
        self.history = history;
        self.history_max = self.history_max.max(history);

        let power = frame.power();
        self.power_min = Some(self.power_min.map_or(power, |m| m.min(power)));
        self.power_max = self.power_max.max(power);
    }

    pub fn record_error(&mut self, err: &FrameError) {
        match err {
            FrameError::DuplicateFrame => self.duplicates += 1,
            e if e.is_checksum() => {
                self.checksum_errors += 1;
                self.frame_errors += 1;
            }
            _ => self.frame_errors += 1,
        }
    }

    pub fn record_read(&mut self, len: usize) {
        self.max_read = self.max_read.max(len);
    }

    pub fn record_timeout_left(&mut self, left: Duration) {
        self.min_timeout_left = Some(self.min_timeout_left.map_or(left, |m| m.min(left)));
    }

    /// Text block served by the `stats` command.
    pub fn report(&self, aggregator: &Aggregator, sinks: &SinkSet, timeout: Duration) -> String {
        let mut out = String::new();
        let _ = self.write_report(&mut out, aggregator, sinks, timeout);
        out
    }

    fn write_report(
        &self,
        out: &mut String,
        aggregator: &Aggregator,
        sinks: &SinkSet,
        timeout: Duration,
    ) -> std::fmt::Result {
        writeln!(out, "Frames")?;
        writeln!(out, "    pushed            : {}", self.frames_pushed)?;
        writeln!(out, "    duplicate         : {}", self.duplicates)?;
        writeln!(out, "    error             : {}", self.frame_errors)?;
        writeln!(out, "    checksum errors   : {}", self.checksum_errors)?;
        writeln!(out, "    max len           : {}", self.max_frame_len)?;
        writeln!(out, "    history")?;
        writeln!(out, "        count         : {}", self.history)?;
        writeln!(out, "        max           : {}", self.history_max)?;

        for (name, enabled, counters) in sinks.counters() {
            if !enabled {
                continue;
            }
            writeln!(out, "Sink {}", name)?;
            writeln!(out, "    pushed            : {}", counters.pushed)?;
            writeln!(out, "    errors            : {}", counters.errors)?;
            writeln!(out, "    dropped           : {}", counters.dropped)?;
        }

        writeln!(out, "Controller")?;
        writeln!(out, "    requests          : {}", self.control_requests)?;

        let left = self.min_timeout_left.unwrap_or(timeout);
        writeln!(out, "Serial")?;
        writeln!(out, "    errors            : {}", self.serial_rx_errors)?;
        writeln!(out, "    data loss         : {} secs", self.data_loss_secs)?;
        writeln!(out, "    max read bytes    : {}", self.max_read)?;
        writeln!(
            out,
            "    timeout           : {}/{} us",
            left.as_micros(),
            timeout.as_micros()
        )?;

        let averages = aggregator.averages();
        writeln!(out, "Power (Watt)")?;
        writeln!(
            out,
            "    current           : {}",
            aggregator.last().map_or(0, Frame::power)
        )?;
        writeln!(
            out,
            "    min/max           : {}/{}",
            self.power_min.unwrap_or(0),
            self.power_max
        )?;
        writeln!(out, "    averages 1/5/30   : {}", averages)
    }

    /// Log the report one line at a time.
    pub fn log(&self, aggregator: &Aggregator, sinks: &SinkSet, timeout: Duration) {
        for line in self.report(aggregator, sinks, timeout).lines() {
            info!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldId;
    use pretty_assertions::assert_eq;

    fn frame(power: &str, raw: &[u8]) -> Frame {
        let mut frame = Frame::new(raw);
        frame.insert(FieldId::Papp, power.to_string());
        frame
    }

    #[test]
    fn errors_are_classified() {
        let mut stats = Stats::new();
        stats.record_error(&FrameError::DuplicateFrame);
        stats.record_error(&FrameError::InvalidChecksum {
            expected: b'G',
            found: b'?',
        });
        stats.record_error(&FrameError::MalformedBuffer);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.checksum_errors, 1);
        assert_eq!(stats.frame_errors, 2);
    }

    #[test]
    fn frames_track_extremes() {
        let mut stats = Stats::new();
        stats.record_frame(&frame("00450", &[0; 10]), 1);
        stats.record_frame(&frame("00120", &[0; 40]), 2);
        stats.record_frame(&frame("00900", &[0; 20]), 1);
        assert_eq!(stats.frames_pushed, 3);
        assert_eq!(stats.power_min, Some(120));
        assert_eq!(stats.power_max, 900);
        assert_eq!(stats.max_frame_len, 40);
        assert_eq!(stats.history, 1);
        assert_eq!(stats.history_max, 2);
    }

    #[test]
    fn empty_report() {
        let stats = Stats::new();
        let report = stats.report(&Aggregator::new(), &SinkSet::new(), Duration::from_secs(3));
        assert_eq!(
            report,
            "Frames\n\
             \x20   pushed            : 0\n\
             \x20   duplicate         : 0\n\
             \x20   error             : 0\n\
             \x20   checksum errors   : 0\n\
             \x20   max len           : 0\n\
             \x20   history\n\
             \x20       count         : 0\n\
             \x20       max           : 0\n\
             Controller\n\
             \x20   requests          : 0\n\
             Serial\n\
             \x20   errors            : 0\n\
             \x20   data loss         : 0 secs\n\
             \x20   max read bytes    : 0\n\
             \x20   timeout           : 3000000/3000000 us\n\
             Power (Watt)\n\
             \x20   current           : 0\n\
             \x20   min/max           : 0/0\n\
             \x20   averages 1/5/30   : 0/0/0\n"
        );
    }

    #[test]
    fn report_lists_enabled_sinks() {
        let mut sinks = SinkSet::with_defaults();
        sinks.configure("mqtt", "enable", "yes").unwrap();
        let report = Stats::new().report(&Aggregator::new(), &sinks, Duration::from_secs(3));
        assert!(report.contains("Sink mqtt\n"));
        assert!(!report.contains("Sink database"));
    }
}
