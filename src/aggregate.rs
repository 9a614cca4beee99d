use crate::error::AggregateError;
use crate::frame::Frame;
use chrono::{DateTime, Datelike, Duration, Local, Timelike, Utc};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

/// Frames older than this, relative to the newest one, are evicted.
pub const RETENTION_SECS: i64 = 60 * 60;

/// Sliding power average windows, in seconds.
pub const WINDOWS: [i64; 3] = [60, 5 * 60, 30 * 60];

/// Time-weighted power accumulator over one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerAverage {
    window: i64,
    elapsed: i64,
    power: u64,
    samples: u32,
}

impl PowerAverage {
    pub fn new(window: i64) -> Self {
        Self {
            window,
            elapsed: 0,
            power: 0,
            samples: 0,
        }
    }

    /// Restart from a single frame worth one second.
    fn reset(&mut self, power: u32) {
        self.power = power as u64;
        self.elapsed = 1;
        self.samples = 1;
    }

    /// Account `power` over `delta` seconds, clipped to what is left of the
    /// window. A saturated window is left alone.
    fn update(&mut self, power: u32, delta: i64) {
        if self.elapsed >= self.window {
            return;
        }
        let d = delta.clamp(0, self.window - self.elapsed);
        self.power += power as u64 * d as u64;
        self.elapsed += d;
        self.samples += 1;
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    pub fn elapsed(&self) -> i64 {
        self.elapsed
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Watts, integer division of the accumulated energy by elapsed time.
    pub fn value(&self) -> u32 {
        if self.elapsed == 0 {
            0
        } else {
            (self.power / self.elapsed as u64) as u32
        }
    }
}

/// The three averages, as handed to sinks and the control surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Averages {
    pub one: u32,
    pub five: u32,
    pub thirty: u32,
}

impl fmt::Display for Averages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.one, self.five, self.thirty)
    }
}

/// Last base index seen in each of `N` circular slots.
#[derive(Debug, Clone)]
pub struct EnergySeries<const N: usize> {
    slots: [u32; N],
}

impl<const N: usize> Default for EnergySeries<N> {
    fn default() -> Self {
        Self { slots: [0; N] }
    }
}

impl<const N: usize> EnergySeries<N> {
    pub fn record(&mut self, slot: usize, energy: u32) {
        self.slots[slot % N] = energy;
    }

    pub fn slots(&self) -> &[u32; N] {
        &self.slots
    }

    /// kWh consumed in each slot, compared with the slot before it
    /// (wrapping). Unset previous slots and counter resets yield zero.
    pub fn deltas(&self) -> EnergyDeltas {
        let deltas: Vec<f64> = (0..N)
            .map(|i| {
                let current = self.slots[i];
                let prev = self.slots[(i + N - 1) % N];
                if prev != 0 && current > prev {
                    (current - prev) as f64 / 1000.0
                } else {
                    0.0
                }
            })
            .collect();
        EnergyDeltas {
            total: deltas.iter().sum(),
            deltas,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyDeltas {
    pub total: f64,
    pub deltas: Vec<f64>,
}

impl fmt::Display for EnergyDeltas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:06.3}]: ", self.total)?;
        for d in &self.deltas {
            write!(f, "{:06.3} ", d)?;
        }
        Ok(())
    }
}

/// Consumption per weekday (Sunday first) and per hour of day.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyReport {
    pub days: EnergyDeltas,
    pub hours: EnergyDeltas,
}

impl fmt::Display for EnergyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "days {}", self.days)?;
        writeln!(f, "hours{}", self.hours)
    }
}

/// Bounded frame history and the statistics derived from it.
///
/// Owned by the daemon loop; the newest frame sits at the front.
#[derive(Debug)]
pub struct Aggregator {
    history: VecDeque<Frame>,
    averages: [PowerAverage; 3],
    days: EnergySeries<7>,
    hours: EnergySeries<24>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            averages: WINDOWS.map(PowerAverage::new),
            days: EnergySeries::default(),
            hours: EnergySeries::default(),
        }
    }

    /// Accept a frame stamped with the current time.
    pub fn accept(&mut self, frame: Frame) -> usize {
        self.accept_at(frame, Utc::now())
    }

    /// Accept a frame stamped with `now` and return how many frames the
    /// history retains afterwards.
    pub fn accept_at(&mut self, mut frame: Frame, now: DateTime<Utc>) -> usize {
        // whole seconds, so that pair deltas add up to the real span
        let now = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        // keep the history ordered even if the wall clock steps back
        let now = match self.history.front().and_then(Frame::timestamp) {
            Some(head) if head > now => {
                debug!(%head, %now, "clock went backwards, reusing previous timestamp");
                head
            }
            _ => now,
        };
        frame.stamp(now);

        for avg in &mut self.averages {
            avg.reset(frame.power());
        }
        let local = now.with_timezone(&Local);
        self.days
            .record(local.weekday().num_days_from_sunday() as usize, frame.energy());
        self.hours.record(local.hour() as usize, frame.energy());

        self.history.push_front(frame);
        self.walk(now)
    }

    /// Feed consecutive pairs into the averages, newest first, and evict
    /// everything from the first frame past the retention horizon.
    ///
    /// Each pair contributes the older frame's power over the gap separating
    /// it from the newer one.
    fn walk(&mut self, head: DateTime<Utc>) -> usize {
        let horizon = Duration::seconds(RETENTION_SECS);
        let mut newer: Option<DateTime<Utc>> = None;
        let mut cut = self.history.len();

        for (i, frame) in self.history.iter().enumerate() {
            let ts = frame.timestamp().unwrap_or(head);
            if let Some(newer) = newer {
                let delta = (newer - ts).num_seconds();
                for avg in &mut self.averages {
                    avg.update(frame.power(), delta);
                }
            }
            if head - ts > horizon {
                cut = i;
                break;
            }
            newer = Some(ts);
        }

        let evicted = self.history.len() - cut;
        if evicted > 0 {
            self.history.truncate(cut);
            debug!(evicted, "evicted aged frames");
        }
        self.history.len()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.history.front()
    }

    pub fn history(&self) -> impl Iterator<Item = &Frame> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Average power over one of [`WINDOWS`].
    pub fn average(&self, window: Duration) -> Result<u32, AggregateError> {
        let secs = window.num_seconds();
        let avg = self
            .averages
            .iter()
            .find(|a| a.window() == secs)
            .ok_or(AggregateError::UnknownWindow(secs))?;
        debug!(
            window = avg.window(),
            power = avg.value(),
            frames = avg.samples(),
            "power average"
        );
        Ok(avg.value())
    }

    pub fn averages(&self) -> Averages {
        Averages {
            one: self.averages[0].value(),
            five: self.averages[1].value(),
            thirty: self.averages[2].value(),
        }
    }

    pub fn power_averages(&self) -> &[PowerAverage; 3] {
        &self.averages
    }

    pub fn energy_report(&self) -> EnergyReport {
        EnergyReport {
            days: self.days.deltas(),
            hours: self.hours.deltas(),
        }
    }

    /// Drop the whole history. Returns the number of frames dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.history.len();
        self.history.clear();
        info!(count, "cleared frames");
        count
    }
}
