//! Time sources for byte-level timeouts.
//!
//! The session never reads the system clock directly. It asks a `Clock`,
//! which lets the same polling loop run against a real monotonic clock, a
//! coarse tick counter like the one the H8 BIOS maintains, or a
//! `ManualClock` in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Period of the 2 ms interrupt tick counter.
pub const TICK: Duration = Duration::from_millis(2);

/// Clock capability used for timeouts and date stamps.
pub trait Clock: Send {
    /// Current reading of the clock.
    fn now(&self) -> Instant;

    /// Time elapsed since an earlier reading of this clock.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }

    /// Smallest step the clock can observe.
    fn resolution(&self) -> Duration {
        Duration::ZERO
    }

    /// Wall-clock time used for file date stamps.
    fn wall_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn elapsed_since(&self, start: Instant) -> Duration {
        (**self).elapsed_since(start)
    }

    fn resolution(&self) -> Duration {
        (**self).resolution()
    }

    fn wall_time(&self) -> SystemTime {
        (**self).wall_time()
    }
}

/// Full-resolution host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances in whole quanta of its inner clock.
///
/// Models the two counters the 8-bit hosts expose: the 2 ms tick counter
/// (HDOS, CP/M 2.2) and the one-second system clock (CP/M 3, MP/M).
#[derive(Debug, Clone)]
pub struct QuantizedClock<C: Clock> {
    inner: C,
    origin: Instant,
    quantum: Duration,
}

impl<C: Clock> QuantizedClock<C> {
    pub fn new(inner: C, quantum: Duration) -> Self {
        let origin = inner.now();
        Self {
            inner,
            origin,
            quantum,
        }
    }

    /// 2 ms tick counter.
    pub fn ticks(inner: C) -> Self {
        Self::new(inner, TICK)
    }

    /// One-second counter.
    pub fn seconds(inner: C) -> Self {
        Self::new(inner, Duration::from_secs(1))
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }
}

impl<C: Clock> Clock for QuantizedClock<C> {
    fn now(&self) -> Instant {
        let raw = self.inner.now().saturating_duration_since(self.origin);
        if self.quantum.is_zero() {
            return self.origin + raw;
        }
        let steps = raw.as_nanos() / self.quantum.as_nanos();
        self.origin + Duration::from_nanos((steps * self.quantum.as_nanos()) as u64)
    }

    fn resolution(&self) -> Duration {
        self.quantum
    }

    fn wall_time(&self) -> SystemTime {
        self.inner.wall_time()
    }
}

/// Which clock a session is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    #[default]
    Monotonic,
    Tick,
    Seconds,
}

impl ClockKind {
    /// Build the clock this kind names, on top of the host clock.
    pub fn build(self) -> Box<dyn Clock> {
        match self {
            ClockKind::Monotonic => Box::new(MonotonicClock),
            ClockKind::Tick => Box::new(QuantizedClock::ticks(MonotonicClock)),
            ClockKind::Seconds => Box::new(QuantizedClock::seconds(MonotonicClock)),
        }
    }
}

/// Deterministic clock for tests.
///
/// Every call to `now()` advances the clock by `step`, so a polling loop
/// against a silent transport always reaches its deadline. Clones share the
/// same time line.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    elapsed_ns: Arc<AtomicU64>,
    step_ns: u64,
    wall: SystemTime,
}

impl ManualClock {
    pub fn new(step: Duration) -> Self {
        Self {
            base: Instant::now(),
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            step_ns: step.as_nanos() as u64,
            wall: SystemTime::UNIX_EPOCH,
        }
    }

    /// Fix the wall-clock time reported for date stamps.
    pub fn with_wall_time(mut self, wall: SystemTime) -> Self {
        self.wall = wall;
        self
    }

    /// Move the clock forward without polling.
    pub fn advance(&self, by: Duration) {
        self.elapsed_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Total time the clock has moved since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let ns = self.elapsed_ns.fetch_add(self.step_ns, Ordering::SeqCst) + self.step_ns;
        self.base + Duration::from_nanos(ns)
    }

    fn resolution(&self) -> Duration {
        Duration::from_nanos(self.step_ns)
    }

    fn wall_time(&self) -> SystemTime {
        self.wall
    }
}
