//! The hit recorder.
//!
//! Every probe ends in [`register_hit`] (or [`register_hit_timed`]), which forwards to the
//! process wide [`HitRecorder`]. Recording never fails from the caller's point of view: a
//! sink error drops the hit, bumps a counter and is logged once. Nothing propagates back
//! into the instrumented program.
//!
//! Every hit is tagged with the [`HitThread`] it fired on. Besides feeding its [`HitSink`],
//! the recorder keeps [`LineStatistics`] per thread and line, which [`HitRecorder::report`]
//! prints grouped by thread and unit at shutdown. Intervals are measured between hits of
//! the same thread only.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use lineprobe::recorder::{HitRecorder, MemorySink};
//!
//! let sink = Arc::new(MemorySink::new());
//! let recorder = HitRecorder::new(sink.clone());
//! recorder.register_hit("com/acme/Worker", 42);
//! assert_eq!(sink.len(), 1);
//! assert_eq!(recorder.recorded(), 1);
//! ```

mod format;
mod record;
mod sink;

pub use format::HitFormat;
pub use record::{HitRecord, HitThread, LineStatistics};
pub use sink::{ConsoleSink, FileSink, HitSink, MemorySink, SinkKind};

use std::{
    collections::BTreeMap,
    io::Write,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Instant,
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Aggregates and persists probe hits.
pub struct HitRecorder {
    sink: Arc<dyn HitSink>,
    epoch: Instant,
    recorded: AtomicU64,
    dropped: AtomicU64,
    warned: AtomicBool,
    units: DashMap<String, Arc<str>>,
    statistics: DashMap<(HitThread, Arc<str>, u32), LineStatistics>,
}

impl HitRecorder {
    /// A recorder writing to `sink`; timestamps count from now.
    pub fn new(sink: Arc<dyn HitSink>) -> Self {
        HitRecorder {
            sink,
            epoch: Instant::now(),
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            units: DashMap::new(),
            statistics: DashMap::new(),
        }
    }

    /// The sink hits are written to.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn HitSink> {
        &self.sink
    }

    /// Nanoseconds since the recorder was created.
    #[must_use]
    pub fn now_nanos(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    /// Record a hit stamped with the recorder's clock.
    ///
    /// Returns `false` if the sink dropped it.
    pub fn register_hit(&self, unit: &str, line: u32) -> bool {
        self.register_hit_at(unit, line, self.now_nanos())
    }

    /// Record a hit with a timestamp taken by the probe.
    ///
    /// Returns `false` if the sink dropped it.
    pub fn register_hit_at(&self, unit: &str, line: u32, timestamp_nanos: i64) -> bool {
        self.register_hit_from(HitThread::current(), unit, line, timestamp_nanos)
    }

    /// Record a hit on behalf of `thread`.
    ///
    /// Returns `false` if the sink dropped it.
    pub fn register_hit_from(
        &self,
        thread: HitThread,
        unit: &str,
        line: u32,
        timestamp_nanos: i64,
    ) -> bool {
        let unit = self.intern(unit);
        self.statistics
            .entry((thread.clone(), unit.clone(), line))
            .or_default()
            .observe(timestamp_nanos);

        let record = HitRecord {
            thread,
            unit,
            line,
            timestamp_nanos,
        };
        match self.sink.record(&record) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(error) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!(sink = %self.sink.kind(), %error, "dropping hits, sink write failed");
                }
                false
            }
        }
    }

    fn intern(&self, unit: &str) -> Arc<str> {
        if let Some(interned) = self.units.get(unit) {
            return interned.clone();
        }
        self.units
            .entry(unit.to_string())
            .or_insert_with(|| Arc::from(unit))
            .clone()
    }

    /// Hits accepted by the sink.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Hits the sink refused.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Statistics of one line on one thread, if it was hit there.
    #[must_use]
    pub fn line_statistics(
        &self,
        thread: &HitThread,
        unit: &str,
        line: u32,
    ) -> Option<LineStatistics> {
        let unit = self.units.get(unit)?.clone();
        self.statistics
            .get(&(thread.clone(), unit, line))
            .map(|stats| *stats)
    }

    /// Statistics of every line hit so far, grouped by thread and unit and ordered by line.
    #[must_use]
    pub fn statistics(
        &self,
    ) -> BTreeMap<HitThread, BTreeMap<String, BTreeMap<u32, LineStatistics>>> {
        let mut grouped: BTreeMap<HitThread, BTreeMap<String, BTreeMap<u32, LineStatistics>>> =
            BTreeMap::new();
        for entry in self.statistics.iter() {
            let (thread, unit, line) = entry.key();
            grouped
                .entry(thread.clone())
                .or_default()
                .entry(unit.to_string())
                .or_default()
                .insert(*line, *entry.value());
        }
        grouped
    }

    /// Write the per-line statistics to `out`, one block per thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if `out` fails.
    pub fn report<W: Write>(&self, mut out: W) -> Result<()> {
        for (thread, units) in self.statistics() {
            writeln!(out, "Thread {thread}")?;
            for (unit, lines) in units {
                writeln!(out, "\tUnit {unit}")?;
                for (line, stats) in lines {
                    writeln!(out, "\t\tline {line}: {stats}")?;
                }
            }
        }
        if self.dropped() > 0 {
            writeln!(out, "{} hits dropped", self.dropped())?;
        }
        Ok(())
    }

    /// Flush the sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if the sink can not be flushed.
    pub fn flush(&self) -> Result<()> {
        self.sink.flush()
    }
}

impl std::fmt::Debug for HitRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitRecorder")
            .field("sink", &self.sink.kind())
            .field("recorded", &self.recorded())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

static RECORDER: OnceLock<Arc<HitRecorder>> = OnceLock::new();
static ORPHANED: AtomicU64 = AtomicU64::new(0);

/// Make `recorder` the process wide recorder.
///
/// # Errors
///
/// Returns [`Error::Config`] if a recorder is already installed.
pub fn install(recorder: Arc<HitRecorder>) -> Result<Arc<HitRecorder>> {
    RECORDER
        .set(recorder.clone())
        .map_err(|_| Error::Config("A hit recorder is already installed".to_string()))?;
    debug!(sink = %recorder.sink().kind(), "hit recorder installed");
    Ok(recorder)
}

/// The process wide recorder, if installed.
#[must_use]
pub fn global() -> Option<&'static Arc<HitRecorder>> {
    RECORDER.get()
}

/// Probe entry point for `registerHit(String, int)`.
///
/// Hits arriving before a recorder is installed are counted in [`orphaned_hits`].
pub fn register_hit(location: &str, line: u32) {
    match RECORDER.get() {
        Some(recorder) => {
            recorder.register_hit(location, line);
        }
        None => {
            ORPHANED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Probe entry point for `registerHit(String, int, long)`.
pub fn register_hit_timed(location: &str, line: u32, timestamp_nanos: i64) {
    match RECORDER.get() {
        Some(recorder) => {
            recorder.register_hit_at(location, line, timestamp_nanos);
        }
        None => {
            ORPHANED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Hits that arrived while no recorder was installed.
#[must_use]
pub fn orphaned_hits() -> u64 {
    ORPHANED.load(Ordering::Relaxed)
}
