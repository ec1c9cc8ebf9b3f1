use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD: HitThread = HitThread::register();
}

/// The application thread a hit was recorded on.
///
/// Ids are assigned on a thread's first hit, counting from 1, and are never reused within
/// a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HitThread {
    /// Process unique id
    pub id: u64,
    /// Thread name, `thread-<id>` for unnamed threads
    pub name: Arc<str>,
}

impl HitThread {
    /// A tag with an explicit id and name.
    pub fn new(id: u64, name: impl Into<Arc<str>>) -> Self {
        HitThread {
            id,
            name: name.into(),
        }
    }

    /// The calling thread.
    #[must_use]
    pub fn current() -> Self {
        // thread locals are gone while a thread shuts down
        CURRENT_THREAD
            .try_with(Clone::clone)
            .unwrap_or_else(|_| HitThread::register())
    }

    fn register() -> Self {
        let id = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
        let name = match std::thread::current().name() {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("thread-{id}")),
        };
        HitThread { id, name }
    }
}

impl fmt::Display for HitThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One probe firing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitRecord {
    /// Thread the hit was recorded on
    pub thread: HitThread,
    /// Internal name of the unit the probe was inserted into
    pub unit: Arc<str>,
    /// Source line of the transition
    pub line: u32,
    /// Nanoseconds since the recorder's epoch, or the probe's `System.nanoTime()` value
    pub timestamp_nanos: i64,
}

impl HitRecord {
    /// Create a new record.
    pub fn new(
        thread: HitThread,
        unit: impl Into<Arc<str>>,
        line: u32,
        timestamp_nanos: i64,
    ) -> Self {
        HitRecord {
            thread,
            unit: unit.into(),
            line,
            timestamp_nanos,
        }
    }
}

/// Aggregate over every hit of one `(unit, line)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStatistics {
    /// Number of hits
    pub hits: u64,
    /// Timestamp of the most recent hit
    pub last_hit_nanos: i64,
    /// Longest gap between two consecutive hits
    pub max_interval_nanos: i64,
}

impl LineStatistics {
    pub(crate) fn observe(&mut self, timestamp_nanos: i64) {
        if self.hits > 0 {
            let interval = timestamp_nanos.saturating_sub(self.last_hit_nanos);
            self.max_interval_nanos = self.max_interval_nanos.max(interval);
        }
        self.hits += 1;
        self.last_hit_nanos = self.last_hit_nanos.max(timestamp_nanos);
    }
}

impl fmt::Display for LineStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} ns max interval",
            self.hits, self.max_interval_nanos
        )
    }
}
