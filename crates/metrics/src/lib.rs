use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

// Reservoir-sampled latency histograms.
mod reservoir;
pub use reservoir::{Percentiles, Reservoir, RESERVOIR_CAPACITY};

/// Process-wide metrics toggle. Hooks observe it with a single relaxed
/// load; when off, recorders and timers reduce to that load and a branch.
static ENABLED: AtomicBool = AtomicBool::new(true);

/// Enable metrics collection process-wide.
pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Disable metrics collection process-wide.
pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Whether metrics collection is currently enabled.
#[inline]
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Op is an instrumented container operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Serialize,
    Deserialize,
    Copy,
    Move,
}

/// Recorder accumulates operation counts, cumulative operation time,
/// and sampled latencies for one container. All methods are safe to
/// call concurrently.
#[derive(Debug, Default)]
pub struct Recorder {
    reads: AtomicU64,
    writes: AtomicU64,
    serializations: AtomicU64,
    deserializations: AtomicU64,
    copies: AtomicU64,
    moves: AtomicU64,

    read_ns: AtomicU64,
    write_ns: AtomicU64,
    serialize_ns: AtomicU64,
    deserialize_ns: AtomicU64,

    read_latency: Reservoir,
    write_latency: Reservoir,
    serialize_latency: Reservoir,
    deserialize_latency: Reservoir,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of |op| without timing it.
    #[inline]
    pub fn incr(&self, op: Op) {
        if !enabled() {
            return;
        }
        self.counter(op).fetch_add(1, Ordering::Relaxed);
    }

    /// Begin timing |op|. The returned timer records on drop.
    /// When metrics are disabled this is a no-op timer.
    #[inline]
    pub fn start(&self, op: Op) -> OpTimer<'_> {
        OpTimer {
            recorder: self,
            op,
            start: if enabled() { Some(Instant::now()) } else { None },
        }
    }

    /// Record one completed |op| and its duration directly, for callers
    /// that measure time themselves (e.g. around a constructor).
    #[inline]
    pub fn observe(&self, op: Op, elapsed_ns: u64) {
        if !enabled() {
            return;
        }
        self.record(op, elapsed_ns);
    }

    /// Produce an immutable snapshot of all accumulated state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            serializations: self.serializations.load(Ordering::Relaxed),
            deserializations: self.deserializations.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            read_ns: self.read_ns.load(Ordering::Relaxed),
            write_ns: self.write_ns.load(Ordering::Relaxed),
            serialize_ns: self.serialize_ns.load(Ordering::Relaxed),
            deserialize_ns: self.deserialize_ns.load(Ordering::Relaxed),
            read_latency: self.read_latency.percentiles(),
            write_latency: self.write_latency.percentiles(),
            serialize_latency: self.serialize_latency.percentiles(),
            deserialize_latency: self.deserialize_latency.percentiles(),
        }
    }

    /// Reset all counters and reservoirs to their initial state.
    pub fn reset(&self) {
        for c in [
            &self.reads,
            &self.writes,
            &self.serializations,
            &self.deserializations,
            &self.copies,
            &self.moves,
            &self.read_ns,
            &self.write_ns,
            &self.serialize_ns,
            &self.deserialize_ns,
        ] {
            c.store(0, Ordering::Relaxed);
        }
        self.read_latency.reset();
        self.write_latency.reset();
        self.serialize_latency.reset();
        self.deserialize_latency.reset();
    }

    fn counter(&self, op: Op) -> &AtomicU64 {
        match op {
            Op::Read => &self.reads,
            Op::Write => &self.writes,
            Op::Serialize => &self.serializations,
            Op::Deserialize => &self.deserializations,
            Op::Copy => &self.copies,
            Op::Move => &self.moves,
        }
    }

    fn record(&self, op: Op, elapsed_ns: u64) {
        self.counter(op).fetch_add(1, Ordering::Relaxed);

        let (total, latency) = match op {
            Op::Read => (&self.read_ns, &self.read_latency),
            Op::Write => (&self.write_ns, &self.write_latency),
            Op::Serialize => (&self.serialize_ns, &self.serialize_latency),
            Op::Deserialize => (&self.deserialize_ns, &self.deserialize_latency),
            // Copies and moves are counted but not timed.
            Op::Copy | Op::Move => return,
        };
        total.fetch_add(elapsed_ns, Ordering::Relaxed);
        latency.record(elapsed_ns);
    }
}

/// OpTimer measures one operation and records it into its Recorder on drop.
#[must_use = "an unused OpTimer records a zero-length operation"]
pub struct OpTimer<'r> {
    recorder: &'r Recorder,
    op: Op,
    start: Option<Instant>,
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let elapsed = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
            self.recorder.record(self.op, elapsed);
        }
    }
}

/// Snapshot is an immutable view of a Recorder, taken at one instant.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Snapshot {
    pub reads: u64,
    pub writes: u64,
    pub serializations: u64,
    pub deserializations: u64,
    pub copies: u64,
    pub moves: u64,

    pub read_ns: u64,
    pub write_ns: u64,
    pub serialize_ns: u64,
    pub deserialize_ns: u64,

    pub read_latency: Percentiles,
    pub write_latency: Percentiles,
    pub serialize_latency: Percentiles,
    pub deserialize_latency: Percentiles,
}

lazy_static::lazy_static! {
    static ref GLOBAL: Recorder = Recorder::new();
    static ref LAST_SNAPSHOT: parking_lot::Mutex<Option<Snapshot>> =
        parking_lot::Mutex::new(None);
}

/// The process-wide Recorder, for callers that don't track per-container
/// metrics. Initialized lazily from any thread.
pub fn global() -> &'static Recorder {
    &GLOBAL
}

/// Publish |snapshot| as the process-wide "latest" snapshot, for export
/// layers that poll rather than subscribe.
pub fn publish(snapshot: Snapshot) {
    *LAST_SNAPSHOT.lock() = Some(snapshot);
}

/// The most recently published Snapshot, if any.
pub fn latest() -> Option<Snapshot> {
    LAST_SNAPSHOT.lock().clone()
}
