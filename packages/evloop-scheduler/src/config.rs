/// Which microtask phases the loop models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum MicrotaskMode {
    /// One microtask queue; `queue_next_tick` is an alias for `queue_microtask`.
    #[default]
    Single,
    /// A next-tick queue drained ahead of the microtask queue. The two are
    /// alternated until both are empty.
    NextTickFirst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct LoopConfig {
    pub microtask_mode: MicrotaskMode,
    /// Upper bound on callbacks executed by a single `run`. `None` is unbounded.
    pub max_callbacks: Option<u64>,
    /// Smallest interval period, in logical milliseconds.
    pub min_interval_ms: u64,
    /// Keep a `TraceEvent` log, retrieved with `EventLoop::take_trace`.
    pub record_trace: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            microtask_mode: MicrotaskMode::Single,
            max_callbacks: None,
            min_interval_ms: 1,
            record_trace: false,
        }
    }
}

impl LoopConfig {
    pub fn with_microtask_mode(mut self, mode: MicrotaskMode) -> Self {
        self.microtask_mode = mode;
        self
    }

    pub fn with_max_callbacks(mut self, limit: u64) -> Self {
        self.max_callbacks = Some(limit);
        self
    }

    pub fn with_min_interval(mut self, min_interval_ms: u64) -> Self {
        self.min_interval_ms = min_interval_ms.max(1);
        self
    }

    pub fn with_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }
}
