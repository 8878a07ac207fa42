use crate::task::{CallbackId, CallbackKind, TaskSource};

/// Deterministic log entries, recorded when `LoopConfig::record_trace` is set.
///
/// Two runs of the same program produce identical traces.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceEvent {
    /// A callback started running.
    Executed {
        callback: CallbackId,
        label: Option<String>,
        kind: CallbackKind,
        source: TaskSource,
        at: u64,
    },
    /// The callback that last started running failed.
    Failed { callback: CallbackId, at: u64 },
    TimerScheduled {
        callback: CallbackId,
        deadline: u64,
        at: u64,
    },
    TimerCancelled { callback: CallbackId, at: u64 },
    /// Logical time jumped to the next timer deadline.
    TimeAdvanced { from: u64, to: u64 },
}

impl TraceEvent {
    pub fn executed_label(&self) -> Option<&str> {
        match self {
            Self::Executed { label, .. } => label.as_deref(),
            _ => None,
        }
    }
}

/// Cumulative counters over the lifetime of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopStats {
    pub scripts_run: u64,
    pub microtasks_run: u64,
    pub macrotasks_run: u64,
    pub timers_fired: u64,
    pub failures: u64,
    pub time_advances: u64,
}

impl LoopStats {
    pub(crate) fn record_run(&mut self, source: TaskSource) {
        match source {
            TaskSource::Script => self.scripts_run += 1,
            TaskSource::NextTick | TaskSource::Microtask => self.microtasks_run += 1,
            TaskSource::Timer | TaskSource::Interval => {
                self.macrotasks_run += 1;
                self.timers_fired += 1;
            }
            TaskSource::Posted | TaskSource::Remote => self.macrotasks_run += 1,
        }
    }
}

/// What a single call to `run` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub microtasks_run: u64,
    pub macrotasks_run: u64,
    pub failures: u64,
    pub final_time: u64,
}

impl RunReport {
    pub(crate) fn between(before: LoopStats, after: LoopStats, final_time: u64) -> Self {
        Self {
            microtasks_run: after.microtasks_run - before.microtasks_run,
            macrotasks_run: after.macrotasks_run - before.macrotasks_run,
            failures: after.failures - before.failures,
            final_time,
        }
    }

    pub fn callbacks_run(&self) -> u64 {
        self.microtasks_run + self.macrotasks_run
    }

    pub fn is_noop(&self) -> bool {
        self.callbacks_run() == 0
    }
}
