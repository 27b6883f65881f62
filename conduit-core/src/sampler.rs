//! Per-stage execution-timestamp recorder, grounded in
//! `StageSampler.h`/`StageSampler.cpp`.
//!
//! Each [`Sampler`] belongs to exactly one stage and records, for each
//! lifecycle event kind, a fixed-capacity array of host-clock timestamps.
//! `Sampler` never allocates after construction: the arrays are pre-sized to
//! [`MAX_SAMPLES`] and further samples past that are dropped and counted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Hard cap on samples recorded per event kind, matching the original's
/// fixed-size trace buffers.
pub const MAX_SAMPLES: usize = 10_000;

/// The lifecycle points a [`Stage`](crate::stage::Stage) samples during one
/// `execute()` call, plus the two GPU-side points a task body may report
/// itself via a `GpuTimeSampler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum StageEvent {
    ExecuteBegin = 0,
    InputTokenAvailable = 1,
    OutputTokenAvailable = 2,
    TaskBegin = 3,
    TaskEnd = 4,
    ExecuteEnd = 5,
    GpuTaskBegin = 6,
    GpuTaskEnd = 7,
}

const NUM_EVENTS: usize = 8;

const ALL_EVENTS: [StageEvent; NUM_EVENTS] = [
    StageEvent::ExecuteBegin,
    StageEvent::InputTokenAvailable,
    StageEvent::OutputTokenAvailable,
    StageEvent::TaskBegin,
    StageEvent::TaskEnd,
    StageEvent::ExecuteEnd,
    StageEvent::GpuTaskBegin,
    StageEvent::GpuTaskEnd,
];

/// Summary statistics over a set of delta samples (one event kind's
/// timestamps subtracted from another's, pairwise). Mirrors
/// `StageSampler::build_delta_statistic`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistic {
    pub count: usize,
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    /// Bessel-corrected (sample) standard deviation; `0.0` when `count < 2`.
    pub stddev_secs: f64,
    pub median_secs: f64,
}

struct EventSlot {
    timestamps: Mutex<Vec<Instant>>,
    overflow: AtomicUsize,
}

impl EventSlot {
    fn new() -> Self {
        EventSlot {
            timestamps: Mutex::new(Vec::with_capacity(MAX_SAMPLES)),
            overflow: AtomicUsize::new(0),
        }
    }
}

/// Records timestamps for one stage's lifecycle events.
///
/// Safe to share across the stage's owning thread and, for `GpuTaskBegin`/
/// `GpuTaskEnd`, whatever thread resolves the GPU timestamp query -- all
/// recording methods take `&self`.
pub struct Sampler {
    name: String,
    slots: [EventSlot; NUM_EVENTS],
}

impl Sampler {
    pub fn new(name: impl Into<String>) -> Self {
        Sampler {
            name: name.into(),
            slots: std::array::from_fn(|_| EventSlot::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records `event` at the current instant. Past [`MAX_SAMPLES`]
    /// recordings for this event kind, the sample is dropped and the
    /// overflow counter for that kind is incremented instead.
    pub fn sample(&self, event: StageEvent) {
        self.enter_sample(event, Instant::now());
    }

    /// Records `event` at an explicit instant (used to report a resolved GPU
    /// timestamp after converting it to host time).
    pub fn enter_sample(&self, event: StageEvent, at: Instant) {
        let slot = &self.slots[event as usize];
        let mut timestamps = slot.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        if timestamps.len() < MAX_SAMPLES {
            timestamps.push(at);
        } else {
            slot.overflow.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of recorded samples for `event`, not counting overflow.
    pub fn number_of_sampled_trace_events(&self, event: StageEvent) -> usize {
        self.slots[event as usize]
            .timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of samples for `event` dropped after `MAX_SAMPLES` was reached.
    pub fn overflow_count(&self, event: StageEvent) -> usize {
        self.slots[event as usize].overflow.load(Ordering::Relaxed)
    }

    /// A raw copy of the recorded timestamps for `event`, in recording order.
    pub fn get_trace_event(&self, event: StageEvent) -> Vec<Instant> {
        self.slots[event as usize]
            .timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Builds delta statistics between two event kinds, e.g. `TaskBegin` ->
    /// `TaskEnd` for per-task duration.
    ///
    /// # Errors
    /// Returns an error describing the mismatch if `begin` and `end` have a
    /// different number of recorded samples -- the two event streams are
    /// expected to advance in lockstep (every `TASK_BEGIN` is eventually
    /// followed by exactly one `TASK_END`), so unequal counts indicate a
    /// stage that is still mid-task or a caller invoking this before
    /// `execute()` had a chance to pair them up.
    pub fn build_delta_statistic(
        &self,
        begin: StageEvent,
        end: StageEvent,
    ) -> Result<Statistic, String> {
        let begins = self.get_trace_event(begin);
        let ends = self.get_trace_event(end);
        if begins.len() != ends.len() {
            return Err(format!(
                "incoherent trace counts for '{}': {:?} has {} samples, {:?} has {}",
                self.name,
                begin,
                begins.len(),
                end,
                ends.len()
            ));
        }
        let mut deltas: Vec<f64> = begins
            .iter()
            .zip(ends.iter())
            .map(|(b, e)| e.saturating_duration_since(*b).as_secs_f64())
            .collect();
        Ok(build_statistic(&mut deltas))
    }
}

fn build_statistic(deltas: &mut [f64]) -> Statistic {
    let count = deltas.len();
    if count == 0 {
        return Statistic {
            count: 0,
            mean_secs: 0.0,
            min_secs: 0.0,
            max_secs: 0.0,
            stddev_secs: 0.0,
            median_secs: 0.0,
        };
    }
    deltas.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let sum: f64 = deltas.iter().sum();
    let mean = sum / count as f64;
    let min = deltas[0];
    let max = deltas[count - 1];
    let stddev = if count < 2 {
        0.0
    } else {
        let variance =
            deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    };
    let median = if count % 2 == 1 {
        deltas[count / 2]
    } else {
        (deltas[count / 2 - 1] + deltas[count / 2]) / 2.0
    };
    Statistic {
        count,
        mean_secs: mean,
        min_secs: min,
        max_secs: max,
        stddev_secs: stddev,
        median_secs: median,
    }
}

/// All event kinds, for callers that want to report overflow for every slot.
pub fn all_events() -> [StageEvent; NUM_EVENTS] {
    ALL_EVENTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn records_and_pairs_samples() {
        let sampler = Sampler::new("test-stage");
        for _ in 0..5 {
            sampler.sample(StageEvent::TaskBegin);
            sleep(Duration::from_micros(200));
            sampler.sample(StageEvent::TaskEnd);
        }
        let stat = sampler
            .build_delta_statistic(StageEvent::TaskBegin, StageEvent::TaskEnd)
            .unwrap();
        assert_eq!(stat.count, 5);
        assert!(stat.mean_secs > 0.0);
        assert!(stat.min_secs <= stat.mean_secs);
        assert!(stat.mean_secs <= stat.max_secs);
    }

    #[test]
    fn mismatched_counts_is_an_error() {
        let sampler = Sampler::new("test-stage");
        sampler.sample(StageEvent::TaskBegin);
        sampler.sample(StageEvent::TaskBegin);
        sampler.sample(StageEvent::TaskEnd);
        let err = sampler
            .build_delta_statistic(StageEvent::TaskBegin, StageEvent::TaskEnd)
            .unwrap_err();
        assert!(err.contains("incoherent"));
    }

    #[test]
    fn overflow_counted_past_capacity() {
        let sampler = Sampler::new("test-stage");
        for _ in 0..(MAX_SAMPLES + 3) {
            sampler.sample(StageEvent::ExecuteBegin);
        }
        assert_eq!(
            sampler.number_of_sampled_trace_events(StageEvent::ExecuteBegin),
            MAX_SAMPLES
        );
        assert_eq!(sampler.overflow_count(StageEvent::ExecuteBegin), 3);
    }

    #[test]
    fn empty_statistic_is_zeroed() {
        let sampler = Sampler::new("idle");
        let stat = sampler
            .build_delta_statistic(StageEvent::TaskBegin, StageEvent::TaskEnd)
            .unwrap();
        assert_eq!(stat.count, 0);
        assert_eq!(stat.mean_secs, 0.0);
    }
}
