//! Fan-out of per-target work over scoped OS threads.
//!
//! Every target gets its own thread; a [`Semaphore`] bounds how many run at
//! once. Outcomes travel back over a bounded channel and are returned in
//! input order. A failing target never cancels its siblings.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::cancel::CancellationToken;
use super::semaphore::Semaphore;
use crate::error::TargetError;

/// Default number of targets applied concurrently.
pub const DEFAULT_WORKER_POOL: usize = 8;
/// Default duration above which a target is reported as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(200);

/// Concurrency knobs for a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum targets in flight.
    pub worker_pool: usize,
    /// Targets slower than this are logged at warn level.
    pub slow_threshold: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            worker_pool: DEFAULT_WORKER_POOL,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

/// Result of running one target.
#[derive(Debug)]
pub struct TargetOutcome<T> {
    /// Position of the target in the input list.
    pub index: usize,
    /// Target name.
    pub target: String,
    /// What the worker produced.
    pub result: Result<T, TargetError>,
    /// Wall-clock time spent in the worker (zero if never started).
    pub elapsed: Duration,
}

/// Run `f` for every target concurrently, at most `settings.worker_pool` at
/// a time.
///
/// Blocks until every worker has finished. Targets that observe `cancel`
/// before starting yield [`TargetError::Cancelled`]; a panic inside `f`
/// yields [`TargetError::Panicked`].
pub fn apply_parallel<T, F>(
    cancel: &CancellationToken,
    targets: &[String],
    settings: &DispatchSettings,
    f: F,
) -> Vec<TargetOutcome<T>>
where
    T: Send,
    F: Fn(&str) -> Result<T, TargetError> + Sync,
{
    if targets.is_empty() {
        return Vec::new();
    }
    let semaphore = Semaphore::new(settings.worker_pool);
    let (tx, rx) = mpsc::sync_channel(targets.len());

    std::thread::scope(|s| {
        for (index, target) in targets.iter().enumerate() {
            let tx = tx.clone();
            let semaphore = &semaphore;
            let f = &f;
            s.spawn(move || {
                let outcome = match semaphore.acquire(cancel) {
                    Some(_permit) => run_target(index, target, cancel, settings, f),
                    None => cancelled(index, target),
                };
                tx.send(outcome).ok();
            });
        }
    });
    drop(tx);

    let mut outcomes: Vec<TargetOutcome<T>> = rx.into_iter().collect();
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

/// Run `f` for every target in order on the calling thread.
///
/// Once `cancel` is observed, that target and every later one yield
/// [`TargetError::Cancelled`] without running.
pub fn apply_sequential<T, F>(
    cancel: &CancellationToken,
    targets: &[String],
    settings: &DispatchSettings,
    f: F,
) -> Vec<TargetOutcome<T>>
where
    F: Fn(&str) -> Result<T, TargetError>,
{
    let mut outcomes = Vec::with_capacity(targets.len());
    let mut stopped = false;
    for (index, target) in targets.iter().enumerate() {
        stopped = stopped || cancel.is_cancelled();
        if stopped {
            outcomes.push(cancelled(index, target));
        } else {
            outcomes.push(run_target(index, target, cancel, settings, &f));
        }
    }
    outcomes
}

fn cancelled<T>(index: usize, target: &str) -> TargetOutcome<T> {
    TargetOutcome {
        index,
        target: target.to_string(),
        result: Err(TargetError::Cancelled),
        elapsed: Duration::ZERO,
    }
}

fn run_target<T, F>(
    index: usize,
    target: &str,
    cancel: &CancellationToken,
    settings: &DispatchSettings,
    f: &F,
) -> TargetOutcome<T>
where
    F: Fn(&str) -> Result<T, TargetError>,
{
    if cancel.is_cancelled() {
        return cancelled(index, target);
    }
    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| f(target)))
        .unwrap_or_else(|payload| Err(TargetError::Panicked(panic_message(payload.as_ref()))));
    let elapsed = start.elapsed();
    if elapsed > settings.slow_threshold {
        tracing::warn!(
            "target '{target}' took {}ms (threshold {}ms)",
            elapsed.as_millis(),
            settings.slow_threshold.as_millis()
        );
    } else {
        tracing::debug!("target '{target}' finished in {}ms", elapsed.as_millis());
    }
    TargetOutcome {
        index,
        target: target.to_string(),
        result,
        elapsed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
