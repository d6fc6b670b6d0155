//! Shared fixtures for the integration suites.
//!
//! Recipes under test log every handler invocation into a [`LogBook`]
//! shared between the driver thread and adapter threads. The synthetic
//! [`ClockTask`] adapter sleeps on a helper thread and reports a
//! configured result; [`AdvanceTask`] advances a barrier before
//! completing.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tasktree::{
    on_group_done, on_group_setup, Barrier, BarrierAdvancer, CustomTask, DoneResult, DoneSignal,
    DoneWith, GroupItem, SetupResult, TaskAdapter,
};

/// A task that completes immediately.
pub const NOW: Duration = Duration::ZERO;
/// Short enough to keep tests fast, long enough to order reliably.
pub const SHORT: Duration = Duration::from_millis(10);
/// Long enough that a test only finishes it by cancellation.
pub const LONG: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Setup,
    Success,
    Error,
    Canceled,
    GroupSetup,
    GroupSuccess,
    GroupError,
    GroupCanceled,
    Sync,
    BarrierAdvance,
    Timeout,
}

pub type LogBook = Arc<Mutex<Vec<(i32, Mark)>>>;

pub fn log_book() -> LogBook {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn push(log: &LogBook, id: i32, mark: Mark) {
    log.lock().unwrap().push((id, mark));
}

pub fn entries(log: &LogBook) -> Vec<(i32, Mark)> {
    log.lock().unwrap().clone()
}

/// Index of `entry` in the log; panics when absent.
pub fn position(log: &LogBook, entry: (i32, Mark)) -> usize {
    let entries = entries(log);
    match entries.iter().position(|&e| e == entry) {
        Some(index) => index,
        None => panic!("{:?} not found in {:?}", entry, entries),
    }
}

/// Synthetic clock task: reports the configured result after the
/// configured duration, immediately when the duration is zero.
pub struct ClockTask {
    pub duration: Duration,
    pub result: DoneResult,
}

impl Default for ClockTask {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            result: DoneResult::Success,
        }
    }
}

impl TaskAdapter for ClockTask {
    fn start(&mut self, signal: DoneSignal) {
        if self.duration.is_zero() {
            signal.finish(self.result);
            return;
        }
        let duration = self.duration;
        let result = self.result;
        thread::spawn(move || {
            thread::sleep(duration);
            signal.finish(result);
        });
    }
}

/// Typed builder for a clock task that logs `Setup` on start and
/// `Success`/`Error`/`Canceled` on completion, propagating cancellation
/// as an error the way a plain adapter would.
pub fn clock_task(
    log: &LogBook,
    id: i32,
    result: DoneResult,
    duration: Duration,
) -> CustomTask<ClockTask> {
    let setup_log = log.clone();
    let done_log = log.clone();
    CustomTask::<ClockTask>::new()
        .on_setup(move |clock: &mut ClockTask| {
            clock.duration = duration;
            clock.result = result;
            push(&setup_log, id, Mark::Setup);
        })
        .on_done(move |_: &ClockTask, with: DoneWith| {
            let mark = match with {
                DoneWith::Cancel => Mark::Canceled,
                _ if result == DoneResult::Success => Mark::Success,
                _ => Mark::Error,
            };
            push(&done_log, id, mark);
            match with {
                DoneWith::Cancel => DoneResult::Error,
                _ => result,
            }
        })
}

/// [`clock_task`] erased into a group item.
pub fn task(log: &LogBook, id: i32, result: DoneResult, duration: Duration) -> GroupItem {
    clock_task(log, id, result, duration).into()
}

pub fn ok_task(log: &LogBook, id: i32) -> GroupItem {
    task(log, id, DoneResult::Success, NOW)
}

pub fn ok_task_for(log: &LogBook, id: i32, duration: Duration) -> GroupItem {
    task(log, id, DoneResult::Success, duration)
}

pub fn err_task(log: &LogBook, id: i32) -> GroupItem {
    task(log, id, DoneResult::Error, NOW)
}

pub fn err_task_for(log: &LogBook, id: i32, duration: Duration) -> GroupItem {
    task(log, id, DoneResult::Error, duration)
}

/// A task whose setup handler routes it without starting the adapter.
pub fn tweak_task(log: &LogBook, id: i32, result: SetupResult) -> GroupItem {
    let setup_log = log.clone();
    let done_log = log.clone();
    CustomTask::<ClockTask>::new()
        .on_setup(move |_: &mut ClockTask| {
            push(&setup_log, id, Mark::Setup);
            result
        })
        .on_done(move |with: DoneWith| {
            let mark = match with {
                DoneWith::Success => Mark::Success,
                DoneWith::Error => Mark::Error,
                DoneWith::Cancel => Mark::Canceled,
            };
            push(&done_log, id, mark);
        })
        .into()
}

pub fn group_setup(log: &LogBook, id: i32) -> GroupItem {
    let log = log.clone();
    on_group_setup(move || {
        push(&log, id, Mark::GroupSetup);
    })
}

/// A group setup handler that logs and then routes the group.
pub fn group_setup_tweak(log: &LogBook, id: i32, result: SetupResult) -> GroupItem {
    let log = log.clone();
    on_group_setup(move || {
        push(&log, id, Mark::GroupSetup);
        result
    })
}

pub fn group_done(log: &LogBook, id: i32) -> GroupItem {
    let log = log.clone();
    on_group_done(move |with: DoneWith| {
        push(&log, id, group_mark(with));
    })
}

/// A group done handler that logs and rewrites the outcome.
pub fn group_done_rewrite(log: &LogBook, id: i32, rewrite: DoneResult) -> GroupItem {
    let log = log.clone();
    on_group_done(move |with: DoneWith| {
        push(&log, id, group_mark(with));
        rewrite
    })
}

pub fn group_mark(with: DoneWith) -> Mark {
    match with {
        DoneWith::Success => Mark::GroupSuccess,
        DoneWith::Error => Mark::GroupError,
        DoneWith::Cancel => Mark::GroupCanceled,
    }
}

/// Adapter that advances a barrier once, then completes successfully.
#[derive(Default)]
pub struct AdvanceTask {
    pub advancer: Option<BarrierAdvancer>,
    pub log: Option<(LogBook, i32)>,
}

impl TaskAdapter for AdvanceTask {
    fn start(&mut self, signal: DoneSignal) {
        if let Some((log, id)) = self.log.take() {
            push(&log, id, Mark::BarrierAdvance);
        }
        if let Some(advancer) = self.advancer.take() {
            advancer.advance();
        }
        signal.success();
    }
}

/// A task that logs `Setup`, advances `barrier` once, and succeeds.
pub fn advance_barrier_task(log: &LogBook, barrier: &Barrier, id: i32) -> GroupItem {
    let setup_log = log.clone();
    let barrier = barrier.clone();
    CustomTask::<AdvanceTask>::new()
        .on_setup(move |advance: &mut AdvanceTask| {
            push(&setup_log, id, Mark::Setup);
            advance.log = Some((setup_log.clone(), id));
            advance.advancer = Some(barrier.advancer());
        })
        .into()
}

/// Timeout handler that logs `Timeout` for `id`.
pub fn timeout_logger(log: &LogBook, id: i32) -> impl Fn() + 'static {
    let log = log.clone();
    move || push(&log, id, Mark::Timeout)
}
