//! Driver context: the event queue and logical timers.
//!
//! The engine never suspends its own thread. Adapters and barrier
//! advancers post events into an unbounded channel; the driver drains
//! them in turns, firing due timeout timers between receives. All state
//! transitions happen while draining, on the thread that owns the
//! runtime.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{NodeId, Runtime};
use crate::error::{Error, Result};
use crate::outcome::{DoneResult, DoneWith};

/// Events marshalled back to the driver context.
#[derive(Debug, Clone)]
pub(crate) enum Event {
    /// A task adapter reported completion.
    TaskDone { node: NodeId, result: DoneResult },
    /// A barrier instance was advanced.
    BarrierAdvance { instance: usize },
}

/// Completion signal handed to a task adapter when it starts.
///
/// The signal may be cloned and moved to any thread; it posts exactly one
/// result back to the driver context. Emissions that arrive after the
/// engine has cancelled or finished the task are dropped, which doubles
/// as the cancel acknowledgement.
#[derive(Clone)]
pub struct DoneSignal {
    tx: Sender<Event>,
    node: NodeId,
}

impl DoneSignal {
    pub(crate) fn new(tx: Sender<Event>, node: NodeId) -> Self {
        Self { tx, node }
    }

    /// Report the task's result to the engine.
    pub fn finish(&self, result: DoneResult) {
        let _ = self.tx.send(Event::TaskDone {
            node: self.node,
            result,
        });
    }

    /// Report success.
    pub fn success(&self) {
        self.finish(DoneResult::Success);
    }

    /// Report failure.
    pub fn error(&self) {
        self.finish(DoneResult::Error);
    }
}

impl std::fmt::Debug for DoneSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneSignal").field("node", &self.node).finish()
    }
}

struct TimerEntry {
    node: NodeId,
    deadline: Instant,
    canceled: bool,
}

/// Logical timeout timers, ordered by deadline.
///
/// Cancellation is lazy: cancelled entries stay in the heap and are
/// discarded when they surface.
#[derive(Default)]
pub(crate) struct Timers {
    entries: Vec<TimerEntry>,
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
}

impl Timers {
    pub(crate) fn arm(&mut self, node: NodeId, after: Duration) -> usize {
        let id = self.entries.len();
        let deadline = Instant::now() + after;
        self.entries.push(TimerEntry {
            node,
            deadline,
            canceled: false,
        });
        self.heap.push(Reverse((deadline, id)));
        id
    }

    pub(crate) fn cancel(&mut self, id: usize) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.canceled = true;
        }
    }

    /// Earliest live deadline, discarding cancelled entries from the top.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.entries[id].canceled {
                self.heap.pop();
                continue;
            }
            return Some(deadline);
        }
        None
    }

    /// Pops the next timer whose deadline has passed, if any.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<NodeId> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.entries[id].canceled {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            return Some(self.entries[id].node);
        }
        None
    }
}

/// Wait slice while watching a cancel token alongside the event queue.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Runtime {
    /// Processes everything that is ready without blocking: due timers
    /// and queued completion events.
    pub(crate) fn drain(&mut self) {
        loop {
            self.fire_due_timers();
            match self.rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.fire_due_timers();
    }

    fn fire_due_timers(&mut self) {
        loop {
            let now = Instant::now();
            match self.timers.pop_due(now) {
                Some(node) => self.fire_timeout(node),
                None => break,
            }
        }
    }

    /// Drives the tree to its terminal outcome on the calling thread.
    pub(crate) fn run_blocking(&mut self) -> Result<DoneWith> {
        if !self.started {
            self.start()?;
        }
        loop {
            self.drain();
            if let Some(outcome) = self.outcome {
                return Ok(outcome);
            }
            match self.timers.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(timeout) {
                        Ok(event) => self.handle_event(event),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
                    }
                }
                None => match self.rx.recv() {
                    Ok(event) => self.handle_event(event),
                    Err(_) => return Err(Error::ChannelClosed),
                },
            }
        }
    }

    /// Like [`Runtime::run_blocking`], but also watches a cancel token.
    /// A message on the token cancels the whole tree, which then settles
    /// through the normal cancellation path. The token is checked
    /// between short wait slices; a disconnected token is treated as
    /// never firing.
    pub(crate) fn run_blocking_with_cancel(&mut self, cancel: &Receiver<()>) -> Result<DoneWith> {
        if !self.started {
            self.start()?;
        }
        let mut watch_cancel = true;
        loop {
            self.drain();
            if let Some(outcome) = self.outcome {
                return Ok(outcome);
            }
            if watch_cancel {
                match cancel.try_recv() {
                    Ok(()) => {
                        self.cancel_tree();
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => watch_cancel = false,
                }
            }
            let mut timeout = CANCEL_POLL_INTERVAL;
            if let Some(deadline) = self.timers.next_deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }
            match self.rx.recv_timeout(timeout) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
            }
        }
    }
}
