//! Task capability: the adapter contract and the typed task builder.
//!
//! The engine never performs I/O itself. A leaf task wraps an external
//! adapter implementing [`TaskAdapter`]: the engine constructs it, runs
//! the user's setup handler against it, asks it to start, and waits for
//! exactly one completion signal on the driver context. Cancellation is
//! cooperative — [`TaskAdapter::request_cancel`] signals intent, and any
//! later completion emission is dropped as the acknowledgement.

use std::rc::Rc;
use std::time::Duration;

use crate::outcome::{DoneFilter, DoneResult, DoneWith, SetupResult};
use crate::recipe::handler::{IntoTaskDone, IntoTaskSetup, TaskDoneFn, TaskSetupFn};
use crate::recipe::{GroupItem, TaskItem};
use crate::runtime::driver::DoneSignal;

/// Contract every external task adapter implements.
pub trait TaskAdapter: 'static {
    /// Begin the work. The signal may be cloned to any thread; the
    /// adapter emits exactly one result through it. An adapter that
    /// cannot start signals an error right away.
    fn start(&mut self, signal: DoneSignal);

    /// Cooperative cancellation: signal the work to stop promptly. The
    /// engine treats the node as cancelled immediately; a completion
    /// that still arrives is dropped.
    fn request_cancel(&mut self) {}
}

/// Typed task leaf under construction.
///
/// ```ignore
/// let item: GroupItem = CustomTask::<MyAdapter>::new()
///     .on_setup(|adapter: &mut MyAdapter| { adapter.configure(); })
///     .on_done(|adapter: &MyAdapter, with: DoneWith| with.default_result())
///     .into();
/// ```
pub struct CustomTask<A: TaskAdapter + Default> {
    setup: Option<TaskSetupFn<A>>,
    done: Option<TaskDoneFn<A>>,
    filter: DoneFilter,
    timeout: Option<Duration>,
    on_timeout: Option<Rc<dyn Fn()>>,
}

impl<A: TaskAdapter + Default> CustomTask<A> {
    pub fn new() -> Self {
        Self {
            setup: None,
            done: None,
            filter: DoneFilter::Always,
            timeout: None,
            on_timeout: None,
        }
    }

    /// Configure the adapter before it starts. Returning
    /// `StopWithSuccess`/`StopWithError` completes the task immediately
    /// without starting the adapter or invoking the done handler.
    pub fn on_setup<M>(mut self, handler: impl IntoTaskSetup<A, M>) -> Self {
        self.setup = Some(handler.into_task_setup());
        self
    }

    /// Observe the task's completion; runs for every outcome.
    pub fn on_done<M>(mut self, handler: impl IntoTaskDone<A, M>) -> Self {
        self.done = Some(handler.into_task_done());
        self.filter = DoneFilter::Always;
        self
    }

    /// Observe the task's completion for the outcomes the filter admits.
    pub fn on_done_if<M>(mut self, filter: DoneFilter, handler: impl IntoTaskDone<A, M>) -> Self {
        self.done = Some(handler.into_task_done());
        self.filter = filter;
        self
    }

    /// Cancel the task if it is still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Like [`CustomTask::with_timeout`], invoking `handler` when the
    /// timeout fires, before the task is cancelled.
    pub fn with_timeout_and(mut self, timeout: Duration, handler: impl Fn() + 'static) -> Self {
        self.timeout = Some(timeout);
        self.on_timeout = Some(Rc::new(handler));
        self
    }
}

impl<A: TaskAdapter + Default> Default for CustomTask<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime face of a task leaf, erased over the adapter type.
///
/// The harness owns the adapter between setup and completion; `finish`
/// drops it, so no adapter outlives its node.
pub(crate) trait LeafHarness {
    /// Construct the adapter and run the user setup handler.
    fn setup(&mut self) -> SetupResult;
    /// Ask the adapter to begin.
    fn start(&mut self, signal: DoneSignal);
    /// Signal cooperative cancellation to the adapter.
    fn request_cancel(&mut self);
    /// Run the done handler (subject to the filter) and release the
    /// adapter; returns the effective result for parent propagation.
    fn finish(&mut self, with: DoneWith) -> DoneResult;
}

struct AdapterHarness<A: TaskAdapter + Default> {
    adapter: Option<A>,
    setup: Option<TaskSetupFn<A>>,
    done: Option<TaskDoneFn<A>>,
    filter: DoneFilter,
}

impl<A: TaskAdapter + Default> LeafHarness for AdapterHarness<A> {
    fn setup(&mut self) -> SetupResult {
        let mut adapter = A::default();
        let result = match &self.setup {
            Some(handler) => handler(&mut adapter),
            None => SetupResult::Continue,
        };
        if result == SetupResult::Continue {
            self.adapter = Some(adapter);
        }
        result
    }

    fn start(&mut self, signal: DoneSignal) {
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.start(signal);
        }
    }

    fn request_cancel(&mut self) {
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.request_cancel();
        }
    }

    fn finish(&mut self, with: DoneWith) -> DoneResult {
        let adapter = self.adapter.take();
        match (&self.done, adapter.as_ref()) {
            (Some(handler), Some(adapter)) if self.filter.admits(with) => handler(adapter, with),
            _ => with.default_result(),
        }
    }
}

impl<A: TaskAdapter + Default> From<CustomTask<A>> for GroupItem {
    fn from(task: CustomTask<A>) -> Self {
        let setup = task.setup;
        let done = task.done;
        let filter = task.filter;
        let factory: Rc<dyn Fn() -> Box<dyn LeafHarness>> = Rc::new(move || {
            Box::new(AdapterHarness {
                adapter: None,
                setup: setup.clone(),
                done: done.clone(),
                filter,
            })
        });
        GroupItem::Task(TaskItem {
            factory,
            timeout: task.timeout,
            on_timeout: task.on_timeout,
        })
    }
}
