//! Top-level controller: compiles a recipe and drives it to completion.
//!
//! `TaskTree` owns the runtime tree and the driver context. `start` is
//! non-blocking: it schedules the initial wave of work and returns, and
//! the host then pumps events with `poll` or hands control to
//! `run_blocking`. Progress and the single terminal outcome are exposed
//! both as accessors and as registered callbacks.

use std::any::Any;
use std::rc::Rc;

use crossbeam_channel::Receiver;
use tracing::warn;

use crate::error::Result;
use crate::outcome::DoneWith;
use crate::recipe::Group;
use crate::runtime::Runtime;
use crate::storage::Storage;

/// A compiled, runnable task tree.
pub struct TaskTree {
    runtime: Runtime,
}

impl TaskTree {
    /// Compile the recipe: build the runtime tree, link barrier waiters,
    /// and count the asynchronous leaves.
    pub fn new(recipe: Group) -> Self {
        Self {
            runtime: Runtime::compile(&recipe),
        }
    }

    /// Number of asynchronous leaves (tasks and barrier waits) in the
    /// tree; equals [`TaskTree::progress_maximum`].
    pub fn task_count(&self) -> usize {
        self.runtime.progress_max
    }

    pub fn progress_value(&self) -> usize {
        self.runtime.progress_value
    }

    pub fn progress_maximum(&self) -> usize {
        self.runtime.progress_max
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    /// Terminal outcome of a finished run, if any.
    pub fn outcome(&self) -> Option<DoneWith> {
        self.runtime.outcome
    }

    /// Number of live storage instances across the whole tree.
    pub fn active_storage_count(&self) -> usize {
        self.runtime.storage_live
    }

    /// Initialize the outermost instance of `storage` right after the
    /// tree creates it.
    pub fn on_storage_setup<T: 'static>(
        &mut self,
        storage: &Storage<T>,
        handler: impl Fn(&mut T) + 'static,
    ) {
        let erased = Rc::new(move |value: &mut dyn Any| match value.downcast_mut::<T>() {
            Some(value) => handler(value),
            None => warn!("storage setup callback received a foreign type"),
        });
        self.runtime
            .storage_setup_cbs
            .insert(storage.base().key(), erased);
    }

    /// Read the outermost instance of `storage` just before the tree
    /// destroys it. Not invoked when a running tree is dropped.
    pub fn on_storage_done<T: 'static>(
        &mut self,
        storage: &Storage<T>,
        handler: impl Fn(&T) + 'static,
    ) {
        let erased = Rc::new(move |value: &dyn Any| match value.downcast_ref::<T>() {
            Some(value) => handler(value),
            None => warn!("storage done callback received a foreign type"),
        });
        self.runtime
            .storage_done_cbs
            .insert(storage.base().key(), erased);
    }

    /// Observe every progress increment.
    pub fn on_progress_changed(&mut self, handler: impl Fn(usize) + 'static) {
        self.runtime.on_progress = Some(Box::new(handler));
    }

    /// Observe the single terminal outcome.
    pub fn on_done(&mut self, handler: impl Fn(DoneWith) + 'static) {
        self.runtime.on_done = Some(Box::new(handler));
    }

    /// Start the tree without blocking. Completion events queue up until
    /// the next `poll` or `run_blocking` call.
    pub fn start(&mut self) -> Result<()> {
        self.runtime.start()
    }

    /// Process everything that is ready — queued completions and due
    /// timeouts — without blocking.
    pub fn poll(&mut self) {
        self.runtime.drain();
    }

    /// Cancel the whole tree. Idempotent; a settled tree is left alone.
    pub fn cancel(&mut self) {
        self.runtime.cancel_tree();
    }

    /// Drive the tree to its terminal outcome on the calling thread,
    /// starting it first if needed.
    pub fn run_blocking(&mut self) -> Result<DoneWith> {
        self.runtime.run_blocking()
    }

    /// Like [`TaskTree::run_blocking`], cancelling the tree when a
    /// message arrives on the token.
    pub fn run_blocking_with_cancel(&mut self, cancel: &Receiver<()>) -> Result<DoneWith> {
        self.runtime.run_blocking_with_cancel(cancel)
    }
}

impl Drop for TaskTree {
    /// Dropping a running tree cancels it. Node-level done handlers
    /// still observe the cancellation, but the storage-done callbacks
    /// and the controller events are suppressed.
    fn drop(&mut self) {
        if self.runtime.is_running() {
            self.runtime.tearing_down = true;
            self.runtime.cancel_tree();
        }
    }
}

impl std::fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTree")
            .field("task_count", &self.task_count())
            .field("progress", &self.progress_value())
            .field("running", &self.is_running())
            .finish()
    }
}
