//! Declarative hierarchical task orchestration.
//!
//! A recipe is a tree of [`Group`]s whose leaves are asynchronous tasks,
//! synchronous steps, or barrier waits. The engine schedules every node
//! on a single driver context, combines child outcomes according to each
//! group's [`WorkflowPolicy`], enforces parallel limits, carries typed
//! [`Storage`] alongside the running subtree, and reports one terminal
//! [`DoneWith`] per run.
//!
//! ```ignore
//! let log: Storage<Vec<String>> = Storage::new();
//! let recipe = Group::new([
//!     GroupItem::from(&log),
//!     parallel(),
//!     workflow_policy(WorkflowPolicy::StopOnError),
//!     GroupItem::from(CustomTask::<FetchAdapter>::new()
//!         .on_setup(|fetch: &mut FetchAdapter| fetch.url = "…".into())),
//!     sync(|| ()),
//! ]);
//! let mut tree = TaskTree::new(recipe);
//! let outcome = tree.run_blocking()?;
//! ```

pub mod barrier;
pub mod error;
pub mod outcome;
pub mod recipe;
pub mod storage;
pub mod task;
pub mod tree;

mod runtime;

pub use barrier::{Barrier, BarrierAdvancer};
pub use error::{Error, Result};
pub use outcome::{DoneFilter, DoneResult, DoneWith, SetupResult};
pub use recipe::{
    on_group_done, on_group_setup, parallel, parallel_limit, sequential, sync, wait_for_barrier,
    workflow_policy, ExecutionMode, Group, GroupItem, WorkflowPolicy,
};
pub use runtime::driver::DoneSignal;
pub use storage::{Storage, StorageBase, StorageKey};
pub use task::{CustomTask, TaskAdapter};
pub use tree::TaskTree;
