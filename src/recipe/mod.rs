//! Recipe AST: the immutable description of a task tree.
//!
//! A recipe is a [`Group`] built from [`GroupItem`]s — nested groups,
//! task leaves, sync leaves, barrier waits, storage/barrier declarations,
//! and the group modifiers (execution mode, workflow policy, setup/done
//! handlers). Handlers live behind `Rc`, so recipes clone cheaply and a
//! cloned fragment keeps sharing its storage and barrier declarations.
//!
//! Construction is validated warn-and-fix: duplicate declarations are
//! dropped and duplicate modifiers are overridden by the last write,
//! each with a `tracing` warning, never a panic.

pub mod handler;

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::barrier::Barrier;
use crate::storage::{Storage, StorageBase};
use crate::task::LeafHarness;
use self::handler::{GroupDoneFn, GroupSetupFn, IntoGroupDone, IntoGroupSetup, IntoSync, SyncFn};

/// How a group runs its children.
///
/// `Sequential` is equivalent to `ParallelLimit(1)`; `ParallelLimit(0)`
/// is normalized to unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    ParallelLimit(usize),
}

impl ExecutionMode {
    /// Number of children allowed to be live at once.
    pub(crate) fn limit(self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => usize::MAX,
            ExecutionMode::ParallelLimit(0) => usize::MAX,
            ExecutionMode::ParallelLimit(limit) => limit,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// How children's outcomes combine into the group's outcome, and whether
/// a completing child stops the remaining ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPolicy {
    /// First error cancels the rest; the group errors iff any child
    /// errored.
    StopOnError,
    /// All children run; the group errors iff any child errored.
    ContinueOnError,
    /// First success cancels the rest; the group succeeds iff any child
    /// succeeded.
    StopOnSuccess,
    /// All children run; the group succeeds iff any child succeeded.
    ContinueOnSuccess,
    /// The first child to finish decides the group's outcome and cancels
    /// the rest.
    StopOnSuccessOrError,
    /// All children run; the group always succeeds.
    FinishAllAndSuccess,
    /// All children run; the group always errors.
    FinishAllAndError,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        WorkflowPolicy::StopOnError
    }
}

/// A synchronous leaf: runs during scheduling, completes immediately.
#[derive(Clone)]
pub struct SyncItem {
    pub(crate) run: SyncFn,
}

/// An erased task leaf, produced from a typed `CustomTask`.
#[derive(Clone)]
pub struct TaskItem {
    pub(crate) factory: Rc<dyn Fn() -> Box<dyn LeafHarness>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_timeout: Option<Rc<dyn Fn()>>,
}

/// Child nodes of a group, in declaration order.
#[derive(Clone)]
pub(crate) enum ChildItem {
    Group(Group),
    Task(TaskItem),
    Sync(SyncItem),
    Wait(Barrier),
}

/// One element of a group's body.
#[derive(Clone)]
pub enum GroupItem {
    Group(Group),
    Task(TaskItem),
    Sync(SyncItem),
    WaitForBarrier(Barrier),
    StorageDecl(StorageBase),
    BarrierDecl(Barrier),
    Mode(ExecutionMode),
    Policy(WorkflowPolicy),
    GroupSetup(GroupSetupFn),
    GroupDone(GroupDoneFn),
}

/// A non-leaf recipe node.
#[derive(Clone, Default)]
pub struct Group {
    pub(crate) mode: ExecutionMode,
    pub(crate) policy: WorkflowPolicy,
    pub(crate) setup: Option<GroupSetupFn>,
    pub(crate) done: Option<GroupDoneFn>,
    pub(crate) storages: Vec<StorageBase>,
    pub(crate) barriers: Vec<Barrier>,
    pub(crate) children: Vec<ChildItem>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_timeout: Option<Rc<dyn Fn()>>,
}

impl Group {
    /// Build a group from its items, applying warn-and-fix validation.
    pub fn new(items: impl IntoIterator<Item = GroupItem>) -> Self {
        let mut group = Group::default();
        let mut mode_set = false;
        let mut policy_set = false;
        for item in items {
            match item {
                GroupItem::Group(child) => group.children.push(ChildItem::Group(child)),
                GroupItem::Task(task) => group.children.push(ChildItem::Task(task)),
                GroupItem::Sync(sync) => group.children.push(ChildItem::Sync(sync)),
                GroupItem::WaitForBarrier(barrier) => {
                    group.children.push(ChildItem::Wait(barrier))
                }
                GroupItem::StorageDecl(storage) => {
                    if group.storages.contains(&storage) {
                        warn!("same storage declared twice in one group, skipping duplicate");
                    } else {
                        group.storages.push(storage);
                    }
                }
                GroupItem::BarrierDecl(barrier) => {
                    if group.barriers.iter().any(|b| b.key() == barrier.key()) {
                        warn!("same barrier declared twice in one group, skipping duplicate");
                    } else {
                        group.barriers.push(barrier);
                    }
                }
                GroupItem::Mode(mode) => {
                    if mode_set {
                        warn!("group execution mode redefined, overriding");
                    }
                    mode_set = true;
                    group.mode = mode;
                }
                GroupItem::Policy(policy) => {
                    if policy_set {
                        warn!("group workflow policy redefined, overriding");
                    }
                    policy_set = true;
                    group.policy = policy;
                }
                GroupItem::GroupSetup(setup) => {
                    if group.setup.is_some() {
                        warn!("group setup handler redefined, overriding");
                    }
                    group.setup = Some(setup);
                }
                GroupItem::GroupDone(done) => {
                    if group.done.is_some() {
                        warn!("group done handler redefined, overriding");
                    }
                    group.done = Some(done);
                }
            }
        }
        group
    }

    /// Cancel this group if it is still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Like [`Group::with_timeout`], invoking `handler` when the timeout
    /// fires, before the group is cancelled.
    pub fn with_timeout_and(mut self, timeout: Duration, handler: impl Fn() + 'static) -> Self {
        self.timeout = Some(timeout);
        self.on_timeout = Some(Rc::new(handler));
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn policy(&self) -> WorkflowPolicy {
        self.policy
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

// Closures stay out of Debug output; a group prints its shape.
impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("children", &self.children.len())
            .field("storages", &self.storages.len())
            .finish()
    }
}

/// Marks a group sequential (the default).
pub fn sequential() -> GroupItem {
    GroupItem::Mode(ExecutionMode::Sequential)
}

/// Runs all children of the group concurrently.
pub fn parallel() -> GroupItem {
    GroupItem::Mode(ExecutionMode::Parallel)
}

/// Caps the number of concurrently live children. `parallel_limit(1)`
/// is `sequential()`; zero means unlimited.
pub fn parallel_limit(limit: usize) -> GroupItem {
    if limit == 0 {
        warn!("parallel limit of zero means unlimited, using parallel mode");
    }
    GroupItem::Mode(ExecutionMode::ParallelLimit(limit))
}

/// Sets the group's workflow policy.
pub fn workflow_policy(policy: WorkflowPolicy) -> GroupItem {
    GroupItem::Policy(policy)
}

/// Registers the group's setup handler.
pub fn on_group_setup<M>(handler: impl IntoGroupSetup<M>) -> GroupItem {
    GroupItem::GroupSetup(handler.into_group_setup())
}

/// Registers the group's done handler.
pub fn on_group_done<M>(handler: impl IntoGroupDone<M>) -> GroupItem {
    GroupItem::GroupDone(handler.into_group_done())
}

/// A synchronous leaf. The closure runs during scheduling; returning
/// nothing counts as success.
pub fn sync<M>(handler: impl IntoSync<M>) -> GroupItem {
    GroupItem::Sync(SyncItem {
        run: handler.into_sync(),
    })
}

/// A leaf that completes once the referenced barrier is released.
pub fn wait_for_barrier(barrier: &Barrier) -> GroupItem {
    GroupItem::WaitForBarrier(barrier.clone())
}

impl From<Group> for GroupItem {
    fn from(group: Group) -> Self {
        GroupItem::Group(group)
    }
}

impl<T: 'static> From<&Storage<T>> for GroupItem {
    fn from(storage: &Storage<T>) -> Self {
        GroupItem::StorageDecl(storage.base())
    }
}

impl<T: 'static> From<Storage<T>> for GroupItem {
    fn from(storage: Storage<T>) -> Self {
        GroupItem::StorageDecl(storage.base())
    }
}

impl From<&Barrier> for GroupItem {
    fn from(barrier: &Barrier) -> Self {
        GroupItem::BarrierDecl(barrier.clone())
    }
}

impl From<Barrier> for GroupItem {
    fn from(barrier: Barrier) -> Self {
        GroupItem::BarrierDecl(barrier)
    }
}
