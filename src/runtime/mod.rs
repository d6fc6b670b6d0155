//! Runtime counterpart of the recipe tree.
//!
//! Compilation turns the immutable AST into an arena of runtime nodes in
//! one pass, assigning each node a stable [`NodeId`] and counting the
//! asynchronous leaves (tasks and barrier waits) that seed the progress
//! maximum. The scheduler in [`scheduler`] walks this arena; the driver
//! in [`driver`] feeds it completion events and timeouts.

pub(crate) mod driver;
pub(crate) mod scheduler;
pub(crate) mod scope;

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::barrier::Barrier;
use crate::outcome::{DoneResult, DoneWith, SetupResult};
use crate::recipe::{ChildItem, ExecutionMode, Group, WorkflowPolicy};
use crate::storage::{StorageBase, StorageKey};
use crate::task::LeafHarness;
use driver::{Event, Timers};
use scope::ActiveSlot;

/// Stable identity of a runtime node within one compiled tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

/// Node lifecycle. Terminal states are sticky: a finished node never
/// transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    NotStarted,
    Running,
    Finished(DoneWith),
}

impl NodeState {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, NodeState::Finished(_))
    }

    pub(crate) fn is_running(self) -> bool {
        self == NodeState::Running
    }
}

/// A storage instance owned by a running group.
pub(crate) struct StorageInstance {
    pub(crate) key: StorageKey,
    pub(crate) slot: ActiveSlot,
    /// True when no ancestor holds the same key: the instance the
    /// controller-level storage callbacks apply to.
    pub(crate) outermost: bool,
}

pub(crate) struct GroupNode {
    pub(crate) mode: ExecutionMode,
    pub(crate) policy: WorkflowPolicy,
    pub(crate) setup: Option<Rc<dyn Fn() -> SetupResult>>,
    pub(crate) done: Option<Rc<dyn Fn(DoneWith) -> DoneResult>>,
    pub(crate) storage_decls: Vec<StorageBase>,
    pub(crate) barrier_decls: Vec<Barrier>,
    pub(crate) children: Vec<NodeId>,
    /// Index of the next child to start, in declaration order.
    pub(crate) next_child: usize,
    /// Children currently live (started, not yet terminal).
    pub(crate) live: usize,
    pub(crate) any_success: bool,
    pub(crate) any_error: bool,
    /// Effective result of the first child to finish.
    pub(crate) first: Option<DoneResult>,
    /// Outcome decided before all children finished: a policy stop or an
    /// outside cancellation. While set, no further children start.
    pub(crate) pending: Option<DoneWith>,
    /// Guards against re-entrant scheduling while a drive frame for this
    /// group is already on the stack.
    pub(crate) in_drive: bool,
    pub(crate) storage_instances: Vec<StorageInstance>,
    pub(crate) barrier_instances: Vec<usize>,
}

impl GroupNode {
    fn from_recipe(group: &Group) -> Self {
        Self {
            mode: group.mode,
            policy: group.policy,
            setup: group.setup.clone(),
            done: group.done.clone(),
            storage_decls: group.storages.clone(),
            barrier_decls: group.barriers.clone(),
            children: Vec::new(),
            next_child: 0,
            live: 0,
            any_success: false,
            any_error: false,
            first: None,
            pending: None,
            in_drive: false,
            storage_instances: Vec::new(),
            barrier_instances: Vec::new(),
        }
    }
}

pub(crate) struct TaskNode {
    pub(crate) harness: Box<dyn LeafHarness>,
}

pub(crate) struct WaitNode {
    pub(crate) barrier: Barrier,
    /// Runtime barrier instance this waiter registered with.
    pub(crate) instance: Option<usize>,
}

pub(crate) enum NodeKind {
    Group(GroupNode),
    Task(TaskNode),
    Sync(Rc<dyn Fn() -> DoneResult>),
    Wait(WaitNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeTag {
    Group,
    Task,
    Sync,
    Wait,
}

pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) state: NodeState,
    pub(crate) kind: NodeKind,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_timeout: Option<Rc<dyn Fn()>>,
    pub(crate) timer: Option<usize>,
    /// Number of asynchronous leaves in this subtree.
    pub(crate) weight: usize,
}

impl Node {
    pub(crate) fn tag(&self) -> NodeTag {
        match &self.kind {
            NodeKind::Group(_) => NodeTag::Group,
            NodeKind::Task(_) => NodeTag::Task,
            NodeKind::Sync(_) => NodeTag::Sync,
            NodeKind::Wait(_) => NodeTag::Wait,
        }
    }
}

/// Runtime instance of a declared barrier, owned by the declaring group.
pub(crate) struct BarrierInstance {
    pub(crate) required: usize,
    pub(crate) current: usize,
    pub(crate) waiters: Vec<NodeId>,
    pub(crate) alive: bool,
}

type StorageSetupCb = Rc<dyn Fn(&mut dyn Any)>;
type StorageDoneCb = Rc<dyn Fn(&dyn Any)>;

/// One compiled, runnable tree: the node arena plus the driver state.
pub(crate) struct Runtime {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) tx: Sender<Event>,
    pub(crate) rx: Receiver<Event>,
    pub(crate) timers: Timers,
    pub(crate) barrier_arena: Vec<BarrierInstance>,
    pub(crate) progress_value: usize,
    pub(crate) progress_max: usize,
    pub(crate) outcome: Option<DoneWith>,
    pub(crate) started: bool,
    /// Set while the controller is being dropped mid-run: suppresses the
    /// storage-done callbacks and all controller-level events.
    pub(crate) tearing_down: bool,
    pub(crate) storage_live: usize,
    pub(crate) storage_setup_cbs: HashMap<StorageKey, StorageSetupCb>,
    pub(crate) storage_done_cbs: HashMap<StorageKey, StorageDoneCb>,
    pub(crate) on_progress: Option<Box<dyn Fn(usize)>>,
    pub(crate) on_done: Option<Box<dyn Fn(DoneWith)>>,
}

impl Runtime {
    pub(crate) fn compile(recipe: &Group) -> Self {
        let (tx, rx) = unbounded();
        let mut nodes = Vec::new();
        let root = build_group(&mut nodes, recipe, None);
        let progress_max = nodes[root.0].weight;
        Self {
            nodes,
            root,
            tx,
            rx,
            timers: Timers::default(),
            barrier_arena: Vec::new(),
            progress_value: 0,
            progress_max,
            outcome: None,
            started: false,
            tearing_down: false,
            storage_live: 0,
            storage_setup_cbs: HashMap::new(),
            storage_done_cbs: HashMap::new(),
            on_progress: None,
            on_done: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started && self.outcome.is_none()
    }

    pub(crate) fn group(&self, id: NodeId) -> &GroupNode {
        match &self.nodes[id.0].kind {
            NodeKind::Group(group) => group,
            _ => unreachable!("node {:?} is not a group", id),
        }
    }

    pub(crate) fn group_mut(&mut self, id: NodeId) -> &mut GroupNode {
        match &mut self.nodes[id.0].kind {
            NodeKind::Group(group) => group,
            _ => unreachable!("node {:?} is not a group", id),
        }
    }
}

fn build_group(nodes: &mut Vec<Node>, group: &Group, parent: Option<NodeId>) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node {
        parent,
        state: NodeState::NotStarted,
        kind: NodeKind::Group(GroupNode::from_recipe(group)),
        timeout: group.timeout,
        on_timeout: group.on_timeout.clone(),
        timer: None,
        weight: 0,
    });

    let mut weight = 0;
    let mut child_ids = Vec::with_capacity(group.children.len());
    for child in &group.children {
        let child_id = match child {
            ChildItem::Group(nested) => build_group(nodes, nested, Some(id)),
            ChildItem::Task(task) => {
                let child_id = NodeId(nodes.len());
                nodes.push(Node {
                    parent: Some(id),
                    state: NodeState::NotStarted,
                    kind: NodeKind::Task(TaskNode {
                        harness: (task.factory)(),
                    }),
                    timeout: task.timeout,
                    on_timeout: task.on_timeout.clone(),
                    timer: None,
                    weight: 1,
                });
                child_id
            }
            ChildItem::Sync(sync) => {
                let child_id = NodeId(nodes.len());
                nodes.push(Node {
                    parent: Some(id),
                    state: NodeState::NotStarted,
                    kind: NodeKind::Sync(sync.run.clone()),
                    timeout: None,
                    on_timeout: None,
                    timer: None,
                    weight: 0,
                });
                child_id
            }
            ChildItem::Wait(barrier) => {
                let child_id = NodeId(nodes.len());
                nodes.push(Node {
                    parent: Some(id),
                    state: NodeState::NotStarted,
                    kind: NodeKind::Wait(WaitNode {
                        barrier: barrier.clone(),
                        instance: None,
                    }),
                    timeout: None,
                    on_timeout: None,
                    timer: None,
                    weight: 1,
                });
                child_id
            }
        };
        weight += nodes[child_id.0].weight;
        child_ids.push(child_id);
    }

    nodes[id.0].weight = weight;
    if let NodeKind::Group(group_node) = &mut nodes[id.0].kind {
        group_node.children = child_ids;
    }
    id
}
