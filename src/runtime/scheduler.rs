//! Scheduling and outcome propagation.
//!
//! Everything here runs on the driver context: group entry, the
//! child-start loop, policy decisions, the cancellation walk, and the
//! storage/barrier lifecycle. Handlers are invoked inside a scope frame
//! (see [`super::scope`]) and behind a panic guard; a panicking handler
//! becomes an Error outcome of its node and the run always completes.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::driver::{DoneSignal, Event};
use super::scope::{self, ActiveSlot, BarrierBinding, ScopeFrame};
use super::{
    BarrierInstance, NodeId, NodeKind, NodeState, NodeTag, Runtime, StorageInstance,
};
use crate::barrier::BarrierKey;
use crate::error::{Error, Result};
use crate::outcome::{DoneResult, DoneWith, SetupResult};
use crate::recipe::WorkflowPolicy;
use crate::storage::StorageKey;

impl Runtime {
    pub(crate) fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        self.started = true;
        debug!(tasks = self.progress_max, "starting task tree");
        self.start_node(self.root);
        Ok(())
    }

    /// Cancels the whole tree. Idempotent: a settled or never-started
    /// tree is left alone.
    pub(crate) fn cancel_tree(&mut self) {
        if !self.started || self.nodes[self.root.0].state.is_terminal() {
            return;
        }
        debug!("cancelling task tree");
        self.cancel_node(self.root);
    }

    fn start_node(&mut self, id: NodeId) {
        match self.nodes[id.0].tag() {
            NodeTag::Group => self.enter_group(id),
            NodeTag::Task => self.start_task(id),
            NodeTag::Sync => self.run_sync(id),
            NodeTag::Wait => self.start_wait(id),
        }
    }

    // ---- groups ----

    fn enter_group(&mut self, id: NodeId) {
        self.instantiate_group_resources(id);
        let setup = self.group(id).setup.clone();
        let result = match setup {
            Some(handler) => {
                let frame = self.build_scope(id);
                let _guard = scope::enter(frame);
                match catch_unwind(AssertUnwindSafe(|| handler())) {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(node = id.0, "group setup handler panicked, treating as error");
                        SetupResult::StopWithError
                    }
                }
            }
            None => SetupResult::Continue,
        };
        match result {
            SetupResult::Continue => {
                self.nodes[id.0].state = NodeState::Running;
                self.arm_timer(id);
                trace!(node = id.0, "group entered");
                self.drive_group(id);
            }
            SetupResult::StopWithSuccess => self.finish_group(id, DoneWith::Success),
            SetupResult::StopWithError => self.finish_group(id, DoneWith::Error),
        }
    }

    fn drive_group(&mut self, id: NodeId) {
        loop {
            if self.nodes[id.0].state.is_terminal() {
                return;
            }
            if self.group(id).pending.is_some() {
                self.cancel_running_children(id);
                if let Some(with) = self.group_mut(id).pending.take() {
                    self.finish_group(id, with);
                }
                return;
            }
            let (start_next, exhausted) = {
                let group = self.group(id);
                let has_next = group.next_child < group.children.len();
                (group.live < group.mode.limit() && has_next, !has_next)
            };
            if start_next {
                let child = {
                    let group = self.group_mut(id);
                    let child = group.children[group.next_child];
                    group.next_child += 1;
                    group.live += 1;
                    group.in_drive = true;
                    child
                };
                self.start_node(child);
                self.group_mut(id).in_drive = false;
                continue;
            }
            if exhausted && self.group(id).live == 0 {
                let with = self.final_group_outcome(id);
                self.finish_group(id, with);
                return;
            }
            return;
        }
    }

    /// Records a child's effective result against the parent's policy and
    /// resumes scheduling unless a drive frame for the parent is already
    /// active on the stack.
    fn on_child_done(&mut self, parent: NodeId, effective: DoneResult) {
        let drive = {
            let group = self.group_mut(parent);
            group.live -= 1;
            match effective {
                DoneResult::Success => group.any_success = true,
                DoneResult::Error => group.any_error = true,
            }
            if group.first.is_none() {
                group.first = Some(effective);
            }
            if group.pending.is_none() {
                group.pending = match (group.policy, effective) {
                    (WorkflowPolicy::StopOnError, DoneResult::Error) => Some(DoneWith::Error),
                    (WorkflowPolicy::StopOnSuccess, DoneResult::Success) => {
                        Some(DoneWith::Success)
                    }
                    (WorkflowPolicy::StopOnSuccessOrError, result) => Some(result.into()),
                    _ => None,
                };
            }
            !group.in_drive
        };
        if drive {
            self.drive_group(parent);
        }
    }

    fn final_group_outcome(&self, id: NodeId) -> DoneWith {
        let group = self.group(id);
        match group.policy {
            WorkflowPolicy::StopOnError | WorkflowPolicy::ContinueOnError => {
                if group.any_error {
                    DoneWith::Error
                } else {
                    DoneWith::Success
                }
            }
            WorkflowPolicy::StopOnSuccess | WorkflowPolicy::ContinueOnSuccess => {
                if group.any_success {
                    DoneWith::Success
                } else {
                    DoneWith::Error
                }
            }
            WorkflowPolicy::StopOnSuccessOrError => match group.first {
                Some(result) => result.into(),
                None => DoneWith::Error,
            },
            WorkflowPolicy::FinishAllAndSuccess => DoneWith::Success,
            WorkflowPolicy::FinishAllAndError => DoneWith::Error,
        }
    }

    fn cancel_running_children(&mut self, id: NodeId) {
        self.group_mut(id).in_drive = true;
        let children = self.group(id).children.clone();
        for child in children {
            if self.nodes[child.0].state.is_running() {
                self.cancel_node(child);
            }
        }
        self.group_mut(id).in_drive = false;
    }

    fn finish_group(&mut self, id: NodeId, with: DoneWith) {
        self.disarm_timer(id);
        let done = self.group(id).done.clone();
        let effective = match done {
            Some(handler) => {
                let frame = self.build_scope(id);
                let _guard = scope::enter(frame);
                match catch_unwind(AssertUnwindSafe(|| handler(with))) {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(node = id.0, "group done handler panicked, treating as error");
                        DoneResult::Error
                    }
                }
            }
            None => with.default_result(),
        };

        // Children that never started still owe their share of the
        // progress total.
        let skipped: usize = self
            .group(id)
            .children
            .iter()
            .filter(|&&child| self.nodes[child.0].state == NodeState::NotStarted)
            .map(|&child| self.nodes[child.0].weight)
            .sum();

        // Barrier and storage instances go away after the done handler
        // has run, before the parent observes the outcome. Storage is
        // destroyed in reverse creation order.
        let barrier_instances = std::mem::take(&mut self.group_mut(id).barrier_instances);
        for index in barrier_instances {
            self.barrier_arena[index].alive = false;
            self.barrier_arena[index].waiters.clear();
        }
        let mut instances = std::mem::take(&mut self.group_mut(id).storage_instances);
        while let Some(instance) = instances.pop() {
            if instance.outermost && !self.tearing_down {
                if let Some(cb) = self.storage_done_cbs.get(&instance.key).cloned() {
                    let value = instance.slot.borrow();
                    if catch_unwind(AssertUnwindSafe(|| cb(value.as_ref()))).is_err() {
                        warn!("storage done callback panicked");
                    }
                }
            }
            self.storage_live -= 1;
        }

        let state = match with {
            DoneWith::Cancel => DoneWith::Cancel,
            _ => effective.into(),
        };
        self.nodes[id.0].state = NodeState::Finished(state);
        debug!(node = id.0, outcome = %state, "group finished");
        if skipped > 0 {
            self.report_progress(skipped);
        }
        match self.nodes[id.0].parent {
            Some(parent) => self.on_child_done(parent, effective),
            None => self.finish_root(with, effective),
        }
    }

    fn finish_root(&mut self, with: DoneWith, effective: DoneResult) {
        let outcome = match (with, effective) {
            (DoneWith::Cancel, DoneResult::Error) => DoneWith::Cancel,
            (_, result) => result.into(),
        };
        self.outcome = Some(outcome);
        debug!(outcome = %outcome, progress = self.progress_value, "task tree finished");
        if !self.tearing_down {
            if let Some(cb) = &self.on_done {
                cb(outcome);
            }
        }
    }

    // ---- tasks ----

    fn start_task(&mut self, id: NodeId) {
        let result = {
            let frame = self.build_scope(id);
            let _guard = scope::enter(frame);
            match &mut self.nodes[id.0].kind {
                NodeKind::Task(task) => {
                    match catch_unwind(AssertUnwindSafe(|| task.harness.setup())) {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(node = id.0, "task setup handler panicked, treating as error");
                            SetupResult::StopWithError
                        }
                    }
                }
                _ => unreachable!("node {:?} is not a task", id),
            }
        };
        match result {
            SetupResult::Continue => {
                self.nodes[id.0].state = NodeState::Running;
                self.arm_timer(id);
                trace!(node = id.0, "task started");
                let signal = DoneSignal::new(self.tx.clone(), id);
                let start_panicked = match &mut self.nodes[id.0].kind {
                    NodeKind::Task(task) => {
                        catch_unwind(AssertUnwindSafe(|| task.harness.start(signal))).is_err()
                    }
                    _ => false,
                };
                if start_panicked {
                    warn!(node = id.0, "task adapter panicked on start, treating as error");
                    self.finalize_task(id, DoneWith::Error, true);
                }
            }
            // A setup handler that stops the task routes it straight to
            // the terminal state; the done handler is not invoked.
            SetupResult::StopWithSuccess => self.finalize_task(id, DoneWith::Success, false),
            SetupResult::StopWithError => self.finalize_task(id, DoneWith::Error, false),
        }
    }

    fn finalize_task(&mut self, id: NodeId, with: DoneWith, run_handler: bool) {
        self.disarm_timer(id);
        let effective = if run_handler {
            let frame = self.build_scope(id);
            let _guard = scope::enter(frame);
            match &mut self.nodes[id.0].kind {
                NodeKind::Task(task) => {
                    match catch_unwind(AssertUnwindSafe(|| task.harness.finish(with))) {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(node = id.0, "task done handler panicked, treating as error");
                            DoneResult::Error
                        }
                    }
                }
                _ => with.default_result(),
            }
        } else {
            with.default_result()
        };
        // A cancelled node stays cancelled even when its handler rewrites
        // the effective outcome for the parent.
        let state = match with {
            DoneWith::Cancel => DoneWith::Cancel,
            _ => effective.into(),
        };
        self.nodes[id.0].state = NodeState::Finished(state);
        trace!(node = id.0, outcome = %state, "task finished");
        self.report_progress(1);
        if let Some(parent) = self.nodes[id.0].parent {
            self.on_child_done(parent, effective);
        }
    }

    // ---- sync leaves ----

    fn run_sync(&mut self, id: NodeId) {
        let run = match &self.nodes[id.0].kind {
            NodeKind::Sync(run) => run.clone(),
            _ => unreachable!("node {:?} is not a sync leaf", id),
        };
        let result = {
            let frame = self.build_scope(id);
            let _guard = scope::enter(frame);
            match catch_unwind(AssertUnwindSafe(|| run())) {
                Ok(result) => result,
                Err(_) => {
                    warn!(node = id.0, "sync handler panicked, treating as error");
                    DoneResult::Error
                }
            }
        };
        self.nodes[id.0].state = NodeState::Finished(result.into());
        trace!(node = id.0, outcome = %result, "sync leaf finished");
        if let Some(parent) = self.nodes[id.0].parent {
            self.on_child_done(parent, result);
        }
    }

    // ---- barrier waits ----

    fn start_wait(&mut self, id: NodeId) {
        let key = match &self.nodes[id.0].kind {
            NodeKind::Wait(wait) => wait.barrier.key(),
            _ => unreachable!("node {:?} is not a barrier wait", id),
        };
        match self.find_barrier_instance(self.nodes[id.0].parent, key) {
            None => {
                warn!(
                    node = id.0,
                    "barrier is not declared on this leaf's path, completing with error"
                );
                self.finalize_wait(id, DoneWith::Error);
            }
            Some(index) => {
                let satisfied = {
                    let barrier = &self.barrier_arena[index];
                    barrier.current >= barrier.required
                };
                if satisfied {
                    self.finalize_wait(id, DoneWith::Success);
                } else {
                    if let NodeKind::Wait(wait) = &mut self.nodes[id.0].kind {
                        wait.instance = Some(index);
                    }
                    self.barrier_arena[index].waiters.push(id);
                    self.nodes[id.0].state = NodeState::Running;
                    self.arm_timer(id);
                    trace!(node = id.0, instance = index, "waiting for barrier");
                }
            }
        }
    }

    fn finalize_wait(&mut self, id: NodeId, with: DoneWith) {
        self.disarm_timer(id);
        let instance = match &mut self.nodes[id.0].kind {
            NodeKind::Wait(wait) => wait.instance.take(),
            _ => None,
        };
        if let Some(index) = instance {
            self.barrier_arena[index].waiters.retain(|&waiter| waiter != id);
        }
        self.nodes[id.0].state = NodeState::Finished(with);
        trace!(node = id.0, outcome = %with, "barrier wait finished");
        self.report_progress(1);
        let effective = with.default_result();
        if let Some(parent) = self.nodes[id.0].parent {
            self.on_child_done(parent, effective);
        }
    }

    fn advance_barrier(&mut self, index: usize) {
        if index >= self.barrier_arena.len() || !self.barrier_arena[index].alive {
            return;
        }
        self.barrier_arena[index].current += 1;
        let (current, required) = {
            let barrier = &self.barrier_arena[index];
            (barrier.current, barrier.required)
        };
        trace!(instance = index, current, required, "barrier advanced");
        if current >= required {
            let waiters = std::mem::take(&mut self.barrier_arena[index].waiters);
            for waiter in waiters {
                if self.nodes[waiter.0].state.is_running() {
                    self.finalize_wait(waiter, DoneWith::Success);
                }
            }
        }
    }

    // ---- cancellation ----

    /// Cancels a running subtree, leaf-first: adapters are told to stop
    /// and every cancelled node's error-side done handler runs before the
    /// parent's. Settled and never-started nodes are left alone.
    pub(crate) fn cancel_node(&mut self, id: NodeId) {
        if !self.nodes[id.0].state.is_running() {
            return;
        }
        match self.nodes[id.0].tag() {
            NodeTag::Task => {
                let cancel_panicked = match &mut self.nodes[id.0].kind {
                    NodeKind::Task(task) => {
                        catch_unwind(AssertUnwindSafe(|| task.harness.request_cancel())).is_err()
                    }
                    _ => false,
                };
                if cancel_panicked {
                    warn!(node = id.0, "task adapter panicked on cancel request");
                }
                self.finalize_task(id, DoneWith::Cancel, true);
            }
            NodeTag::Wait => self.finalize_wait(id, DoneWith::Cancel),
            NodeTag::Group => {
                {
                    let group = self.group_mut(id);
                    if group.pending.is_none() {
                        group.pending = Some(DoneWith::Cancel);
                    }
                }
                self.cancel_running_children(id);
                let pending = self.group_mut(id).pending.take();
                self.finish_group(id, pending.unwrap_or(DoneWith::Cancel));
            }
            NodeTag::Sync => {}
        }
    }

    // ---- timeouts ----

    pub(crate) fn fire_timeout(&mut self, id: NodeId) {
        if !self.nodes[id.0].state.is_running() {
            return;
        }
        debug!(node = id.0, "timeout fired");
        if let Some(handler) = self.nodes[id.0].on_timeout.clone() {
            let frame = self.build_scope(id);
            let _guard = scope::enter(frame);
            if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                warn!(node = id.0, "timeout handler panicked");
            }
        }
        self.cancel_node(id);
    }

    fn arm_timer(&mut self, id: NodeId) {
        if let Some(timeout) = self.nodes[id.0].timeout {
            let timer = self.timers.arm(id, timeout);
            self.nodes[id.0].timer = Some(timer);
        }
    }

    fn disarm_timer(&mut self, id: NodeId) {
        if let Some(timer) = self.nodes[id.0].timer.take() {
            self.timers.cancel(timer);
        }
    }

    // ---- events ----

    pub(crate) fn handle_event(&mut self, event: Event) {
        match event {
            Event::TaskDone { node, result } => {
                let live = self.nodes[node.0].state.is_running()
                    && self.nodes[node.0].tag() == NodeTag::Task;
                if live {
                    self.finalize_task(node, result.into(), true);
                } else {
                    // Late emission from a cancelled or settled adapter:
                    // honored as the cancel acknowledgement, nothing more.
                    trace!(node = node.0, "dropping completion for settled task");
                }
            }
            Event::BarrierAdvance { instance } => self.advance_barrier(instance),
        }
    }

    // ---- storage & scope ----

    fn instantiate_group_resources(&mut self, id: NodeId) {
        let parent = self.nodes[id.0].parent;
        let decls = self.group(id).storage_decls.clone();
        for decl in decls {
            let key = decl.key();
            let outermost = self.resolve_storage(parent, key).is_none();
            let slot: ActiveSlot = Rc::new(RefCell::new(decl.construct()));
            self.storage_live += 1;
            if outermost {
                if let Some(cb) = self.storage_setup_cbs.get(&key).cloned() {
                    let mut value = slot.borrow_mut();
                    if catch_unwind(AssertUnwindSafe(|| cb(value.as_mut()))).is_err() {
                        warn!("storage setup callback panicked");
                    }
                }
            }
            self.group_mut(id).storage_instances.push(StorageInstance {
                key,
                slot,
                outermost,
            });
        }
        let barriers = self.group(id).barrier_decls.clone();
        for decl in barriers {
            let instance = self.barrier_arena.len();
            self.barrier_arena.push(BarrierInstance {
                required: decl.required_advances(),
                current: 0,
                waiters: Vec::new(),
                alive: true,
            });
            self.group_mut(id).barrier_instances.push(instance);
        }
    }

    fn resolve_storage(&self, mut cursor: Option<NodeId>, key: StorageKey) -> Option<ActiveSlot> {
        while let Some(id) = cursor {
            if let NodeKind::Group(group) = &self.nodes[id.0].kind {
                for instance in &group.storage_instances {
                    if instance.key == key {
                        return Some(instance.slot.clone());
                    }
                }
            }
            cursor = self.nodes[id.0].parent;
        }
        None
    }

    fn find_barrier_instance(&self, mut cursor: Option<NodeId>, key: BarrierKey) -> Option<usize> {
        while let Some(id) = cursor {
            if let NodeKind::Group(group) = &self.nodes[id.0].kind {
                for (decl, &instance) in group.barrier_decls.iter().zip(&group.barrier_instances) {
                    if decl.key() == key && self.barrier_arena[instance].alive {
                        return Some(instance);
                    }
                }
            }
            cursor = self.nodes[id.0].parent;
        }
        None
    }

    /// Builds the handler scope for a node: the innermost live storage
    /// and barrier instances on the path from the root to the node.
    fn build_scope(&self, node: NodeId) -> ScopeFrame {
        let mut frame = ScopeFrame::default();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if let NodeKind::Group(group) = &self.nodes[id.0].kind {
                for instance in &group.storage_instances {
                    frame
                        .storages
                        .entry(instance.key)
                        .or_insert_with(|| instance.slot.clone());
                }
                for (decl, &instance) in group.barrier_decls.iter().zip(&group.barrier_instances) {
                    frame.barriers.entry(decl.key()).or_insert_with(|| BarrierBinding {
                        instance,
                        tx: self.tx.clone(),
                    });
                }
            }
            cursor = self.nodes[id.0].parent;
        }
        frame
    }

    fn report_progress(&mut self, amount: usize) {
        self.progress_value += amount;
        if !self.tearing_down {
            if let Some(cb) = &self.on_progress {
                cb(self.progress_value);
            }
        }
    }
}
