//! Thread-local handler scope.
//!
//! Every handler invocation runs inside a scope frame that maps storage
//! and barrier declarations to the innermost live instance on the path
//! from the root to the handler's node. `Storage::with*` and
//! `Barrier::advance` resolve through the top frame, so handlers keep the
//! zero-argument signatures of the recipe vocabulary.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crossbeam_channel::Sender;

use super::driver::Event;
use crate::barrier::BarrierKey;
use crate::storage::StorageKey;

/// A live storage instance, shared between the owning group and any
/// handler scope that resolves it.
pub(crate) type ActiveSlot = Rc<RefCell<Box<dyn Any>>>;

/// Resolution of a barrier declaration to a runtime instance plus the
/// channel used to marshal advances back to the driver.
#[derive(Clone)]
pub(crate) struct BarrierBinding {
    pub(crate) instance: usize,
    pub(crate) tx: Sender<Event>,
}

#[derive(Default)]
pub(crate) struct ScopeFrame {
    pub(crate) storages: HashMap<StorageKey, ActiveSlot>,
    pub(crate) barriers: HashMap<BarrierKey, BarrierBinding>,
}

thread_local! {
    static SCOPES: RefCell<Vec<ScopeFrame>> = RefCell::new(Vec::new());
}

/// Installs a frame for the duration of a handler call. The frame is
/// popped when the guard drops, which also holds across handler panics.
pub(crate) struct ScopeGuard {
    _priv: (),
}

pub(crate) fn enter(frame: ScopeFrame) -> ScopeGuard {
    SCOPES.with(|scopes| scopes.borrow_mut().push(frame));
    ScopeGuard { _priv: () }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

pub(crate) fn active_storage(key: StorageKey) -> Option<ActiveSlot> {
    SCOPES.with(|scopes| {
        scopes
            .borrow()
            .last()
            .and_then(|frame| frame.storages.get(&key).cloned())
    })
}

pub(crate) fn active_barrier(key: BarrierKey) -> Option<BarrierBinding> {
    SCOPES.with(|scopes| {
        scopes
            .borrow()
            .last()
            .and_then(|frame| frame.barriers.get(&key).cloned())
    })
}
