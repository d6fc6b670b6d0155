//! Advance-counting rendezvous between recipe branches.
//!
//! A [`Barrier`] is declared in a group the way storage is: the group
//! owns the runtime instance, descendants shadow it, and its lifetime
//! ends with the group. `wait_for_barrier` leaves complete once the
//! instance has been advanced the required number of times; waiters that
//! register after the count is already reached complete immediately.
//!
//! Advances are marshalled to the driver context: from a handler call
//! [`Barrier::advance`], from an adapter (possibly on another thread)
//! capture a [`BarrierAdvancer`] during task setup.

use std::fmt;

use uuid::Uuid;

use crate::runtime::driver::Event;
use crate::runtime::scope;

/// Identity of a barrier declaration. Copies share the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierKey(Uuid);

impl BarrierKey {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BarrierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A barrier declaration.
#[derive(Debug, Clone)]
pub struct Barrier {
    key: BarrierKey,
    required: usize,
}

impl Barrier {
    /// A barrier released by a single advance.
    pub fn single() -> Self {
        Self {
            key: BarrierKey::fresh(),
            required: 1,
        }
    }

    /// A barrier released after `required` advances. Zero is normalized
    /// to one.
    pub fn with_required(required: usize) -> Self {
        if required == 0 {
            tracing::warn!("barrier requires at least one advance, using 1");
        }
        Self {
            key: BarrierKey::fresh(),
            required: required.max(1),
        }
    }

    pub fn required_advances(&self) -> usize {
        self.required
    }

    /// Advance the active instance by one.
    ///
    /// # Panics
    ///
    /// Panics when called outside a handler, or when no group on the
    /// handler's path declares this barrier.
    pub fn advance(&self) {
        self.binding().advance();
    }

    /// A sendable handle to the active instance, for adapters that
    /// advance the barrier from outside the driver context.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Barrier::advance`].
    pub fn advancer(&self) -> BarrierAdvancer {
        self.binding()
    }

    pub(crate) fn key(&self) -> BarrierKey {
        self.key
    }

    fn binding(&self) -> BarrierAdvancer {
        match scope::active_barrier(self.key) {
            Some(binding) => BarrierAdvancer {
                instance: binding.instance,
                tx: binding.tx,
            },
            None => panic!(
                "barrier {} has no active instance in the current handler scope",
                self.key
            ),
        }
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::single()
    }
}

/// Advances one runtime barrier instance from any thread.
#[derive(Clone)]
pub struct BarrierAdvancer {
    instance: usize,
    tx: crossbeam_channel::Sender<Event>,
}

impl BarrierAdvancer {
    /// Post one advance to the driver context. Advancing a barrier whose
    /// owning group has already exited is a no-op.
    pub fn advance(&self) {
        let _ = self.tx.send(Event::BarrierAdvance {
            instance: self.instance,
        });
    }
}

impl fmt::Debug for BarrierAdvancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierAdvancer")
            .field("instance", &self.instance)
            .finish()
    }
}
