use super::boundary::Cell;
use super::linalg::{Tensor, Vector};
use slotmap::{SlotMap, new_key_type};
use std::fmt;
use tracing::trace;

new_key_type! {
    pub struct ListenerId;
}

/// A change to the shape or size of a boundary, delivered after every derived
/// quantity has been recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryEvent<const D: usize> {
    /// Per-axis scale factors applied by `set_box_size`.
    Inflated { scale: Vector<D> },
    Deformed { tensor: Tensor<D> },
    EdgeChanged { index: usize },
    /// New truncation radius; infinite when truncation was disabled.
    TruncationChanged { radius: f64 },
    Restored,
}

pub type BoundaryListener<const D: usize> =
    Box<dyn FnMut(&BoundaryEvent<D>, &Cell<D>) + Send + Sync>;

/// Listener registry owned by a boundary.
///
/// Listeners only ever see the updated [`Cell`] by shared reference, so a
/// callback cannot mutate the boundary that notified it.
pub struct BoundaryEventManager<const D: usize> {
    listeners: SlotMap<ListenerId, BoundaryListener<D>>,
}

impl<const D: usize> Default for BoundaryEventManager<D> {
    fn default() -> Self {
        Self {
            listeners: SlotMap::with_key(),
        }
    }
}

impl<const D: usize> BoundaryEventManager<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&BoundaryEvent<D>, &Cell<D>) + Send + Sync + 'static,
    {
        self.listeners.insert(Box::new(listener))
    }

    /// Returns `false` when `id` was not registered (or was already removed).
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn fire(&mut self, event: &BoundaryEvent<D>, cell: &Cell<D>) {
        trace!(listeners = self.listeners.len(), ?event, "Firing boundary event");
        for listener in self.listeners.values_mut() {
            listener(event, cell);
        }
    }
}

impl<const D: usize> fmt::Debug for BoundaryEventManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryEventManager")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
