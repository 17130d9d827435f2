use crate::component::Component;
use std::sync::Arc;

/// An edge from one component's output to one of this component's inputs.
///
/// Wires are stored on the consumer side and hold a shared reference to the
/// source, so a standalone graph (no circuit) keeps its upstreams alive.
/// A consequence is that a feedback loop pins its members until one of its
/// wires is disconnected; `Circuit::remove_component` takes care of that for
/// registered components.
#[derive(Clone)]
pub struct Wire {
    pub source: Arc<Component>,
    pub source_output: usize,
    pub dest_input: usize,
}

impl Wire {
    #[inline]
    pub fn is_from(&self, component: &Arc<Component>) -> bool {
        Arc::ptr_eq(&self.source, component)
    }
}
