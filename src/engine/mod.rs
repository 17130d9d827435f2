pub(crate) mod auto_tick;
pub(crate) mod circuit_thread;
pub(crate) mod component_thread;
