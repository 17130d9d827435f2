pub use crate::circuit::{Circuit, ComponentId};
pub use crate::component::{Component, Process, ProcessOrder, TickMode};
pub use crate::config::{CircuitConfig, load_config};
pub use crate::plugin::{CreateParams, ParamValue, Plugin};
pub use crate::pool::ThreadPool;
pub use crate::signal::{Signal, SignalBus, SignalValue};
pub use crate::utils::logger::LoggerConfig;
pub use crate::wire::Wire;
