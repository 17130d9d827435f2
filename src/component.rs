use crate::engine::component_thread::ComponentThread;
use crate::pool::ThreadPool;
use crate::signal::SignalBus;
use crate::wire::Wire;
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// How a tick traverses the graph.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Walk upstream components recursively on the calling thread.
    Series,
    /// Dispatch each component's tick to the shared thread pool.
    Parallel,
}

impl TickMode {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TickMode::Series => 0,
            TickMode::Parallel => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TickMode::Series,
            _ => TickMode::Parallel,
        }
    }
}

/// Whether a processor must observe buffers in strict index order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessOrder {
    /// `process` runs on buffers 0, 1, .., B-1 in that order, every round.
    InOrder,
    /// `process` calls for different buffers may interleave freely.
    OutOfOrder,
}

/// Per-sample user logic.
///
/// Implementations read from `inputs` and write to `outputs`; both buses
/// are exclusive for the duration of the call. Stateful processors that
/// care about the global sample sequence should declare
/// [`ProcessOrder::InOrder`]. Implementations must not panic: the engine
/// never unwinds across a tick boundary.
pub trait Process: Send + 'static {
    fn process(&mut self, inputs: &mut SignalBus, outputs: &mut SignalBus);

    fn order(&self) -> ProcessOrder {
        ProcessOrder::OutOfOrder
    }
}

const NOT_TICKED: u8 = 0;
const TICK_STARTED: u8 = 1;
const TICKING: u8 = 2;

/// Fan-out bookkeeping for one output in one buffer.
#[derive(Debug, Default, Clone)]
struct RefCount {
    total: usize,
    consumed: usize,
}

struct OutputState {
    bus: SignalBus,
    refs: Vec<RefCount>,
}

/// Token-ring slot gating `process` for in-order components.
struct ReleaseGate {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl ReleaseGate {
    fn new(released: bool) -> Self {
        Self {
            released: Mutex::new(released),
            condvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.condvar.wait(&mut released);
        }
        *released = false;
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.condvar.notify_all();
    }
}

/// Everything a component replicates per pipeline buffer.
struct BufferState {
    input_bus: Mutex<SignalBus>,
    output: Mutex<OutputState>,
    status: CachePadded<AtomicU8>,
    release: ReleaseGate,
    thread: ComponentThread,
    feedback: Mutex<HashSet<usize>>,
}

impl BufferState {
    fn new(
        input_count: usize,
        output_count: usize,
        ref_totals: &[usize],
        pool: Option<Arc<ThreadPool>>,
        buffer: usize,
    ) -> Self {
        let refs = (0..output_count)
            .map(|output| RefCount {
                total: ref_totals.get(output).copied().unwrap_or(0),
                consumed: 0,
            })
            .collect();

        Self {
            input_bus: Mutex::new(SignalBus::new(input_count)),
            output: Mutex::new(OutputState {
                bus: SignalBus::new(output_count),
                refs,
            }),
            status: CachePadded::new(AtomicU8::new(NOT_TICKED)),
            release: ReleaseGate::new(buffer == 0),
            thread: ComponentThread::new(pool, buffer),
            feedback: Mutex::new(HashSet::new()),
        }
    }
}

/// Engine-side component: owns the per-buffer buses, wires, tick state
/// machine and fan-out counters around a user [`Process`] implementation.
///
/// All methods take `&self`; the engine coordinates cross-thread access
/// internally. Wiring methods and [`Component::set_thread_pool`] must only
/// be called while no tick is in flight (a circuit enforces this by pausing
/// auto-tick around every change).
pub struct Component {
    order: ProcessOrder,
    // handed to pool tasks when a tick is dispatched
    self_ref: Weak<Component>,
    processor: Mutex<Box<dyn Process>>,
    wires: Mutex<Vec<Wire>>,
    buffers: RwLock<Vec<BufferState>>,
    pool: RwLock<Option<Arc<ThreadPool>>>,
    input_names: Mutex<Vec<String>>,
    output_names: Mutex<Vec<String>>,
}

impl Component {
    pub fn new(processor: impl Process) -> Arc<Self> {
        Self::from_boxed(Box::new(processor))
    }

    pub fn from_boxed(processor: Box<dyn Process>) -> Arc<Self> {
        let order = processor.order();
        Arc::new_cyclic(|self_ref| Self {
            order,
            self_ref: self_ref.clone(),
            processor: Mutex::new(processor),
            wires: Mutex::new(Vec::new()),
            buffers: RwLock::new(vec![BufferState::new(0, 0, &[], None, 0)]),
            pool: RwLock::new(None),
            input_names: Mutex::new(Vec::new()),
            output_names: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn process_order(&self) -> ProcessOrder {
        self.order
    }

    pub fn input_count(&self) -> usize {
        self.buffers.read_recursive()[0].input_bus.lock().signal_count()
    }

    pub fn output_count(&self) -> usize {
        self.buffers.read_recursive()[0].output.lock().bus.signal_count()
    }

    pub fn input_name(&self, input: usize) -> Option<String> {
        self.input_names.lock().get(input).cloned()
    }

    pub fn output_name(&self, output: usize) -> Option<String> {
        self.output_names.lock().get(output).cloned()
    }

    /// Declare input arity. Construction time only.
    pub fn set_input_count(&self, count: usize) {
        self.set_input_count_named(count, Vec::new());
    }

    pub fn set_input_count_named(&self, count: usize, names: Vec<String>) {
        *self.input_names.lock() = names;
        for state in self.buffers.read().iter() {
            state.input_bus.lock().set_signal_count(count);
        }
    }

    /// Declare output arity. Construction time only.
    pub fn set_output_count(&self, count: usize) {
        self.set_output_count_named(count, Vec::new());
    }

    pub fn set_output_count_named(&self, count: usize, names: Vec<String>) {
        *self.output_names.lock() = names;
        for state in self.buffers.read().iter() {
            let mut output = state.output.lock();
            output.bus.set_signal_count(count);
            output.refs.resize_with(count, RefCount::default);
        }
    }

    /// Wire `source`'s output into one of this component's inputs.
    ///
    /// Refuses (returns `false`) on an arity mismatch. Any wire already
    /// feeding `dest_input` is disconnected first. The source's fan-out
    /// count for that output is bumped across all buffers.
    pub fn connect_input(
        &self,
        source: &Arc<Component>,
        source_output: usize,
        dest_input: usize,
    ) -> bool {
        if source_output >= source.output_count() || dest_input >= self.input_count() {
            return false;
        }

        self.disconnect_input(dest_input);

        self.wires.lock().push(Wire {
            source: source.clone(),
            source_output,
            dest_input,
        });
        source.inc_refs(source_output);

        true
    }

    /// Remove the wire feeding `dest_input`, if any.
    pub fn disconnect_input(&self, dest_input: usize) {
        let removed = {
            let mut wires = self.wires.lock();
            wires
                .iter()
                .position(|wire| wire.dest_input == dest_input)
                .map(|index| wires.remove(index))
        };
        if let Some(wire) = removed {
            wire.source.dec_refs(wire.source_output);
        }
    }

    /// Remove every wire fed by `source`.
    pub fn disconnect_input_of(&self, source: &Arc<Component>) {
        let removed: Vec<Wire> = {
            let mut wires = self.wires.lock();
            let mut removed = Vec::new();
            wires.retain(|wire| {
                if wire.is_from(source) {
                    removed.push(wire.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        for wire in removed {
            wire.source.dec_refs(wire.source_output);
        }
    }

    pub fn disconnect_all_inputs(&self) {
        let removed: Vec<Wire> = std::mem::take(&mut *self.wires.lock());
        for wire in removed {
            wire.source.dec_refs(wire.source_output);
        }
    }

    /// Longest forward path from a source component, plus `offset`.
    ///
    /// Used to keep a circuit's component list ordered sources-first. The
    /// walk carries a visited set so feedback edges terminate; positions of
    /// components inside a cycle are an approximation.
    pub fn circuit_position(&self, offset: usize) -> usize {
        let mut visited = HashSet::new();
        offset + self.position_from_sources(&mut visited)
    }

    fn position_from_sources(&self, visited: &mut HashSet<*const Component>) -> usize {
        if !visited.insert(self as *const Component) {
            return 0;
        }
        let wires = self.wires.lock();
        let mut furthest = 0;
        for wire in wires.iter() {
            furthest = furthest.max(1 + wire.source.position_from_sources(visited));
        }
        furthest
    }

    /// Rebuild per-buffer state for a new pool geometry.
    ///
    /// Arity and fan-out totals carry over from the current state. A pool
    /// with `threads_per_buffer == 0` contributes only its buffer count and
    /// leaves the component poolless (Series semantics per buffer).
    pub fn set_thread_pool(&self, pool: Option<Arc<ThreadPool>>) {
        let (buffer_count, active_pool) = match &pool {
            Some(p) if p.threads_per_buffer() > 0 => (p.buffer_count(), pool.clone()),
            Some(p) => (p.buffer_count(), None),
            None => (1, None),
        };
        let buffer_count = buffer_count.max(1);

        let mut buffers = self.buffers.write();
        let input_count = buffers[0].input_bus.lock().signal_count();
        let (output_count, ref_totals) = {
            let output = buffers[0].output.lock();
            let totals: Vec<usize> = output.refs.iter().map(|r| r.total).collect();
            (output.bus.signal_count(), totals)
        };

        *self.pool.write() = active_pool.clone();
        *buffers = (0..buffer_count)
            .map(|buffer| {
                BufferState::new(
                    input_count,
                    output_count,
                    &ref_totals,
                    active_pool.clone(),
                    buffer,
                )
            })
            .collect();
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.read_recursive().len()
    }

    /// Drive one tick of this component on `buffer`.
    ///
    /// Returns `false` only when the caller re-entered a tick that has
    /// already started on this buffer, i.e. the caller arrived over a
    /// feedback edge and must not wait for this component.
    pub fn tick(&self, mode: TickMode, buffer: usize) -> bool {
        let buffers = self.buffers.read_recursive();
        let Some(state) = buffers.get(buffer) else {
            return true;
        };

        // Atomically claim this buffer's tick; extra workers striding the
        // same list fall through here without re-entering.
        match state.status.compare_exchange(
            NOT_TICKED,
            TICK_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(TICK_STARTED) => return false,
            Err(_) => return true,
        }

        let pooled = mode == TickMode::Parallel && self.pool.read_recursive().is_some();
        if pooled {
            // Start upstream ticks first; a source that reports an already
            // started tick is a feedback edge and must not be waited on.
            {
                let wires = self.wires.lock();
                for (index, wire) in wires.iter().enumerate() {
                    if !wire.source.tick(mode, buffer) {
                        state.feedback.lock().insert(index);
                    }
                }
            }

            state.status.store(TICKING, Ordering::Release);
            if let Some(this) = self.self_ref.upgrade() {
                state.thread.tick_async(&this);
            }
        } else {
            state.status.store(TICKING, Ordering::Release);
            drop(buffers);
            self.do_tick(mode, buffer);
        }

        true
    }

    /// Pull inputs, clear outputs, run the processor.
    ///
    /// Outputs are cleared here, at the start of the next tick, rather than
    /// in `reset`: feedback wires read a component's previous outputs after
    /// that component has already begun its next tick, so the values must
    /// survive the tick boundary. Fan-out counters reset on the final read
    /// for the same reason.
    pub(crate) fn do_tick(&self, mode: TickMode, buffer: usize) {
        let buffers = self.buffers.read_recursive();
        let Some(state) = buffers.get(buffer) else {
            return;
        };

        let pooled = mode == TickMode::Parallel && self.pool.read_recursive().is_some();
        {
            let wires = self.wires.lock();
            let mut inputs = state.input_bus.lock();
            if pooled {
                for (index, wire) in wires.iter().enumerate() {
                    // Wait for non-feedback sources to finish their tick;
                    // feedback sources are read as-is from the prior tick.
                    if !state.feedback.lock().remove(&index) {
                        wire.source.wait_for(buffer);
                    }
                    wire.source
                        .get_output(buffer, wire.source_output, wire.dest_input, &mut inputs);
                }
            } else {
                for wire in wires.iter() {
                    wire.source.tick(mode, buffer);
                    wire.source
                        .get_output(buffer, wire.source_output, wire.dest_input, &mut inputs);
                }
            }
        }

        state.output.lock().bus.clear_all();

        let in_order = self.order == ProcessOrder::InOrder && buffers.len() > 1;
        if in_order {
            state.release.wait();
        }

        {
            let mut processor = self.processor.lock();
            let mut inputs = state.input_bus.lock();
            let mut output = state.output.lock();
            processor.process(&mut inputs, &mut output.bus);
        }

        if in_order {
            buffers[(buffer + 1) % buffers.len()].release.release();
        }
    }

    /// Wait out any in-flight dispatched work, clear inputs, rearm.
    pub fn reset(&self, buffer: usize) {
        let buffers = self.buffers.read_recursive();
        let Some(state) = buffers.get(buffer) else {
            return;
        };

        state.thread.wait();
        state.input_bus.lock().clear_all();
        state.feedback.lock().clear();
        state.status.store(NOT_TICKED, Ordering::Release);
    }

    /// Serve one downstream read of `source_output` on `buffer`.
    ///
    /// Intermediate readers get a copy; the final reader of the tick takes
    /// the signal by swap and resets the consumed count. An empty output
    /// leaves the destination untouched.
    pub(crate) fn get_output(
        &self,
        buffer: usize,
        source_output: usize,
        dest_input: usize,
        dest: &mut SignalBus,
    ) {
        let buffers = self.buffers.read_recursive();
        let Some(state) = buffers.get(buffer) else {
            return;
        };

        let mut output = state.output.lock();
        let OutputState { bus, refs } = &mut *output;
        let Some(signal) = bus.signal_mut(source_output) else {
            return;
        };
        if !signal.has_value() {
            return;
        }
        let Some(rc) = refs.get_mut(source_output) else {
            return;
        };

        rc.consumed += 1;
        if rc.consumed != rc.total {
            dest.set_signal(dest_input, signal);
        } else {
            rc.consumed = 0;
            dest.move_signal(dest_input, signal);
        }
    }

    fn wait_for(&self, buffer: usize) {
        if let Some(state) = self.buffers.read_recursive().get(buffer) {
            state.thread.wait();
        }
    }

    /// Wait for dispatched work on every buffer.
    pub(crate) fn wait_all(&self) {
        for state in self.buffers.read_recursive().iter() {
            state.thread.wait();
        }
    }

    fn inc_refs(&self, output: usize) {
        for state in self.buffers.read_recursive().iter() {
            if let Some(rc) = state.output.lock().refs.get_mut(output) {
                rc.total += 1;
            }
        }
    }

    fn dec_refs(&self, output: usize) {
        for state in self.buffers.read_recursive().iter() {
            if let Some(rc) = state.output.lock().refs.get_mut(output) {
                rc.total = rc.total.saturating_sub(1);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn fanout_total(&self, buffer: usize, output: usize) -> usize {
        self.buffers.read_recursive()[buffer].output.lock().refs[output].total
    }

    #[cfg(test)]
    pub(crate) fn fanout_consumed(&self, buffer: usize, output: usize) -> usize {
        self.buffers.read_recursive()[buffer].output.lock().refs[output].consumed
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        // keep upstream fan-out totals honest when a consumer goes away
        self.disconnect_all_inputs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Emit(i32);

    impl Process for Emit {
        fn process(&mut self, _inputs: &mut SignalBus, outputs: &mut SignalBus) {
            outputs.set_value(0, self.0);
        }
    }

    impl Emit {
        fn component(value: i32) -> Arc<Component> {
            let c = Component::new(Emit(value));
            c.set_output_count(1);
            c
        }
    }

    struct AddOne;

    impl Process for AddOne {
        fn process(&mut self, inputs: &mut SignalBus, outputs: &mut SignalBus) {
            if let Some(value) = inputs.value::<i32>(0) {
                outputs.set_value(0, value + 1);
            }
        }
    }

    impl AddOne {
        fn component() -> Arc<Component> {
            let c = Component::new(AddOne);
            c.set_input_count(1);
            c.set_output_count(1);
            c
        }
    }

    struct Record {
        seen: Arc<Mutex<Vec<Option<i32>>>>,
    }

    impl Process for Record {
        fn process(&mut self, inputs: &mut SignalBus, _outputs: &mut SignalBus) {
            self.seen.lock().push(inputs.value::<i32>(0).copied());
        }
    }

    #[test]
    fn connect_validates_arity() {
        let src = Emit::component(1);
        let dst = AddOne::component();

        assert!(!dst.connect_input(&src, 1, 0));
        assert!(!dst.connect_input(&src, 0, 5));
        assert!(dst.connect_input(&src, 0, 0));
        assert_eq!(src.fanout_total(0, 0), 1);
    }

    #[test]
    fn connect_displaces_previous_wire() {
        let a = Emit::component(1);
        let b = Emit::component(2);
        let dst = AddOne::component();

        assert!(dst.connect_input(&a, 0, 0));
        assert!(dst.connect_input(&b, 0, 0));

        assert_eq!(a.fanout_total(0, 0), 0);
        assert_eq!(b.fanout_total(0, 0), 1);
    }

    #[test]
    fn disconnect_variants_release_refs() {
        let src = Emit::component(1);
        let x = AddOne::component();
        let y = AddOne::component();

        assert!(x.connect_input(&src, 0, 0));
        assert!(y.connect_input(&src, 0, 0));
        assert_eq!(src.fanout_total(0, 0), 2);

        x.disconnect_input(0);
        assert_eq!(src.fanout_total(0, 0), 1);

        y.disconnect_input_of(&src);
        assert_eq!(src.fanout_total(0, 0), 0);
    }

    #[test]
    fn standalone_tick_and_reset() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let src = Emit::component(41);
        let inc = AddOne::component();
        let probe = Component::new(Record { seen: seen.clone() });
        probe.set_input_count(1);

        assert!(inc.connect_input(&src, 0, 0));
        assert!(probe.connect_input(&inc, 0, 0));

        for _ in 0..3 {
            src.tick(TickMode::Series, 0);
            inc.tick(TickMode::Series, 0);
            probe.tick(TickMode::Series, 0);

            src.reset(0);
            inc.reset(0);
            probe.reset(0);
        }

        assert_eq!(*seen.lock(), vec![Some(42), Some(42), Some(42)]);
    }

    #[test]
    fn named_ports_are_reported() {
        let c = Component::new(AddOne);
        c.set_input_count_named(1, vec!["in".to_string()]);
        c.set_output_count_named(1, vec!["out".to_string()]);

        assert_eq!(c.input_name(0).as_deref(), Some("in"));
        assert_eq!(c.output_name(0).as_deref(), Some("out"));
        assert_eq!(c.input_name(1), None);
    }

    #[test]
    fn circuit_position_counts_longest_path() {
        let src = Emit::component(0);
        let a = AddOne::component();
        let b = AddOne::component();

        assert!(a.connect_input(&src, 0, 0));
        assert!(b.connect_input(&a, 0, 0));

        assert_eq!(src.circuit_position(0), 0);
        assert_eq!(a.circuit_position(0), 1);
        assert_eq!(b.circuit_position(0), 2);
    }

    #[test]
    fn circuit_position_terminates_on_cycles() {
        let a = AddOne::component();
        let b = AddOne::component();

        assert!(a.connect_input(&b, 0, 0));
        assert!(b.connect_input(&a, 0, 0));

        // Positions inside a cycle are approximate; the walk must finish.
        let _ = a.circuit_position(0);
        let _ = b.circuit_position(0);

        a.disconnect_all_inputs();
        b.disconnect_all_inputs();
    }

    #[test]
    fn set_thread_pool_replicates_state_across_buffers() {
        let src = Emit::component(7);
        let dst = AddOne::component();
        assert!(dst.connect_input(&src, 0, 0));

        let pool = ThreadPool::new(3, 1);
        src.set_thread_pool(Some(pool.clone()));
        dst.set_thread_pool(Some(pool));

        assert_eq!(src.buffer_count(), 3);
        for buffer in 0..3 {
            assert_eq!(src.fanout_total(buffer, 0), 1);
        }
    }
}
