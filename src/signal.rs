use std::any::{Any, TypeId};
use std::fmt;

/// Value contract for signal payloads.
///
/// Anything `Clone + Send + 'static` qualifies via the blanket impl below.
/// Cloning is required so a signal can be fanned out to multiple readers;
/// the last reader takes the value by swap instead (see [`Signal::swap`]).
pub trait SignalValue: Any + Send {
    fn clone_boxed(&self) -> Box<dyn SignalValue>;

    /// Clone `self` into `target` if `target` is of the same concrete type.
    /// Returns `false` (leaving `target` untouched) on a type mismatch.
    fn clone_assign(&self, target: &mut dyn Any) -> bool;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Send> SignalValue for T {
    fn clone_boxed(&self) -> Box<dyn SignalValue> {
        Box::new(self.clone())
    }

    fn clone_assign(&self, target: &mut dyn Any) -> bool {
        match target.downcast_mut::<T>() {
            Some(slot) => {
                slot.clone_from(self);
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A single dynamically typed cell.
///
/// A signal is either empty or holds a value of some runtime type. Clearing
/// a signal marks it empty but keeps the allocated holder around, so a later
/// `set` with the same type move-assigns into the existing allocation
/// instead of reallocating. Together with [`Signal::swap`] this is what lets
/// a fan-out-1 chain hand a value downstream tick after tick with no copies
/// and no allocator traffic in steady state.
#[derive(Default)]
pub struct Signal {
    holder: Option<Box<dyn SignalValue>>,
    present: bool,
}

impl Signal {
    #[inline]
    pub fn has_value(&self) -> bool {
        self.present
    }

    /// Type identity of the held value, or `None` when empty.
    #[inline]
    pub fn value_type(&self) -> Option<TypeId> {
        if self.present {
            self.holder.as_ref().map(|h| h.as_any().type_id())
        } else {
            None
        }
    }

    /// Borrow the held value as `T`. Absent when empty or of another type.
    #[inline]
    pub fn value<T: Any>(&self) -> Option<&T> {
        if self.present {
            self.holder.as_ref()?.as_any().downcast_ref()
        } else {
            None
        }
    }

    #[inline]
    pub fn value_mut<T: Any>(&mut self) -> Option<&mut T> {
        if self.present {
            self.holder.as_mut()?.as_any_mut().downcast_mut()
        } else {
            None
        }
    }

    /// Assign a value, reusing the existing holder when the type matches.
    pub fn set<T: Any + Clone + Send>(&mut self, value: T) {
        if let Some(holder) = self.holder.as_mut()
            && let Some(slot) = holder.as_any_mut().downcast_mut::<T>()
        {
            *slot = value;
            self.present = true;
            return;
        }
        self.holder = Some(Box::new(value));
        self.present = true;
    }

    /// Clone another signal's state into this cell (value and presence).
    /// Same-type assignment reuses this cell's holder.
    pub fn assign_from(&mut self, from: &Signal) {
        if !from.present {
            self.present = false;
            return;
        }
        let Some(source) = from.holder.as_ref() else {
            self.present = false;
            return;
        };
        if let Some(holder) = self.holder.as_mut()
            && source.clone_assign(holder.as_any_mut())
        {
            self.present = true;
            return;
        }
        self.holder = Some(source.clone_boxed());
        self.present = true;
    }

    /// Exchange cells wholesale, holders included.
    ///
    /// Moving by swap rather than take leaves both sides with a constructed
    /// holder, so the two cells ping-pong the same pair of allocations for
    /// as long as the value type stays stable.
    #[inline]
    pub fn swap(&mut self, other: &mut Signal) {
        std::mem::swap(self, other);
    }

    /// Mark the cell empty. The holder allocation is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.present = false;
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("has_value", &self.present)
            .finish()
    }
}

/// Ordered, fixed-width sequence of [`Signal`] cells.
///
/// Components receive their inputs and publish their outputs through one
/// bus per buffer. All index-out-of-range operations are silent no-ops and
/// all out-of-range reads are absent; the hot path never raises.
#[derive(Default, Debug)]
pub struct SignalBus {
    signals: Vec<Signal>,
}

impl SignalBus {
    pub fn new(signal_count: usize) -> Self {
        let mut bus = Self::default();
        bus.set_signal_count(signal_count);
        bus
    }

    /// Resize the bus and clear every cell.
    pub fn set_signal_count(&mut self, signal_count: usize) {
        self.signals.resize_with(signal_count, Signal::default);
        self.clear_all();
    }

    #[inline]
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn signal(&self, index: usize) -> Option<&Signal> {
        self.signals.get(index)
    }

    #[inline]
    pub fn signal_mut(&mut self, index: usize) -> Option<&mut Signal> {
        self.signals.get_mut(index)
    }

    #[inline]
    pub fn has_value(&self, index: usize) -> bool {
        self.signals.get(index).is_some_and(Signal::has_value)
    }

    #[inline]
    pub fn value<T: Any>(&self, index: usize) -> Option<&T> {
        self.signals.get(index)?.value()
    }

    #[inline]
    pub fn value_mut<T: Any>(&mut self, index: usize) -> Option<&mut T> {
        self.signals.get_mut(index)?.value_mut()
    }

    #[inline]
    pub fn value_type(&self, index: usize) -> Option<TypeId> {
        self.signals.get(index)?.value_type()
    }

    #[inline]
    pub fn set_value<T: Any + Clone + Send>(&mut self, index: usize, value: T) {
        if let Some(signal) = self.signals.get_mut(index) {
            signal.set(value);
        }
    }

    /// Copy a signal into the cell at `index`.
    #[inline]
    pub fn set_signal(&mut self, index: usize, from: &Signal) {
        if let Some(signal) = self.signals.get_mut(index) {
            signal.assign_from(from);
        }
    }

    /// Move a signal into the cell at `index` by swapping holders.
    #[inline]
    pub fn move_signal(&mut self, index: usize, from: &mut Signal) {
        if let Some(signal) = self.signals.get_mut(index) {
            signal.swap(from);
        }
    }

    /// Empty every cell, retaining holders and width.
    pub fn clear_all(&mut self) {
        for signal in &mut self.signals {
            signal.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_starts_empty() {
        let signal = Signal::default();
        assert!(!signal.has_value());
        assert_eq!(signal.value_type(), None);
        assert_eq!(signal.value::<i32>(), None);
    }

    #[test]
    fn signal_set_and_read_back() {
        let mut signal = Signal::default();
        signal.set(42_i32);
        assert!(signal.has_value());
        assert_eq!(signal.value::<i32>(), Some(&42));
        assert_eq!(signal.value_type(), Some(TypeId::of::<i32>()));
    }

    #[test]
    fn signal_wrong_type_reads_absent() {
        let mut signal = Signal::default();
        signal.set(1.5_f32);
        assert_eq!(signal.value::<i32>(), None);
        assert_eq!(signal.value::<f32>(), Some(&1.5));
    }

    #[test]
    fn signal_retype_in_place() {
        let mut signal = Signal::default();
        signal.set(7_i32);
        signal.set(String::from("seven"));
        assert_eq!(signal.value::<i32>(), None);
        assert_eq!(signal.value::<String>().map(String::as_str), Some("seven"));
    }

    #[test]
    fn cleared_signal_reads_absent_but_accepts_same_type() {
        let mut signal = Signal::default();
        signal.set(vec![1, 2, 3]);
        signal.clear();
        assert!(!signal.has_value());
        assert_eq!(signal.value_type(), None);
        assert_eq!(signal.value::<Vec<i32>>(), None);

        signal.set(vec![4, 5]);
        assert_eq!(signal.value::<Vec<i32>>(), Some(&vec![4, 5]));
    }

    #[test]
    fn swap_exchanges_values_and_types() {
        let mut a = Signal::default();
        let mut b = Signal::default();
        a.set(1_i32);
        b.set(String::from("x"));

        a.swap(&mut b);

        assert_eq!(a.value::<String>().map(String::as_str), Some("x"));
        assert_eq!(b.value::<i32>(), Some(&1));
    }

    #[test]
    fn swap_with_empty_moves_ownership() {
        let mut full = Signal::default();
        let mut empty = Signal::default();
        full.set(9_i64);

        empty.swap(&mut full);

        assert_eq!(empty.value::<i64>(), Some(&9));
        assert!(!full.has_value());
    }

    #[test]
    fn assign_from_copies_value_and_emptiness() {
        let mut src = Signal::default();
        let mut dst = Signal::default();
        src.set(3_u8);

        dst.assign_from(&src);
        assert_eq!(dst.value::<u8>(), Some(&3));
        assert_eq!(src.value::<u8>(), Some(&3));

        src.clear();
        dst.assign_from(&src);
        assert!(!dst.has_value());
    }

    #[test]
    fn bus_out_of_range_is_silent() {
        let mut bus = SignalBus::new(2);
        bus.set_value(5, 1_i32);
        assert!(!bus.has_value(5));
        assert_eq!(bus.value::<i32>(5), None);
        assert!(bus.signal(5).is_none());
    }

    #[test]
    fn bus_resize_clears_values() {
        let mut bus = SignalBus::new(1);
        bus.set_value(0, 10_i32);
        bus.set_signal_count(3);
        assert_eq!(bus.signal_count(), 3);
        assert!(!bus.has_value(0));
    }

    #[test]
    fn bus_move_signal_swaps_cells() {
        let mut bus = SignalBus::new(1);
        let mut incoming = Signal::default();
        incoming.set(11_i32);

        bus.move_signal(0, &mut incoming);

        assert_eq!(bus.value::<i32>(0), Some(&11));
        assert!(!incoming.has_value());
    }

    #[test]
    fn bus_clear_all_keeps_width() {
        let mut bus = SignalBus::new(4);
        bus.set_value(1, 2_i32);
        bus.clear_all();
        assert_eq!(bus.signal_count(), 4);
        assert!(!bus.has_value(1));
    }
}
