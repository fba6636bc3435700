use embedded_time::duration::Milliseconds;

use crate::bus::Transport;

/// Capability set every bus device exposes to the arbiter.
///
/// Devices only touch the transport inside a chip-select guard, and only from
/// `init`, `tick` or one of their own operations invoked by the host; the
/// arbiter's sequential dispatch is what keeps transactions from interleaving.
pub trait Device<T: Transport> {
    /// One-time setup, invoked when the device is registered.
    fn init(&mut self, bus: &mut T);

    /// Periodic poll entry point; `now` is the scheduler's millisecond
    /// timestamp.
    fn tick(&mut self, bus: &mut T, now: Milliseconds);

    /// Force the chip-select line inactive. Fault recovery, not the normal
    /// path.
    fn deselect(&mut self);
}
