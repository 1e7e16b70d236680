//! The shared `popMutex`/`popCondition` pair (§4.8) the copy stage waits on while scanning
//! devices for free capacity, and that every device worker notifies after finishing a job.

use parking_lot::{Condvar, Mutex};

pub struct DispatchGate {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Wakes every thread blocked in [`DispatchGate::wait_and_retry`]
    pub fn notify(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Repeatedly calls `try_fn` until it returns `Some`, sleeping on the gate's condition
    /// variable between attempts instead of busy-waiting
    pub fn wait_and_retry<T>(&self, mut try_fn: impl FnMut() -> Option<T>) -> T {
        let mut guard = self.mutex.lock();
        loop {
            if let Some(v) = try_fn() {
                return v;
            }
            self.condvar.wait(&mut guard);
        }
    }
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}
