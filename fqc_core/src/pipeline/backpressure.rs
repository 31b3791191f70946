use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Slots {
    in_flight: usize,
    shutdown: bool,
}

/// Caps the number of chunks and blocks alive between the reader and the
/// writer, independent of the worker count.
#[derive(Debug)]
pub struct BackpressureController {
    max_in_flight: usize,
    slots: Mutex<Slots>,
    freed: Condvar,
}

impl BackpressureController {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            slots: Mutex::new(Slots::default()),
            freed: Condvar::new(),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.slots.lock().in_flight
    }

    /// Blocks until a slot is free and takes it. Returns false once
    /// [`shutdown`](Self::shutdown) has been called.
    pub fn acquire(&self) -> bool {
        let mut slots = self.slots.lock();
        while slots.in_flight >= self.max_in_flight && !slots.shutdown {
            self.freed.wait(&mut slots);
        }
        if slots.shutdown {
            return false;
        }
        slots.in_flight += 1;
        true
    }

    pub fn try_acquire(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.shutdown || slots.in_flight >= self.max_in_flight {
            return false;
        }
        slots.in_flight += 1;
        true
    }

    pub fn release(&self) {
        let mut slots = self.slots.lock();
        slots.in_flight = slots.in_flight.saturating_sub(1);
        drop(slots);
        self.freed.notify_one();
    }

    /// Wakes every waiter; all later acquires fail.
    pub fn shutdown(&self) {
        self.slots.lock().shutdown = true;
        self.freed.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.slots.lock().shutdown
    }
}
