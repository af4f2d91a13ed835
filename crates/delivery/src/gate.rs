//! Per-topic admission gate
//!
//! A handler call is admitted under the same lock `close` takes, so once
//! `close` returns no further call is admitted. A call admitted before that
//! is in flight and runs to completion; `close` never waits for it.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    in_flight: usize,
}

/// Open/closed switch shared by a subscription and its dispatcher
#[derive(Debug, Default)]
pub struct DeliveryGate {
    state: Mutex<GateState>,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        !self.lock().closed
    }

    /// Admit one handler call, or None once the gate is closed
    pub fn admit(&self) -> Option<GatePass<'_>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.in_flight += 1;
        Some(GatePass { gate: self })
    }

    /// Close the gate
    ///
    /// Returns the number of calls admitted and not yet finished at that
    /// moment. Idempotent.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

/// One admitted call; dropping it marks the call finished
#[derive(Debug)]
pub struct GatePass<'a> {
    gate: &'a DeliveryGate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}
