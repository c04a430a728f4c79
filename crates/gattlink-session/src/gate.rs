//! Single-slot in-flight control.
//!
//! At most one command holds the gate. Each acquisition gets a
//! [`GateTicket`]; releasing with a stale ticket is a no-op, so the timeout
//! path, the response path and caller cancellation can all release without
//! double-releasing a later acquisition.

use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

/// Whether a command is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::Busy => "busy",
        }
    }
}

/// Proof of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTicket(u64);

#[derive(Debug)]
pub struct Gate {
    state: GateState,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            state: GateState::Idle,
            generation: 0,
            timer: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Idle → Busy. Returns `None` without side effects when already Busy.
    pub fn try_acquire(&mut self) -> Option<GateTicket> {
        if self.state == GateState::Busy {
            return None;
        }
        self.generation += 1;
        self.state = GateState::Busy;
        Some(GateTicket(self.generation))
    }

    /// Start the busy-window timer for `ticket`.
    ///
    /// `on_timeout` runs on a spawned task after `duration` unless
    /// [`release`](Self::release) cancels the timer first. It is expected to
    /// call [`expire`](Self::expire) with the ticket it receives. Must be
    /// called inside a Tokio runtime.
    pub fn arm_timeout<F>(&mut self, ticket: GateTicket, duration: Duration, on_timeout: F)
    where
        F: FnOnce(GateTicket) + Send + 'static,
    {
        if !self.holds(ticket) {
            return;
        }
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_timeout(ticket);
        });
        self.timer = Some(task.abort_handle());
    }

    /// Busy → Idle for the current holder. Cancels the timer.
    ///
    /// Idempotent: returns false if `ticket` no longer holds the gate.
    pub fn release(&mut self, ticket: GateTicket) -> bool {
        if !self.holds(ticket) {
            return false;
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.state = GateState::Idle;
        true
    }

    /// Busy → Idle from the timer itself. Returns false if already released.
    pub fn expire(&mut self, ticket: GateTicket) -> bool {
        if !self.holds(ticket) {
            return false;
        }
        self.timer = None;
        self.state = GateState::Idle;
        debug!(generation = ticket.0, "gate expired");
        true
    }

    /// Whether `ticket` is the current holder.
    pub fn holds(&self, ticket: GateTicket) -> bool {
        self.state == GateState::Busy && self.generation == ticket.0
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn acquire_rejects_while_busy() {
        let mut gate = Gate::new();
        let ticket = gate.try_acquire().unwrap();
        assert_eq!(gate.state(), GateState::Busy);
        assert!(gate.try_acquire().is_none());
        assert!(gate.holds(ticket));
    }

    #[test]
    fn release_is_idempotent() {
        let mut gate = Gate::new();
        let ticket = gate.try_acquire().unwrap();
        assert!(gate.release(ticket));
        assert!(!gate.release(ticket));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn stale_ticket_cannot_release_next_holder() {
        let mut gate = Gate::new();
        let first = gate.try_acquire().unwrap();
        gate.release(first);
        let second = gate.try_acquire().unwrap();

        assert!(!gate.release(first));
        assert!(!gate.expire(first));
        assert_eq!(gate.state(), GateState::Busy);
        assert!(gate.release(second));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_auto_releases() {
        let gate = Arc::new(Mutex::new(Gate::new()));
        let ticket = gate.lock().unwrap().try_acquire().unwrap();

        let timer_gate = Arc::clone(&gate);
        gate.lock().unwrap().arm_timeout(
            ticket,
            Duration::from_millis(5000),
            move |ticket| {
                timer_gate.lock().unwrap().expire(ticket);
            },
        );

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(gate.lock().unwrap().state(), GateState::Busy);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(gate.lock().unwrap().state(), GateState::Idle);
        assert!(!gate.lock().unwrap().release(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn release_cancels_timer() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut gate = Gate::new();
        let ticket = gate.try_acquire().unwrap();

        let flag = Arc::clone(&fired);
        gate.arm_timeout(ticket, Duration::from_millis(100), move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(gate.release(ticket));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn arm_ignores_stale_ticket() {
        let mut gate = Gate::new();
        let ticket = gate.try_acquire().unwrap();
        gate.release(ticket);
        gate.arm_timeout(ticket, Duration::from_millis(1), |_| {});
        assert!(gate.timer.is_none());
    }
}
