//! Role-keyed one-shot timers. The engine owns one slot per role; arming
//! a role always cancels the previous timer of that role, so at most one
//! instance per role is ever pending.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The three timers the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerRole {
    /// First-RA timeout after `start`.
    FirstRa,
    /// Next Router Solicitation send.
    SendRs,
    /// Next lifetime/expiry check.
    Sweep,
}

/// One-shot timer scheduler. Implementations deliver fired roles back to
/// whatever loop drives [`crate::engine::NdiscEngine::timer_fired`]; tests
/// substitute a manual implementation and drive virtual time.
pub trait Timers: Send {
    /// Arm `role` to fire after `delay_secs`, cancelling any pending timer
    /// of the same role first.
    fn arm(&mut self, role: TimerRole, delay_secs: u32);

    /// Cancel any pending timer of `role`.
    fn cancel(&mut self, role: TimerRole);
}

/// Tokio-backed implementation: each armed role is a sleep task that sends
/// the role on a channel when it elapses.
pub struct TokioTimers {
    fired_tx: mpsc::UnboundedSender<TimerRole>,
    handles: HashMap<TimerRole, JoinHandle<()>>,
}

impl TokioTimers {
    /// Returns the scheduler and the receiver of fired roles.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerRole>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                fired_tx,
                handles: HashMap::new(),
            },
            fired_rx,
        )
    }
}

impl Timers for TokioTimers {
    fn arm(&mut self, role: TimerRole, delay_secs: u32) {
        self.cancel(role);
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(delay_secs))).await;
            let _ = tx.send(role);
        });
        self.handles.insert(role, handle);
    }

    fn cancel(&mut self, role: TimerRole) {
        if let Some(handle) = self.handles.remove(&role) {
            handle.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}
