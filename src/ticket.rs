//! The cooperative suspension token.
//!
//! A host environment may temporarily need the worker loops out of the way,
//! for example while it reconfigures the video path. Revoking the ticket
//! makes both loops release their external resources and park; granting it
//! again resumes them without any further host calls.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct Ticket {
    revoked: Mutex<bool>,
    cond: Condvar,
}

impl Ticket {
    pub fn new() -> Self {
        Self {
            revoked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Asks the worker loops to park. Returns once the flag is set; the
    /// loops observe it within one loop period.
    pub fn revoke(&self) {
        *self.revoked.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Re-grants execution; parked loops resume automatically.
    pub fn grant(&self) {
        *self.revoked.lock().unwrap() = false;
        self.cond.notify_all();
    }

    pub fn is_revoked(&self) -> bool {
        *self.revoked.lock().unwrap()
    }

    /// Waits until the ticket is granted. Returns `false` on timeout.
    pub(crate) fn wait_granted(&self, timeout: Duration) -> bool {
        let guard = self.revoked.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |revoked| *revoked)
            .unwrap();
        !*guard
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_wakes_waiters() {
        let ticket = std::sync::Arc::new(Ticket::new());
        ticket.revoke();
        assert!(ticket.is_revoked());
        assert!(!ticket.wait_granted(Duration::from_millis(10)));

        let t = ticket.clone();
        let waiter = std::thread::spawn(move || t.wait_granted(Duration::from_secs(5)));
        ticket.grant();
        assert!(waiter.join().unwrap());
    }
}
