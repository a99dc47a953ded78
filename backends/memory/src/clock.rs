//! Virtual clock driving the document's timers.

use core::time::Duration;
use std::collections::{BTreeMap, HashMap};

use rivulet_core::TimerId;

type Callback = Box<dyn FnOnce()>;

/// Pending timers ordered by due time, then by registration order.
#[derive(Default)]
pub(crate) struct Clock {
    now: Duration,
    next: u64,
    queue: BTreeMap<(Duration, u64), Callback>,
    due: HashMap<u64, Duration>,
}

impl Clock {
    pub(crate) const fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn schedule(&mut self, delay: Duration, callback: Callback) -> TimerId {
        self.next += 1;
        let at = self.now.saturating_add(delay);
        self.queue.insert((at, self.next), callback);
        self.due.insert(self.next, at);
        TimerId::from_raw(self.next)
    }

    pub(crate) fn cancel(&mut self, timer: TimerId) -> bool {
        let raw = timer.into_raw();
        self.due
            .remove(&raw)
            .and_then(|at| self.queue.remove(&(at, raw)))
            .is_some()
    }

    /// Removes the earliest timer due at or before `until` and moves the clock to its due time.
    pub(crate) fn pop_due(&mut self, until: Duration) -> Option<Callback> {
        let (&(at, raw), _) = self.queue.first_key_value()?;
        if at > until {
            return None;
        }
        self.due.remove(&raw);
        self.now = self.now.max(at);
        self.queue.remove(&(at, raw))
    }

    pub(crate) fn settle(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn push(log: &Rc<RefCell<Vec<u32>>>, value: u32) -> Callback {
        let log = Rc::clone(log);
        Box::new(move || log.borrow_mut().push(value))
    }

    #[test]
    fn timers_fire_by_due_time_then_registration() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut clock = Clock::default();
        clock.schedule(Duration::from_millis(20), push(&log, 1));
        clock.schedule(Duration::from_millis(10), push(&log, 2));
        clock.schedule(Duration::from_millis(10), push(&log, 3));

        while let Some(callback) = clock.pop_due(Duration::from_millis(15)) {
            callback();
        }
        assert_eq!(*log.borrow(), [2, 3]);
        assert_eq!(clock.now(), Duration::from_millis(10));
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut clock = Clock::default();
        let timer = clock.schedule(Duration::from_millis(5), push(&log, 1));

        assert!(clock.cancel(timer));
        assert!(!clock.cancel(timer));
        assert!(clock.pop_due(Duration::from_secs(1)).is_none());
        assert!(log.borrow().is_empty());
    }
}
