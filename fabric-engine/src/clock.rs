// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The simulation clock.
//!
//! Time is a single count of cycles. Tasks suspend themselves on the clock
//! with [`Clock::wait_cycles`] and the executor wakes them in cycle order.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A task waiting on the clock.
pub struct TaskWaker {
    /// The Waker to use to make a task active again.
    pub waker: Waker,

    /// Background tasks that would run forever set `can_exit` so that they
    /// do not keep the simulation alive.
    pub can_exit: bool,
}

/// Shared state between a [`Clock`] and the futures waiting on it.
pub struct ClockState {
    now: Cell<u64>,

    /// Waiting tasks grouped by wake-up cycle, kept sorted with the latest
    /// cycle first so that the next group is popped from the back.
    waiting: RefCell<Vec<(u64, Vec<TaskWaker>)>>,
}

impl ClockState {
    fn schedule(&self, cycle: u64, waker: &Waker, can_exit: bool) {
        let task_waker = TaskWaker {
            waker: waker.clone(),
            can_exit,
        };
        let mut waiting = self.waiting.borrow_mut();
        match waiting.binary_search_by(|(c, _)| cycle.cmp(c)) {
            Ok(index) => waiting[index].1.push(task_waker),
            Err(index) => waiting.insert(index, (cycle, vec![task_waker])),
        }
    }
}

/// Counts cycles and schedules tasks waiting for a future cycle.
#[derive(Clone)]
pub struct Clock {
    shared_state: Rc<ClockState>,
}

impl Clock {
    /// Create a new [Clock] at cycle 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared_state: Rc::new(ClockState {
                now: Cell::new(0),
                waiting: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns the current cycle.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.shared_state.now.get()
    }

    /// Returns the cycle of the next scheduled wake-up, if any.
    #[must_use]
    pub fn next_wake(&self) -> Option<u64> {
        self.shared_state.waiting.borrow().last().map(|(c, _)| *c)
    }

    /// Returns a [ClockDelay] future which must be `await`ed to delay the
    /// specified number of cycles.
    #[must_use = "Futures do nothing unless you `.await` or otherwise use them"]
    pub fn wait_cycles(&self, cycles: u64) -> ClockDelay {
        self.delay(cycles, false)
    }

    /// As [`Clock::wait_cycles`], except that the simulation is allowed to end
    /// while this future is still pending. Used by background loops.
    #[must_use = "Futures do nothing unless you `.await` or otherwise use them"]
    pub fn wait_cycles_or_exit(&self, cycles: u64) -> ClockDelay {
        self.delay(cycles, true)
    }

    fn delay(&self, cycles: u64, can_exit: bool) -> ClockDelay {
        ClockDelay {
            shared_state: self.shared_state.clone(),
            until: self.now() + cycles,
            scheduled: false,
            can_exit,
        }
    }

    /// Move time to the next scheduled cycle and return the tasks to wake.
    pub(crate) fn advance(&self) -> Option<Vec<TaskWaker>> {
        let (cycle, wakers) = self.shared_state.waiting.borrow_mut().pop()?;
        assert!(cycle >= self.now(), "Time moving backwards");
        self.shared_state.now.set(cycle);
        Some(wakers)
    }

    /// The simulation can exit if every scheduled task can exit.
    #[must_use]
    pub fn can_exit(&self) -> bool {
        self.shared_state
            .waiting
            .borrow()
            .iter()
            .all(|(_, wakers)| wakers.iter().all(|w| w.can_exit))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by the clock to delay a task.
pub struct ClockDelay {
    shared_state: Rc<ClockState>,
    until: u64,
    scheduled: bool,
    can_exit: bool,
}

impl Future for ClockDelay {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.scheduled {
            self.shared_state.schedule(self.until, cx.waker(), self.can_exit);
            self.scheduled = true;
            return Poll::Pending;
        }
        if self.shared_state.now.get() >= self.until {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use std::task::Waker;

    use super::*;

    #[test]
    fn waiters_ordered_by_cycle() {
        let clock = Clock::new();
        let waker = Waker::noop();
        clock.shared_state.schedule(5, waker, false);
        clock.shared_state.schedule(2, waker, true);
        clock.shared_state.schedule(5, waker, true);
        assert_eq!(clock.next_wake(), Some(2));
        assert!(!clock.can_exit());

        assert_eq!(clock.advance().map(|w| w.len()), Some(1));
        assert_eq!(clock.now(), 2);
        assert_eq!(clock.advance().map(|w| w.len()), Some(2));
        assert_eq!(clock.now(), 5);
        assert!(clock.advance().is_none());
        assert!(clock.can_exit());
    }
}
