// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The [`Engine`] ties together the executor, the clock and the top-level
//! entity of a simulation.

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use fabric_track::Tracker;
use fabric_track::entity::{Entity, toplevel};
use fabric_track::tracker::stdout_tracker;

use crate::clock::Clock;
use crate::executor::{self, Executor, Spawner};
use crate::traits::Runnable;
use crate::types::SimResult;

pub struct Engine {
    pub executor: Executor,
    pub spawner: Spawner,
    toplevel: Arc<Entity>,
    tracker: Tracker,
}

impl Engine {
    /// Create a standalone engine.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let (executor, spawner) = executor::new_executor_and_spawner(&toplevel);
        Self {
            executor,
            spawner,
            toplevel,
            tracker: tracker.clone(),
        }
    }

    /// Run the simulation to completion.
    pub fn run(&mut self) -> SimResult {
        let result = self.executor.run();
        self.tracker.shutdown();
        result
    }

    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.executor.spawn(future);
    }

    /// Spawn the `run()` function of a [`Runnable`] component.
    pub fn register(&self, component: Rc<dyn Runnable>) {
        self.executor
            .spawn(async move { component.run().await });
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.executor.clock()
    }

    #[must_use]
    pub fn cycle_now(&self) -> u64 {
        self.executor.clock().now()
    }

    #[must_use]
    pub fn top(&self) -> &Arc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](fabric_track::Track) events
/// at `Warn` and above to stdout.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
