// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use fabric_engine::clock::Clock;
use fabric_engine::run_simulation;
use fabric_engine::test_helpers::start_test;
use fabric_engine::traits::Runnable;
use fabric_engine::types::SimResult;

#[derive(Clone)]
struct Counter {
    clock: Clock,
    count: Rc<Cell<u32>>,
    limit: u32,
}

#[async_trait(?Send)]
impl Runnable for Counter {
    async fn run(&self) -> SimResult {
        while self.count.get() < self.limit {
            self.clock.wait_cycles(1).await;
            self.count.set(self.count.get() + 1);
        }
        if self.limit > 5 {
            return fabric_engine::sim_error!(format!("counted past {}", 5));
        }
        Ok(())
    }
}

#[test]
fn run_simulation_keeps_clones() {
    let mut engine = start_test(file!());
    let counter = Counter {
        clock: engine.clock(),
        count: Rc::new(Cell::new(0)),
        limit: 4,
    };
    run_simulation!(engine ; [counter]);
    assert_eq!(counter.count.get(), 4);
}

#[test]
fn error_stops_simulation() {
    let mut engine = start_test(file!());
    let counter = Counter {
        clock: engine.clock(),
        count: Rc::new(Cell::new(0)),
        limit: 7,
    };
    run_simulation!(engine, "Error: counted past 5" ; [counter]);
}

#[test]
fn registered_components_run() {
    let mut engine = start_test(file!());
    let count = Rc::new(Cell::new(0));
    let counter = Rc::new(Counter {
        clock: engine.clock(),
        count: count.clone(),
        limit: 3,
    });
    engine.register(counter);
    engine.run().unwrap();
    assert_eq!(count.get(), 3);
}
