// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! Cycle-driven simulation engine for the fabric.
//!
//! The [engine](crate::engine::Engine) owns a single-threaded cooperative
//! [executor](crate::executor) and one [clock](crate::clock::Clock) counting
//! cycles. Router loops are `async` functions that do a bounded amount of work
//! and then wait on the clock, which is how the fabric's polling loops give
//! way to each other.
//!
//! # Simple Application
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use fabric_engine::engine::Engine;
//!
//! let mut engine = Engine::default();
//! let clock = engine.clock();
//! let done = Rc::new(Cell::new(0));
//! {
//!     let done = done.clone();
//!     engine.spawn(async move {
//!         clock.wait_cycles(10).await;
//!         done.set(clock.now());
//!         Ok(())
//!     });
//! }
//! engine.run().unwrap();
//! assert_eq!(done.get(), 10);
//! ```

pub mod clock;
pub mod engine;
pub mod executor;
pub mod test_helpers;
pub mod traits;
pub mod types;

#[macro_export]
/// Spawn the `run()` of every component and keep clones for later inspection.
macro_rules! spawn_simulation {
    ($engine:ident ; [$($block:ident),* $(,)?]) => {
        $(
        let clone = $block.clone();
        $engine.spawn(async move { $block.run().await } );
        let $block = clone;
        let _ = &$block;
        )*
    };
}

#[macro_export]
/// Spawn all component `run()` functions and then run the simulation.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident ; [$($block:ident),* $(,)?]) => {
        $crate::spawn_simulation!($engine ; [$($block,)*]);
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
    ($engine:ident, $expect:expr ; [$($block:ident),* $(,)?]) => {
        $crate::spawn_simulation!($engine ; [$($block,)*]);
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}
