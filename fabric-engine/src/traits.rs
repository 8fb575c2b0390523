// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Traits shared by everything the engine runs.

use async_trait::async_trait;

use crate::types::SimResult;

/// A component with a main loop that the [`Engine`](crate::engine::Engine)
/// can spawn.
#[async_trait(?Send)]
pub trait Runnable {
    /// Run until the component has nothing left to do, or forever for
    /// background loops that wait with
    /// [`wait_cycles_or_exit`](crate::clock::Clock::wait_cycles_or_exit).
    async fn run(&self) -> SimResult;
}
