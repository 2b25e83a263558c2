// Copyright 2025 Javelin project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod child;
mod console;
mod discovery;
mod driver;
mod task;

pub use crate::console::Console;
pub use crate::discovery::{discover, Discovered};
pub use crate::driver::{Driver, RunConfig, GLOBAL_OUTCOME_NAME, LARGE_TIMEOUT_MULTIPLIER};
pub use crate::task::{Pool, Scheduler, Task};

#[cfg(test)]
mod discovery_tests;

#[cfg(test)]
mod driver_tests;
