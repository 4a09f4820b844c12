// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod event;
pub mod executor;
#[cfg(test)]
pub mod integration_tests;
pub mod reactor;

pub use event::{Event, EventFn, EventId, Signal};
pub use executor::{Executor, ExecutorHandle, ExecutorState};
pub use reactor::{Handle, Promise, Reactor};
