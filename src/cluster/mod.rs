// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod agent;
pub mod container;
#[cfg(test)]
mod integration_tests;
pub mod master;
pub mod scheduler;

pub use agent::{Agent, AgentState, Frontier};
pub use master::{ClusterInfo, Master, MasterState};
pub use scheduler::{best_fit, AgentView, Placement};
