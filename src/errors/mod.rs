// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod archive;
mod cluster;
mod engine;
mod graph;
mod settings;

pub use archive::ArchiveError;
pub use cluster::ClusterError;
pub use engine::EngineError;
pub use graph::GraphError;
pub use settings::SettingsError;

/// Process exit code used when a control channel (master or agent side)
/// breaks underneath a running process.
pub const EXIT_BROKEN_CONNECTION: i32 = 90;

/// Process exit code used when a stream marked critical fails.
pub const EXIT_CRITICAL_STREAM: i32 = 91;

/// Process exit code used when a spawned vertex program exits abnormally.
pub const EXIT_VERTEX_PROGRAM: i32 = 92;
