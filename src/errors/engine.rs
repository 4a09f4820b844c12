// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::errors::ArchiveError;
use crate::graph::Key;

/// Failures raised by the reactor and executor machinery.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The owner loop has already exited; the promise will never run.
    #[error("reactor loop is gone, promise dropped")]
    LoopGone,

    /// A runtime variable the current execution mode requires is absent.
    #[error("missing runtime variable {0}")]
    MissingRuntime(&'static str),

    /// The frontier list does not carry an entry for an inter stream.
    #[error("no frontier descriptor for inter stream {0}")]
    FrontierMissing(Key),

    /// A frontier entry named a stream that is not part of the topology.
    #[error("frontier descriptor for unknown stream {0}")]
    FrontierUnknown(Key),

    /// Adopting an inherited descriptor failed.
    #[error("cannot adopt inherited descriptor {fd}: {source}")]
    BadDescriptor {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    /// Spawning a vertex program or executor child failed.
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Graph(#[from] crate::errors::GraphError),

    #[error(transparent)]
    Settings(#[from] crate::errors::SettingsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
