// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::proto::TaskId;

/// Failures surfaced by the master / agent control plane.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No packing of the submitted containers fits the cluster.
    #[error("resource request does not fit in cluster")]
    DoesNotFit,

    /// The control connection to the master could not be established.
    #[error("cannot reach master at {addr}: {source}")]
    MasterUnreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A frontier connection to a peer agent could not be established.
    #[error("cannot open frontier to {host} for stream {stream}: {source}")]
    FrontierUnreachable {
        host: String,
        stream: i64,
        #[source]
        source: std::io::Error,
    },

    /// Deploying a ready task into an executor child failed.
    #[error("failed to deploy task {task}: {reason}")]
    DeployFailed { task: TaskId, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
