// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for master and agent control-plane events.

use std::fmt::{Display, Formatter};
use tracing::Span;

use crate::graph::Key;
use crate::observability::messages::StructuredLog;
use crate::proto::TaskId;

/// An agent announced itself and its resources to the master.
///
/// # Log Level
/// `info!` - Important operational event
pub struct AgentConnected<'a> {
    pub agent: Key,
    pub host: &'a str,
    pub num_cpus: u64,
}

impl Display for AgentConnected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Agent {} connected from {} with {} cpus", self.agent, self.host, self.num_cpus)
    }
}

impl StructuredLog for AgentConnected<'_> {
    fn log(&self) {
        tracing::info!(agent = self.agent, host = self.host, num_cpus = self.num_cpus, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("agent", span_name = name, agent = self.agent, host = self.host)
    }
}

/// An agent's control channel broke or it was retired.
///
/// # Log Level
/// `warn!` - Placement capacity was lost
pub struct AgentRemoved {
    pub agent: Key,
    pub graphs_affected: usize,
}

impl Display for AgentRemoved {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Agent {} removed from the master ({} graphs affected)",
            self.agent, self.graphs_affected
        )
    }
}

impl StructuredLog for AgentRemoved {
    fn log(&self) {
        tracing::warn!(agent = self.agent, graphs_affected = self.graphs_affected, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("agent_removed", span_name = name, agent = self.agent)
    }
}

/// A submitter delivered a whole-form topology.
///
/// # Log Level
/// `info!` - Important operational event
pub struct GraphArrived {
    pub graph: Key,
    pub num_containers: usize,
    pub num_vertices: usize,
}

impl Display for GraphArrived {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Graph {} arrived: {} containers, {} vertices",
            self.graph, self.num_containers, self.num_vertices
        )
    }
}

impl StructuredLog for GraphArrived {
    fn log(&self) {
        tracing::info!(
            graph = self.graph,
            num_containers = self.num_containers,
            num_vertices = self.num_vertices,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("graph", span_name = name, graph = self.graph)
    }
}

/// A graph left the master, with the reason recorded in its solution.
///
/// # Log Level
/// `info!` - Important operational event
pub struct GraphRemoved<'a> {
    pub graph: Key,
    pub what: &'a str,
}

impl Display for GraphRemoved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.what.is_empty() {
            write!(f, "Graph {} removed from the master", self.graph)
        } else {
            write!(f, "Graph {} removed from the master ({})", self.graph, self.what)
        }
    }
}

impl StructuredLog for GraphRemoved<'_> {
    fn log(&self) {
        tracing::info!(graph = self.graph, what = self.what, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("graph_removed", span_name = name, graph = self.graph)
    }
}

/// A frontier socket identified itself at an agent.
///
/// # Log Level
/// `debug!` - Routine wiring event
pub struct FrontierReceived {
    pub graph: Key,
    pub stream: Key,
}

impl Display for FrontierReceived {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Frontier received for stream {} of graph {}", self.stream, self.graph)
    }
}

impl StructuredLog for FrontierReceived {
    fn log(&self) {
        tracing::debug!(graph = self.graph, stream = self.stream, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("frontier", span_name = name, graph = self.graph, stream = self.stream)
    }
}

/// A ready task was hatched into an executor child.
///
/// # Log Level
/// `info!` - Important operational event
pub struct TaskDeployed {
    pub task: TaskId,
    pub num_frontiers: usize,
}

impl Display for TaskDeployed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Deployed task {} with {} frontiers", self.task, self.num_frontiers)
    }
}

impl StructuredLog for TaskDeployed {
    fn log(&self) {
        tracing::info!(task = %self.task, num_frontiers = self.num_frontiers, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("task", span_name = name, task = %self.task)
    }
}

/// A task left an agent, reporting its exit status upstream.
///
/// # Log Level
/// `info!` on clean exits, `warn!` otherwise
pub struct TaskRemoved {
    pub task: TaskId,
    pub status: i32,
}

impl Display for TaskRemoved {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Task {} removed (status={})", self.task, self.status)
    }
}

impl StructuredLog for TaskRemoved {
    fn log(&self) {
        if self.status == 0 {
            tracing::info!(task = %self.task, status = self.status, "{}", self);
        } else {
            tracing::warn!(task = %self.task, status = self.status, "{}", self);
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("task_removed", span_name = name, task = %self.task)
    }
}

/// The scheduler could not place a graph and left it queued.
///
/// # Log Level
/// `info!` - Expected back-pressure, not an error
pub struct SchedulerBlocked {
    pub graph: Key,
    pub queue_depth: usize,
}

impl Display for SchedulerBlocked {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Graph {} cannot be placed yet (queue depth {})",
            self.graph, self.queue_depth
        )
    }
}

impl StructuredLog for SchedulerBlocked {
    fn log(&self) {
        tracing::info!(graph = self.graph, queue_depth = self.queue_depth, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("scheduler", span_name = name, graph = self.graph)
    }
}
