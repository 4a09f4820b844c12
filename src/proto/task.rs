// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;
use crate::graph::Key;

/// Identity of one deployed container: the master-assigned graph id plus
/// the container key inside that graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub graph: Key,
    pub container: Key,
}

impl TaskId {
    pub fn new(graph: Key, container: Key) -> Self {
        Self { graph, container }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.graph, self.container)
    }
}

impl Archive for TaskId {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.graph.archive(ar) + self.container.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { graph: Key::unarchive(ar)?, container: Key::unarchive(ar)? })
    }
}

/// One task's terminal report, relayed agent → master → submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub host: String,
    pub status: i32,
}

impl TaskInfo {
    pub fn new(task_id: TaskId, host: impl Into<String>, status: i32) -> Self {
        Self { task_id, host: host.into(), status }
    }

    pub fn has_error(&self) -> bool {
        self.status != 0
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} @{} (status={})", self.task_id, self.host, self.status)
    }
}

impl Archive for TaskInfo {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.task_id.archive(ar) + self.host.archive(ar) + self.status.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            task_id: TaskId::unarchive(ar)?,
            host: String::unarchive(ar)?,
            status: i32::unarchive(ar)?,
        })
    }
}

/// Master → agent order to tear one task down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillTask {
    pub task_id: TaskId,
}

impl Archive for KillTask {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.task_id.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { task_id: TaskId::unarchive(ar)? })
    }
}

/// Terminal answer for one submitted graph: every task's report, plus a
/// human-readable account when a scheduling or runtime rule fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    pub graph: Key,
    pub task_infos: Vec<TaskInfo>,
    pub what: String,
}

impl Solution {
    pub fn new(graph: Key) -> Self {
        Self { graph, task_infos: Vec::new(), what: String::new() }
    }

    pub fn has_error(&self) -> bool {
        !self.what.is_empty() || self.task_infos.iter().any(TaskInfo::has_error)
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[solution for graph {}]", self.graph)?;
        for info in &self.task_infos {
            writeln!(f, "  {}", info)?;
        }
        if !self.what.is_empty() {
            writeln!(f, "  what: {}", self.what)?;
        }
        Ok(())
    }
}

impl Archive for Solution {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.graph.archive(ar) + self.task_infos.archive(ar) + self.what.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            graph: Key::unarchive(ar)?,
            task_infos: Vec::unarchive(ar)?,
            what: String::unarchive(ar)?,
        })
    }
}
