// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for reactor and executor lifecycle events.

use std::fmt::{Display, Formatter};
use tracing::Span;

use crate::graph::Key;
use crate::observability::messages::StructuredLog;

/// An executor entered its dispatch loop.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutorLaunched<'a> {
    pub mode: &'a str,
    pub num_vertices: usize,
    pub num_streams: usize,
}

impl Display for ExecutorLaunched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Executor launched in {} mode: {} vertices, {} streams",
            self.mode, self.num_vertices, self.num_streams
        )
    }
}

impl StructuredLog for ExecutorLaunched<'_> {
    fn log(&self) {
        tracing::info!(
            mode = self.mode,
            num_vertices = self.num_vertices,
            num_streams = self.num_streams,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "executor",
            span_name = name,
            mode = self.mode,
            num_vertices = self.num_vertices,
            num_streams = self.num_streams,
        )
    }
}

/// A stream was released from the executor, from one side or the other.
///
/// # Log Level
/// `debug!` - Routine lifecycle event
pub struct StreamRetired<'a> {
    pub stream: Key,
    pub side: &'a str,
}

impl Display for StreamRetired<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Stream {} retired from the {} side", self.stream, self.side)
    }
}

impl StructuredLog for StreamRetired<'_> {
    fn log(&self) {
        tracing::debug!(stream = self.stream, side = self.side, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("stream_retired", span_name = name, stream = self.stream, side = self.side)
    }
}

/// Buffered output bytes were dropped because the stream's device died
/// before they could be flushed.
///
/// # Log Level
/// `warn!` - Data visible to the user was lost
pub struct OstreamDropped {
    pub stream: Key,
    pub unflushed: usize,
}

impl Display for OstreamDropped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Stream {} dropped {} unflushed bytes", self.stream, self.unflushed)
    }
}

impl StructuredLog for OstreamDropped {
    fn log(&self) {
        tracing::warn!(stream = self.stream, unflushed = self.unflushed, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "ostream_dropped",
            span_name = name,
            stream = self.stream,
            unflushed = self.unflushed,
        )
    }
}

/// A vertex program was forked underneath a vertex.
///
/// # Log Level
/// `info!` - Important operational event
pub struct VertexProgramSpawned<'a> {
    pub vertex: Key,
    pub command: &'a str,
    pub num_bridges: usize,
}

impl Display for VertexProgramSpawned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Spawned vertex program {} [{}] with {} bridges",
            self.vertex, self.command, self.num_bridges
        )
    }
}

impl StructuredLog for VertexProgramSpawned<'_> {
    fn log(&self) {
        tracing::info!(
            vertex = self.vertex,
            command = self.command,
            num_bridges = self.num_bridges,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "vertex_program",
            span_name = name,
            vertex = self.vertex,
            command = self.command,
        )
    }
}

/// A vertex program exited.
///
/// # Log Level
/// `info!` on success, `error!` on failure
pub struct VertexProgramExited {
    pub vertex: Key,
    pub success: bool,
}

impl Display for VertexProgramExited {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.success {
            write!(f, "Vertex program {} exited cleanly", self.vertex)
        } else {
            write!(f, "Vertex program {} exited abnormally", self.vertex)
        }
    }
}

impl StructuredLog for VertexProgramExited {
    fn log(&self) {
        if self.success {
            tracing::info!(vertex = self.vertex, "{}", self);
        } else {
            tracing::error!(vertex = self.vertex, "{}", self);
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "vertex_program_exited",
            span_name = name,
            vertex = self.vertex,
            success = self.success,
        )
    }
}
