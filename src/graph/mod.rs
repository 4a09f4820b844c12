// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The user-facing graph: vertices, streams, probers, containers.
//!
//! Builders do not mutate anything directly. Every builder call enqueues
//! a deferred build task, and the task runs in one of three modes when
//! the graph is materialized:
//!
//! - local (`None`): apply straight to the graph's definition maps;
//! - submit (whole topology): write key-only descriptors for the master;
//! - per-container: apply only what lives in that container's fragment.
//!
//! One task list serves all three, which is what lets the same user
//! binary act as submitter and as deployed executor child.

mod builders;
mod stream;
mod vertex;

pub use builders::{ContainerBuilder, PlaceHolder, ProberBuilder, StreamBuilder, VertexBuilder};
pub use stream::{InputStream, OutputStream};
pub use vertex::{IstreamFn, OstreamFn, ProberFn, Vertex, VertexFn};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::errors::GraphError;
use crate::proto::{Runtime, TaskId, Topology, TopologyContainer, WHOLE};

/// Graph component identity. `-1` is the unset sentinel.
pub type Key = i64;

pub const UNSET_KEY: Key = -1;

static NEXT_KEY: AtomicI64 = AtomicI64::new(0);

/// Per-process monotonic key source shared by vertices, streams, and
/// containers. Uniqueness is only required within one graph; the child
/// executor reproduces the same keys by replaying the same user code.
pub(crate) fn generate_key() -> Key {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

const GIB: u64 = 1 << 30;

pub(crate) struct VertexDef {
    pub key: Key,
    pub tag: Option<String>,
    pub program: Option<String>,
    pub on: Option<VertexFn>,
}

impl VertexDef {
    fn new(key: Key) -> Self {
        Self { key, tag: None, program: None, on: None }
    }
}

pub(crate) struct StreamDef {
    pub key: Key,
    pub tail: Key,
    pub head: Key,
    pub tag: Option<String>,
    pub critical: bool,
    pub on_istream: Option<IstreamFn>,
    pub on_ostream: Option<OstreamFn>,
}

impl StreamDef {
    fn new(key: Key, tail: Key, head: Key) -> Self {
        Self { key, tail, head, tag: None, critical: false, on_istream: None, on_ostream: None }
    }
}

pub(crate) struct ProberDef {
    pub vertex: Key,
    pub tag: Option<String>,
    pub period: Option<Duration>,
    pub on: Option<ProberFn>,
}

/// Definition maps the build tasks write into.
#[derive(Default)]
pub(crate) struct GraphCore {
    pub vertices: HashMap<Key, VertexDef>,
    pub streams: HashMap<Key, StreamDef>,
    pub probers: HashMap<Key, ProberDef>,
}

pub(crate) type BuildTask =
    Box<dyn FnOnce(&mut GraphCore, Option<&mut Topology>) -> Result<(), GraphError> + Send>;

#[derive(Default)]
pub struct Graph {
    pub(crate) core: GraphCore,
    pub(crate) tasks: Vec<BuildTask>,
    pub(crate) task_id: Option<TaskId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a vertex. The returned builder's key names it in later
    /// `stream` / `container` calls.
    pub fn vertex(&mut self) -> VertexBuilder<'_> {
        let key = generate_key();
        self.tasks.push(Box::new(move |core, tpg| {
            match tpg {
                None => {
                    core.vertices.insert(key, VertexDef::new(key));
                }
                Some(t) if t.is_whole() => {
                    t.vertices.insert(key, crate::proto::TopologyVertex::new(key));
                }
                Some(t) if t.has_vertex(key) => {
                    core.vertices.insert(key, VertexDef::new(key));
                }
                Some(_) => {}
            }
            Ok(())
        }));
        VertexBuilder::new(self, key)
    }

    /// Connect `tail` to `head` with a new stream.
    pub fn stream(&mut self, tail: Key, head: Key) -> StreamBuilder<'_> {
        let key = generate_key();
        self.emplace_stream(key, tail, head);
        StreamBuilder::new(self, key, tail, head)
    }

    /// Connect whatever landed on `placeholder`'s tail port to `head`.
    pub fn stream_from(
        &mut self,
        placeholder: &mut PlaceHolder,
        head: Key,
    ) -> Result<StreamBuilder<'_>, GraphError> {
        let tail = match (placeholder.tail(), placeholder.head()) {
            (Some(tail), None) => tail,
            _ => return Err(GraphError::DanglingPlaceHolder { endpoint: head }),
        };
        let key = generate_key();
        self.emplace_stream(key, tail, head);
        placeholder.record(key);
        Ok(StreamBuilder::new(self, key, tail, head))
    }

    /// Connect `tail` to whatever landed on `placeholder`'s head port.
    pub fn stream_into(
        &mut self,
        tail: Key,
        placeholder: &mut PlaceHolder,
    ) -> Result<StreamBuilder<'_>, GraphError> {
        let head = match (placeholder.tail(), placeholder.head()) {
            (None, Some(head)) => head,
            _ => return Err(GraphError::DanglingPlaceHolder { endpoint: tail }),
        };
        let key = generate_key();
        self.emplace_stream(key, tail, head);
        placeholder.record(key);
        Ok(StreamBuilder::new(self, key, tail, head))
    }

    /// Start a container, the unit of placement.
    pub fn container(&mut self) -> ContainerBuilder<'_> {
        let key = generate_key();
        self.tasks.push(Box::new(move |_, tpg| {
            if let Some(t) = tpg {
                if t.is_whole() {
                    t.containers.insert(key, TopologyContainer::new(key));
                }
            }
            Ok(())
        }));
        ContainerBuilder::new(self, key)
    }

    /// Attach a periodic prober to `vertex`.
    pub fn prober(&mut self, vertex: Key) -> ProberBuilder<'_> {
        self.tasks.push(Box::new(move |core, tpg| {
            let local = match &tpg {
                None => true,
                Some(t) => !t.is_whole() && t.has_vertex(vertex),
            };
            if local {
                if !core.vertices.contains_key(&vertex) {
                    return Err(GraphError::UnknownVertex { vertex });
                }
                core.probers
                    .entry(vertex)
                    .or_insert(ProberDef { vertex, tag: None, period: None, on: None });
            }
            Ok(())
        }));
        ProberBuilder::new(self, vertex)
    }

    fn emplace_stream(&mut self, key: Key, tail: Key, head: Key) {
        self.tasks.push(Box::new(move |core, tpg| {
            match tpg {
                None => {
                    core.streams.insert(key, StreamDef::new(key, tail, head));
                }
                Some(t) if t.is_whole() => {
                    t.streams.insert(key, crate::proto::TopologyStream { key, tail, head });
                }
                Some(t) if t.has_stream(key) => {
                    core.streams.insert(key, StreamDef::new(key, tail, head));
                }
                Some(_) => {}
            }
            Ok(())
        }));
    }

    /// Replay every deferred build task in the mode `tpg` selects. Tasks
    /// run once; materializing a graph consumes them.
    pub(crate) fn make(&mut self, mut tpg: Option<&mut Topology>) -> Result<(), GraphError> {
        if let Some(t) = tpg.as_deref() {
            self.task_id = Some(t.task_id());
        }
        for task in std::mem::take(&mut self.tasks) {
            task(&mut self.core, tpg.as_deref_mut())?;
        }
        Ok(())
    }

    /// Submit-form materialization: key-only descriptors plus the
    /// submitter's environment, with unplaced vertices coalesced into one
    /// synthetic container and zero resources defaulted.
    pub(crate) fn topologize(&mut self) -> Result<Topology, GraphError> {
        let mut tpg = Topology::new(UNSET_KEY, WHOLE);
        tpg.runtime = Runtime::from_process_env();
        self.make(Some(&mut tpg))?;

        if tpg.vertices.values().any(|v| v.container == UNSET_KEY) {
            let ckey = generate_key();
            tpg.containers.insert(ckey, TopologyContainer::new(ckey));
            let mut coalesced = Vec::new();
            for v in tpg.vertices.values_mut() {
                if v.container == UNSET_KEY {
                    v.container = ckey;
                    coalesced.push(v.key);
                }
            }
            tracing::info!(container = ckey, vertices = ?coalesced, "coalesced unplaced vertices");
        }

        for c in tpg.containers.values_mut() {
            if c.resource.num_cpus == 0 {
                c.resource.num_cpus = 1;
            }
            if c.resource.memory_limit_in_bytes == 0 {
                c.resource.memory_limit_in_bytes = GIB;
            }
            if c.resource.space_limit_in_bytes == 0 {
                c.resource.space_limit_in_bytes = GIB;
            }
        }

        Ok(tpg)
    }

    pub fn num_vertices(&self) -> usize {
        self.core.vertices.len()
    }

    pub fn num_streams(&self) -> usize {
        self.core.streams.len()
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }
}
