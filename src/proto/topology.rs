// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wire-form graph fragment.
//!
//! A topology with id `WHOLE` is the submit form carrying the entire
//! graph; `extract` projects it down to the fragment one agent needs for
//! one container: the vertices assigned there plus every stream with at
//! least one endpoint there.

use std::collections::HashMap;
use std::fmt;

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;
use crate::graph::{Key, UNSET_KEY};
use crate::proto::{Resource, Runtime, TaskId};

/// Topology id of the undivided submit-form graph.
pub const WHOLE: Key = -1;

/// Direction qualifier for inter-stream queries: which side of the stream
/// is local to the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The head (consumer) vertex is local; bytes flow in.
    Input,
    /// The tail (producer) vertex is local; bytes flow out.
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyVertex {
    pub key: Key,
    pub container: Key,
}

impl TopologyVertex {
    pub fn new(key: Key) -> Self {
        Self { key, container: UNSET_KEY }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyStream {
    pub key: Key,
    pub tail: Key,
    pub head: Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyContainer {
    pub key: Key,
    pub resource: Resource,
    pub configs: HashMap<String, String>,
}

impl TopologyContainer {
    pub fn new(key: Key) -> Self {
        Self { key, resource: Resource::default(), configs: HashMap::new() }
    }

    /// Hard host requirement, if any.
    pub fn host(&self) -> Option<&str> {
        self.configs.get("host").map(String::as_str)
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.configs.insert("host".to_string(), host.into());
    }

    /// Soft placement preferences, whitespace separated.
    pub fn preferred_hosts(&self) -> Vec<&str> {
        self.configs
            .get("preferred_hosts")
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn add_preferred_host(&mut self, host: &str) {
        let entry = self.configs.entry("preferred_hosts".to_string()).or_default();
        if !entry.is_empty() {
            entry.push(' ');
        }
        entry.push_str(host);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub graph: Key,
    pub topology: Key,
    pub vertices: HashMap<Key, TopologyVertex>,
    pub streams: HashMap<Key, TopologyStream>,
    pub containers: HashMap<Key, TopologyContainer>,
    pub runtime: Runtime,
}

impl Topology {
    pub fn new(graph: Key, topology: Key) -> Self {
        Self { graph, topology, ..Default::default() }
    }

    pub fn task_id(&self) -> TaskId {
        TaskId::new(self.graph, self.topology)
    }

    pub fn is_whole(&self) -> bool {
        self.topology == WHOLE
    }

    pub fn has_vertex(&self, key: Key) -> bool {
        self.vertices.contains_key(&key)
    }

    pub fn has_stream(&self, key: Key) -> bool {
        self.streams.contains_key(&key)
    }

    pub fn has_container(&self, key: Key) -> bool {
        self.containers.contains_key(&key)
    }

    /// Both endpoints hosted by this topology.
    pub fn has_intra_stream(&self, key: Key) -> bool {
        match self.streams.get(&key) {
            Some(s) => self.has_vertex(s.tail) && self.has_vertex(s.head),
            None => false,
        }
    }

    /// Exactly one endpoint hosted by this topology, on the given side.
    pub fn has_inter_stream(&self, key: Key, side: Side) -> bool {
        match self.streams.get(&key) {
            Some(s) => match side {
                Side::Input => self.has_vertex(s.head) && !self.has_vertex(s.tail),
                Side::Output => self.has_vertex(s.tail) && !self.has_vertex(s.head),
            },
            None => false,
        }
    }

    pub fn is_inter_stream(&self, key: Key) -> bool {
        self.has_inter_stream(key, Side::Input) || self.has_inter_stream(key, Side::Output)
    }

    pub fn num_inter_streams(&self) -> usize {
        self.streams.keys().filter(|k| self.is_inter_stream(**k)).count()
    }

    pub fn num_intra_streams(&self) -> usize {
        self.streams.keys().filter(|k| self.has_intra_stream(**k)).count()
    }

    pub fn min_container_key(&self) -> Option<Key> {
        self.containers.keys().min().copied()
    }

    pub fn max_container_key(&self) -> Option<Key> {
        self.containers.keys().max().copied()
    }

    /// Sum of every container's request.
    pub fn resource(&self) -> Resource {
        let mut total = Resource::default();
        for c in self.containers.values() {
            total += &c.resource;
        }
        total
    }

    /// Project the per-container fragment for `container`: its vertices,
    /// every stream touching it, the shared runtime.
    pub fn extract(&self, container: Key) -> Topology {
        let mut tpg = Topology::new(self.graph, container);
        tpg.runtime = self.runtime.clone();

        if let Some(c) = self.containers.get(&container) {
            tpg.containers.insert(container, c.clone());
        }

        for (key, vertex) in &self.vertices {
            if vertex.container == container {
                tpg.vertices.insert(*key, vertex.clone());
            }
        }

        for (key, stream) in &self.streams {
            let tail_c = self.vertices.get(&stream.tail).map(|v| v.container);
            let head_c = self.vertices.get(&stream.head).map(|v| v.container);
            if tail_c == Some(container) || head_c == Some(container) {
                tpg.streams.insert(*key, stream.clone());
            }
        }

        tpg
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[topology {}.{}|vertex:{}|stream:{}|container:{}]",
            self.graph,
            self.topology,
            self.vertices.len(),
            self.streams.len(),
            self.containers.len()
        )
    }
}

// ---- wire form ---------------------------------------------------------------------------------

impl Archive for TopologyVertex {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.key.archive(ar) + self.container.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { key: Key::unarchive(ar)?, container: Key::unarchive(ar)? })
    }
}

impl Archive for TopologyStream {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.key.archive(ar) + self.tail.archive(ar) + self.head.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { key: Key::unarchive(ar)?, tail: Key::unarchive(ar)?, head: Key::unarchive(ar)? })
    }
}

impl Archive for TopologyContainer {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.key.archive(ar) + self.resource.archive(ar) + self.configs.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            key: Key::unarchive(ar)?,
            resource: Resource::unarchive(ar)?,
            configs: HashMap::unarchive(ar)?,
        })
    }
}

impl Archive for Topology {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.graph.archive(ar)
            + self.topology.archive(ar)
            + self.vertices.archive(ar)
            + self.streams.archive(ar)
            + self.containers.archive(ar)
            + self.runtime.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            graph: Key::unarchive(ar)?,
            topology: Key::unarchive(ar)?,
            vertices: HashMap::unarchive(ar)?,
            streams: HashMap::unarchive(ar)?,
            containers: HashMap::unarchive(ar)?,
            runtime: Runtime::unarchive(ar)?,
        })
    }
}
