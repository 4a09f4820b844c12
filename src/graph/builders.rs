// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Builder handles returned by [`Graph`]'s composition methods.
//!
//! A builder is a thin view over the graph plus the component key; every
//! chained call pushes one deferred build task. Builders are consumed by
//! value so a chain reads as one declaration.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Signal;
use crate::graph::vertex::{IstreamFn, OstreamFn, ProberFn, VertexFn};
use crate::graph::{Graph, InputStream, Key, OutputStream, Vertex};
use crate::proto::Topology;

/// Whether a task applies to the local definition maps for `key`-ish
/// component checks: always in local mode, and in per-container mode only
/// when the fragment carries the component.
fn applies_vertex(tpg: &Option<&mut Topology>, key: Key) -> bool {
    match tpg {
        None => true,
        Some(t) => !t.is_whole() && t.has_vertex(key),
    }
}

fn applies_stream(tpg: &Option<&mut Topology>, key: Key) -> bool {
    match tpg {
        None => true,
        Some(t) => !t.is_whole() && t.has_stream(key),
    }
}

// ------------------------------------------------------------------------------------------------

pub struct VertexBuilder<'g> {
    graph: &'g mut Graph,
    key: Key,
}

impl<'g> VertexBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, key: Key) -> Self {
        Self { graph, key }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Callback run once when the vertex enters execution.
    pub fn on(self, c: impl Fn(&Vertex) + Send + Sync + 'static) -> Self {
        let key = self.key;
        let c: VertexFn = Arc::new(c);
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, key) {
                if let Some(v) = core.vertices.get_mut(&key) {
                    v.on = Some(c);
                }
            }
            Ok(())
        }));
        self
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        let key = self.key;
        let tag = tag.into();
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, key) {
                if let Some(v) = core.vertices.get_mut(&key) {
                    v.tag = Some(tag);
                }
            }
            Ok(())
        }));
        self
    }

    /// Stand an external program in for this vertex; the executor spawns
    /// it and bridges the vertex's streams into its environment.
    pub fn program(self, cmd: impl Into<String>) -> Self {
        let key = self.key;
        let cmd = cmd.into();
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, key) {
                if let Some(v) = core.vertices.get_mut(&key) {
                    v.program = Some(cmd);
                }
            }
            Ok(())
        }));
        self
    }
}

// ------------------------------------------------------------------------------------------------

pub struct StreamBuilder<'g> {
    graph: &'g mut Graph,
    key: Key,
    tail: Key,
    head: Key,
}

impl<'g> StreamBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, key: Key, tail: Key, head: Key) -> Self {
        Self { graph, key, tail, head }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn tail(&self) -> Key {
        self.tail
    }

    pub fn head(&self) -> Key {
        self.head
    }

    /// Consumer-side callback, run whenever input lands (or the stream
    /// ends).
    pub fn on_istream(
        self,
        c: impl Fn(&Vertex, &InputStream) -> Signal + Send + Sync + 'static,
    ) -> Self {
        let key = self.key;
        let c: IstreamFn = Arc::new(c);
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_stream(&tpg, key) {
                if let Some(s) = core.streams.get_mut(&key) {
                    s.on_istream = Some(c);
                }
            }
            Ok(())
        }));
        self
    }

    /// Producer-side callback, run when the stream first becomes
    /// writable and on every later writability wakeup.
    pub fn on_ostream(
        self,
        c: impl Fn(&Vertex, &OutputStream) -> Signal + Send + Sync + 'static,
    ) -> Self {
        let key = self.key;
        let c: OstreamFn = Arc::new(c);
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_stream(&tpg, key) {
                if let Some(s) = core.streams.get_mut(&key) {
                    s.on_ostream = Some(c);
                }
            }
            Ok(())
        }));
        self
    }

    /// A critical stream takes the whole executor down when it fails.
    pub fn critical(self, flag: bool) -> Self {
        let key = self.key;
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_stream(&tpg, key) {
                if let Some(s) = core.streams.get_mut(&key) {
                    s.critical = flag;
                }
            }
            Ok(())
        }));
        self
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        let key = self.key;
        let tag = tag.into();
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_stream(&tpg, key) {
                if let Some(s) = core.streams.get_mut(&key) {
                    s.tag = Some(tag);
                }
            }
            Ok(())
        }));
        self
    }
}

// ------------------------------------------------------------------------------------------------

pub struct ContainerBuilder<'g> {
    graph: &'g mut Graph,
    key: Key,
}

impl<'g> ContainerBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, key: Key) -> Self {
        Self { graph, key }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Place a vertex into this container.
    pub fn add(self, vertex: Key) -> Self {
        let container = self.key;
        self.graph.tasks.push(Box::new(move |_, tpg| {
            if let Some(t) = tpg {
                if t.is_whole() {
                    if let Some(v) = t.vertices.get_mut(&vertex) {
                        v.container = container;
                    }
                }
            }
            Ok(())
        }));
        self
    }

    pub fn cpu(self, num_cpus: u64) -> Self {
        self.with_container(move |c| c.resource.num_cpus = num_cpus)
    }

    pub fn memory(self, bytes: u64) -> Self {
        self.with_container(move |c| c.resource.memory_limit_in_bytes = bytes)
    }

    pub fn space(self, bytes: u64) -> Self {
        self.with_container(move |c| c.resource.space_limit_in_bytes = bytes)
    }

    /// Hard placement requirement: only this host will do.
    pub fn host(self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.with_container(move |c| c.set_host(host))
    }

    /// Soft placement preference, used to break scheduling ties.
    pub fn preferred_hosts<I, S>(self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        self.with_container(move |c| {
            for host in &hosts {
                c.add_preferred_host(host);
            }
        })
    }

    fn with_container(
        self,
        f: impl FnOnce(&mut crate::proto::TopologyContainer) + Send + 'static,
    ) -> Self {
        let key = self.key;
        self.graph.tasks.push(Box::new(move |_, tpg| {
            if let Some(t) = tpg {
                if t.is_whole() {
                    if let Some(c) = t.containers.get_mut(&key) {
                        f(c);
                    }
                }
            }
            Ok(())
        }));
        self
    }
}

// ------------------------------------------------------------------------------------------------

pub struct ProberBuilder<'g> {
    graph: &'g mut Graph,
    vertex: Key,
}

impl<'g> ProberBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, vertex: Key) -> Self {
        Self { graph, vertex }
    }

    pub fn vertex(&self) -> Key {
        self.vertex
    }

    /// Tick callback; return [`Signal::Remove`] to retire the prober.
    pub fn on(self, c: impl Fn(&Vertex) -> Signal + Send + Sync + 'static) -> Self {
        let vertex = self.vertex;
        let c: ProberFn = Arc::new(c);
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, vertex) {
                if let Some(p) = core.probers.get_mut(&vertex) {
                    p.on = Some(c);
                }
            }
            Ok(())
        }));
        self
    }

    pub fn period(self, period: Duration) -> Self {
        let vertex = self.vertex;
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, vertex) {
                if let Some(p) = core.probers.get_mut(&vertex) {
                    p.period = Some(period);
                }
            }
            Ok(())
        }));
        self
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        let vertex = self.vertex;
        let tag = tag.into();
        self.graph.tasks.push(Box::new(move |core, tpg| {
            if applies_vertex(&tpg, vertex) {
                if let Some(p) = core.probers.get_mut(&vertex) {
                    p.tag = Some(tag);
                }
            }
            Ok(())
        }));
        self
    }
}

// ------------------------------------------------------------------------------------------------

/// A dangling stream endpoint used to compose builders before both sides
/// exist. Streams routed through a placeholder record their keys on it so
/// later wiring can reference "whatever landed on this port".
#[derive(Debug, Default)]
pub struct PlaceHolder {
    tail: Option<Key>,
    head: Option<Key>,
    keys: Vec<Key>,
}

impl PlaceHolder {
    /// A placeholder whose tail port is bound; streams leave from it.
    pub fn from_tail(tail: Key) -> Self {
        Self { tail: Some(tail), head: None, keys: Vec::new() }
    }

    /// A placeholder whose head port is bound; streams arrive into it.
    pub fn into_head(head: Key) -> Self {
        Self { tail: None, head: Some(head), keys: Vec::new() }
    }

    pub fn tail(&self) -> Option<Key> {
        self.tail
    }

    pub fn head(&self) -> Option<Key> {
        self.head
    }

    /// Keys of every stream routed through this placeholder, in creation
    /// order.
    pub fn stream_keys(&self) -> &[Key] {
        &self.keys
    }

    pub(crate) fn record(&mut self, key: Key) {
        self.keys.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GraphError;
    use crate::proto::{TopologyStream, TopologyVertex, WHOLE};

    #[test]
    fn local_make_materializes_definitions() {
        let mut g = Graph::new();
        let a = g.vertex().tag("source").key();
        let b = g.vertex().key();
        let s = g.stream(a, b).critical(true).tag("pipe").key();
        g.prober(a).period(Duration::from_millis(100)).on(|_| Signal::Remove);

        g.make(None).unwrap();

        assert_eq!(g.num_vertices(), 2);
        assert_eq!(g.num_streams(), 1);
        assert_eq!(g.core.vertices[&a].tag.as_deref(), Some("source"));
        let stream = &g.core.streams[&s];
        assert_eq!((stream.tail, stream.head), (a, b));
        assert!(stream.critical);
        assert_eq!(stream.tag.as_deref(), Some("pipe"));
        let prober = &g.core.probers[&a];
        assert_eq!(prober.period, Some(Duration::from_millis(100)));
        assert!(prober.on.is_some());
    }

    #[test]
    fn submit_make_writes_key_descriptors_only() {
        let mut g = Graph::new();
        let a = g.vertex().on(|_| panic!("callback must not run in submit mode")).key();
        let b = g.vertex().key();
        let s = g.stream(a, b).key();
        let c = g.container().add(a).cpu(3).memory(1 << 20).host("n1").key();
        g.container().add(b).preferred_hosts(["n2", "n3"]).key();

        let tpg = g.topologize().unwrap();

        // Nothing materialized locally; everything went to the topology.
        assert_eq!(g.num_vertices(), 0);
        assert!(tpg.is_whole());
        assert_eq!(tpg.vertices[&a].container, c);
        assert!(tpg.has_stream(s));
        assert_eq!(tpg.containers.len(), 2);
        assert_eq!(tpg.containers[&c].resource.num_cpus, 3);
        assert_eq!(tpg.containers[&c].host(), Some("n1"));

        // Defaults filled where the user said nothing.
        for container in tpg.containers.values() {
            assert!(container.resource.num_cpus >= 1);
            assert!(container.resource.memory_limit_in_bytes > 0);
            assert!(container.resource.space_limit_in_bytes > 0);
        }
    }

    #[test]
    fn unplaced_vertices_coalesce_into_a_synthetic_container() {
        let mut g = Graph::new();
        let a = g.vertex().key();
        let b = g.vertex().key();
        g.stream(a, b).key();

        let tpg = g.topologize().unwrap();

        assert_eq!(tpg.containers.len(), 1);
        let ckey = *tpg.containers.keys().next().unwrap();
        assert!(tpg.vertices.values().all(|v| v.container == ckey));
    }

    #[test]
    fn per_container_make_keeps_only_the_fragment() {
        let mut g = Graph::new();
        let a = g.vertex().tag("a").key();
        let b = g.vertex().tag("b").key();
        let intra_peer = g.vertex().key();
        let inter = g.stream(a, b).key();
        let intra = g.stream(b, intra_peer).key();

        // The whole-form topology the master would have built.
        let c1 = 1000;
        let c2 = 2000;
        let mut whole = Topology::new(9, WHOLE);
        for (v, c) in [(a, c1), (b, c2), (intra_peer, c2)] {
            whole.vertices.insert(v, TopologyVertex { key: v, container: c });
        }
        whole.streams.insert(inter, TopologyStream { key: inter, tail: a, head: b });
        whole.streams.insert(intra, TopologyStream { key: intra, tail: b, head: intra_peer });

        let mut fragment = whole.extract(c2);
        g.make(Some(&mut fragment)).unwrap();

        assert_eq!(g.task_id(), Some(fragment.task_id()));
        assert!(!g.core.vertices.contains_key(&a));
        assert!(g.core.vertices.contains_key(&b));
        assert_eq!(g.core.vertices[&b].tag.as_deref(), Some("b"));
        // Both streams touch c2: the inter one and the intra one.
        assert!(g.core.streams.contains_key(&inter));
        assert!(g.core.streams.contains_key(&intra));
    }

    #[test]
    fn placeholders_record_routed_streams() {
        let mut g = Graph::new();
        let hub = g.vertex().key();
        let left = g.vertex().key();
        let right = g.vertex().key();

        let mut port = PlaceHolder::from_tail(hub);
        let s1 = g.stream_from(&mut port, left).unwrap().key();
        let s2 = g.stream_from(&mut port, right).unwrap().key();

        assert_eq!(port.stream_keys(), &[s1, s2]);
        assert!(g.stream_into(left, &mut port).is_err());
    }

    #[test]
    fn prober_on_unknown_vertex_fails_at_make() {
        let mut g = Graph::new();
        g.prober(424242).period(Duration::from_secs(1));
        assert_eq!(g.make(None), Err(GraphError::UnknownVertex { vertex: 424242 }));
    }
}
