// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::archive::Archive;
use crate::engine::Signal;
use crate::graph::stream::{InputStream, OutputStream};
use crate::graph::Key;

/// Callback run once when a vertex enters execution.
pub type VertexFn = Arc<dyn Fn(&Vertex) + Send + Sync>;

/// Periodic prober callback attached to a vertex.
pub type ProberFn = Arc<dyn Fn(&Vertex) -> Signal + Send + Sync>;

/// Consumer-side stream callback: the head vertex and its input stream.
pub type IstreamFn = Arc<dyn Fn(&Vertex, &InputStream) -> Signal + Send + Sync>;

/// Producer-side stream callback: the tail vertex and its output stream.
pub type OstreamFn = Arc<dyn Fn(&Vertex, &OutputStream) -> Signal + Send + Sync>;

/// A materialized vertex. Shared between the executor (which wires its
/// streams in) and worker-side callbacks (which write through them), so
/// the stream tables sit behind a lock.
pub struct Vertex {
    key: Key,
    tag: Option<String>,
    program: Option<String>,
    ostreams: Mutex<HashMap<Key, OutputStream>>,
    istreams: Mutex<Vec<Key>>,
}

impl Vertex {
    pub(crate) fn new(key: Key, tag: Option<String>, program: Option<String>) -> Self {
        Self {
            key,
            tag,
            program,
            ostreams: Mutex::new(HashMap::new()),
            istreams: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// External program standing in for this vertex, if any.
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// The output stream with key `key`, if this vertex is its tail.
    pub fn ostream(&self, key: Key) -> Option<OutputStream> {
        self.ostreams.lock().unwrap().get(&key).cloned()
    }

    /// Keys of every output stream leaving this vertex.
    pub fn ostream_keys(&self) -> Vec<Key> {
        self.ostreams.lock().unwrap().keys().copied().collect()
    }

    /// Keys of every input stream entering this vertex.
    pub fn istream_keys(&self) -> Vec<Key> {
        self.istreams.lock().unwrap().clone()
    }

    /// Send one value down every output stream.
    pub fn broadcast<T: Archive>(&self, value: &T) {
        for ostream in self.ostreams.lock().unwrap().values() {
            ostream.send(value);
        }
    }

    pub(crate) fn attach_ostream(&self, ostream: OutputStream) {
        self.ostreams.lock().unwrap().insert(ostream.key(), ostream);
    }

    pub(crate) fn attach_istream(&self, key: Key) {
        self.istreams.lock().unwrap().push(key);
    }

    pub(crate) fn detach_ostream(&self, key: Key) {
        self.ostreams.lock().unwrap().remove(&key);
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("key", &self.key)
            .field("tag", &self.tag)
            .field("program", &self.program)
            .finish()
    }
}
