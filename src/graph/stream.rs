// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Runtime faces of a stream, as vertex callbacks see them.
//!
//! User values travel packager-framed, so a reader always gets whole
//! values back: [`InputStream::recv`] returns `None` until the next value
//! has fully arrived. The sender side buffers and wakes the executor's
//! write event; `close` asks the executor to flush and release the
//! descriptor.

use std::sync::Arc;

use crate::archive::{Archive, InputPackager, OutputPackager};
use crate::errors::ArchiveError;
use crate::graph::Key;
use crate::transport::{InputStreamBuffer, OutputStreamBuffer};

/// Consumer face of a stream, handed to `on_istream` callbacks.
#[derive(Clone)]
pub struct InputStream {
    key: Key,
    isbuf: Arc<InputStreamBuffer>,
}

impl InputStream {
    pub(crate) fn new(key: Key, isbuf: Arc<InputStreamBuffer>) -> Self {
        Self { key, isbuf }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Pull the next whole value, or `None` until one has fully arrived.
    pub fn recv<T: Archive>(&self) -> Result<Option<T>, ArchiveError> {
        InputPackager::new(&self.isbuf).unpack::<T>()
    }

    /// Bytes buffered but not yet decoded.
    pub fn in_avail(&self) -> usize {
        self.isbuf.in_avail()
    }
}

/// Producer face of a stream, held by the tail vertex.
#[derive(Clone)]
pub struct OutputStream {
    key: Key,
    osbuf: Arc<OutputStreamBuffer>,
    kick: Arc<dyn Fn() + Send + Sync>,
    closer: Arc<dyn Fn() + Send + Sync>,
}

impl OutputStream {
    pub(crate) fn new(
        key: Key,
        osbuf: Arc<OutputStreamBuffer>,
        kick: Arc<dyn Fn() + Send + Sync>,
        closer: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self { key, osbuf, kick, closer }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// Queue one framed value and wake the write event.
    pub fn send<T: Archive>(&self, value: &T) -> usize {
        let n = OutputPackager::new(&self.osbuf).pack(value);
        (self.kick)();
        n
    }

    /// Bytes queued but not yet on the device.
    pub fn pending(&self) -> usize {
        self.osbuf.out_avail()
    }

    /// Ask the executor to drain this stream and release it. Buffered
    /// bytes are flushed first; the peer then observes end-of-stream.
    pub fn close(&self) {
        (self.closer)();
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("key", &self.key)
            .field("pending", &self.pending())
            .finish()
    }
}
