// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Growable byte buffers sitting between a device and the archive layer.
//!
//! An [`OutputStreamBuffer`] accumulates encoded bytes until the owning
//! write event can push them into the device; an [`InputStreamBuffer`]
//! accumulates raw device bytes until the archive layer can decode whole
//! values out of them. Both are internally locked so that concurrent
//! archivers interleave at message granularity, never mid-value: the
//! archiver holds the region guard for an entire top-level call.
//!
//! The region keeps live bytes in a contiguous tail. A dead prefix is
//! reclaimed once it grows past half the capacity; otherwise the region
//! grows geometrically, which preserves amortized O(1) writes.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transport::Device;

/// How many bytes one device-level `sync` attempts to read at a time.
const SYNC_READ_CHUNK: usize = 16 * 1024;

/// Contiguous region with a movable consumed-prefix marker.
#[derive(Default)]
pub(crate) struct Region {
    data: Vec<u8>,
    base: usize,
}

impl Region {
    fn avail(&self) -> usize {
        self.data.len() - self.base
    }

    fn live(&self) -> &[u8] {
        &self.data[self.base..]
    }

    fn push(&mut self, bytes: &[u8]) {
        self.reclaim();
        self.data.extend_from_slice(bytes);
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.avail());
        self.base += n;
        if self.base == self.data.len() {
            self.data.clear();
            self.base = 0;
        }
    }

    // Reuse the dead prefix once it dominates the region.
    fn reclaim(&mut self) {
        if self.base > 0 && self.base * 2 > self.data.capacity() {
            self.data.drain(..self.base);
            self.base = 0;
        }
    }
}

// ------------------------------------------------------------------------------------------------

/// Byte sink between archivers and a device.
#[derive(Default)]
pub struct OutputStreamBuffer {
    region: Mutex<Region>,
    device: Mutex<Option<Arc<Device>>>,
}

impl OutputStreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: Arc<Device>) -> Self {
        Self {
            region: Mutex::new(Region::default()),
            device: Mutex::new(Some(device)),
        }
    }

    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.lock().unwrap().clone()
    }

    pub fn set_device(&self, device: Arc<Device>) {
        *self.device.lock().unwrap() = Some(device);
    }

    /// Bytes queued and not yet synced into the device.
    pub fn out_avail(&self) -> usize {
        self.region.lock().unwrap().avail()
    }

    /// Append `bytes` behind any queued output.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.region.lock().unwrap().push(bytes);
        bytes.len()
    }

    /// Non-destructive copy of up to `out.len()` queued bytes.
    pub fn copy(&self, out: &mut [u8]) -> usize {
        let region = self.region.lock().unwrap();
        let n = region.avail().min(out.len());
        out[..n].copy_from_slice(&region.live()[..n]);
        n
    }

    /// One device-level write attempt. `Ok(0)` means the device would
    /// block (or there was nothing to write); a real device error is `Err`.
    pub fn sync(&self) -> io::Result<usize> {
        let mut region = self.region.lock().unwrap();
        self.sync_locked(&mut region)
    }

    /// Drive `sync` until the region is empty, the device would block, or
    /// the device reports an error. Returns the total number of bytes moved.
    pub fn flush(&self) -> io::Result<usize> {
        let mut region = self.region.lock().unwrap();
        let mut total = 0;
        while region.avail() > 0 {
            match self.sync_locked(&mut region)? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn sync_locked(&self, region: &mut Region) -> io::Result<usize> {
        if region.avail() == 0 {
            return Ok(0);
        }
        let device = match self.device() {
            Some(d) => d,
            None => return Ok(0),
        };
        match device.try_write(region.live()) {
            Ok(n) => {
                region.consume(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Region> {
        self.region.lock().unwrap()
    }
}

// ------------------------------------------------------------------------------------------------

/// Byte source between a device and archivers.
#[derive(Default)]
pub struct InputStreamBuffer {
    region: Mutex<Region>,
    device: Mutex<Option<Arc<Device>>>,
}

impl InputStreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: Arc<Device>) -> Self {
        Self {
            region: Mutex::new(Region::default()),
            device: Mutex::new(Some(device)),
        }
    }

    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.lock().unwrap().clone()
    }

    pub fn set_device(&self, device: Arc<Device>) {
        *self.device.lock().unwrap() = Some(device);
    }

    /// Bytes received and not yet consumed.
    pub fn in_avail(&self) -> usize {
        self.region.lock().unwrap().avail()
    }

    /// Destructive read of up to `out.len()` bytes.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut region = self.region.lock().unwrap();
        let n = region.avail().min(out.len());
        out[..n].copy_from_slice(&region.live()[..n]);
        region.consume(n);
        n
    }

    /// Non-destructive peek of up to `out.len()` bytes.
    pub fn copy(&self, out: &mut [u8]) -> usize {
        let region = self.region.lock().unwrap();
        let n = region.avail().min(out.len());
        out[..n].copy_from_slice(&region.live()[..n]);
        n
    }

    /// Advance past `n` bytes without copying them out.
    pub fn drop_front(&self, n: usize) -> usize {
        let mut region = self.region.lock().unwrap();
        let n = region.avail().min(n);
        region.consume(n);
        n
    }

    /// Inject bytes directly, bypassing the device. Test seams and the
    /// output-to-input handoff use this.
    pub fn feed(&self, bytes: &[u8]) {
        self.region.lock().unwrap().push(bytes);
    }

    /// One device-level read attempt appended behind any buffered input.
    ///
    /// `Ok(n)` for `n > 0` is fresh data; `Ok(0)` is end-of-stream.
    /// A device that would block surfaces as `ErrorKind::WouldBlock`.
    pub fn sync(&self) -> io::Result<usize> {
        let device = match self.device() {
            Some(d) => d,
            None => return Ok(0),
        };
        let mut chunk = [0u8; SYNC_READ_CHUNK];
        let n = device.try_read(&mut chunk)?;
        if n > 0 {
            self.region.lock().unwrap().push(&chunk[..n]);
        }
        Ok(n)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Region> {
        self.region.lock().unwrap()
    }
}

/// The canonical way to hand a fully assembled output frame to a reader,
/// used heavily by the codec tests.
impl From<OutputStreamBuffer> for InputStreamBuffer {
    fn from(osbuf: OutputStreamBuffer) -> Self {
        let isbuf = InputStreamBuffer::new();
        let region = osbuf.region.lock().unwrap();
        isbuf.feed(region.live());
        drop(region);
        isbuf
    }
}

// ------------------------------------------------------------------------------------------------
// Region access for the archive layer. Reads and writes that go through an
// already-held guard bypass the per-call lock, which is what lets one
// archiver call stay atomic.

impl Region {
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.push(bytes);
        bytes.len()
    }

    pub(crate) fn read_bytes(&mut self, out: &mut [u8]) -> Option<usize> {
        if self.avail() < out.len() {
            return None;
        }
        out.copy_from_slice(&self.live()[..out.len()]);
        self.consume(out.len());
        Some(out.len())
    }

    pub(crate) fn peek_bytes(&self, out: &mut [u8]) -> Option<usize> {
        if self.avail() < out.len() {
            return None;
        }
        out.copy_from_slice(&self.live()[..out.len()]);
        Some(out.len())
    }

    pub(crate) fn available(&self) -> usize {
        self.avail()
    }

    /// Patch bytes at `offset` from the start of the live span. The
    /// packager back-fills frame lengths through this.
    pub(crate) fn patch(&mut self, offset: usize, bytes: &[u8]) {
        let at = self.base + offset;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let osbuf = OutputStreamBuffer::new();
        assert_eq!(osbuf.write(b"hello "), 6);
        assert_eq!(osbuf.write(b"world"), 5);
        assert_eq!(osbuf.out_avail(), 11);

        let isbuf = InputStreamBuffer::from(osbuf);
        assert_eq!(isbuf.in_avail(), 11);

        let mut out = [0u8; 11];
        assert_eq!(isbuf.read(&mut out), 11);
        assert_eq!(&out, b"hello world");
        assert_eq!(isbuf.in_avail(), 0);
    }

    #[test]
    fn copy_is_non_destructive() {
        let isbuf = InputStreamBuffer::new();
        isbuf.feed(b"abcdef");

        let mut peek = [0u8; 3];
        assert_eq!(isbuf.copy(&mut peek), 3);
        assert_eq!(&peek, b"abc");
        assert_eq!(isbuf.in_avail(), 6);

        assert_eq!(isbuf.drop_front(2), 2);
        let mut rest = [0u8; 4];
        assert_eq!(isbuf.read(&mut rest), 4);
        assert_eq!(&rest, b"cdef");
    }

    #[test]
    fn drop_front_is_clamped() {
        let isbuf = InputStreamBuffer::new();
        isbuf.feed(b"xy");
        assert_eq!(isbuf.drop_front(10), 2);
        assert_eq!(isbuf.in_avail(), 0);
    }

    #[test]
    fn region_reclaims_dead_prefix() {
        let mut region = Region::default();
        region.push(&[7u8; 1024]);
        region.consume(1000);
        // The next push compacts; live bytes must survive the move.
        region.push(b"tail");
        assert_eq!(region.avail(), 24 + 4);
        let mut head = [0u8; 24];
        assert_eq!(region.read_bytes(&mut head), Some(24));
        assert_eq!(head, [7u8; 24]);
    }

    #[test]
    fn sync_without_device_is_a_no_op() {
        let osbuf = OutputStreamBuffer::new();
        osbuf.write(b"data");
        assert_eq!(osbuf.sync().unwrap(), 0);
        assert_eq!(osbuf.flush().unwrap(), 0);
        assert_eq!(osbuf.out_avail(), 4);
    }
}
