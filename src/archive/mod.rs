// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Recursive binary encoding of structured values over byte buffers.
//!
//! The encoding is compact and **not** self-describing: reader and writer
//! must agree on the type at every position of the stream. Integers and
//! floats are fixed-width little-endian; sequences carry a `u64` element
//! count; optionals carry one presence byte; tagged unions carry one index
//! byte. [`Archive`] is implemented once per supported type family, and
//! wire messages implement it by recursing over their fields.
//!
//! An archiver holds the stream buffer's region lock for its entire
//! lifetime, so one top-level encode or decode is atomic with respect to
//! every other archiver sharing the buffer.
//!
//! For byte-oriented transports, the [`packager`] adds a length prefix so
//! readers can detect frame boundaries; see [`InputPackager`].

mod impls;
mod matrix;
mod packager;

#[cfg(test)]
mod round_trip_tests;

pub use matrix::Matrix;
pub use packager::{InputPackager, OutputPackager, LENGTH_PREFIX};

use std::sync::MutexGuard;

use crate::errors::ArchiveError;
use crate::transport::{InputStreamBuffer, OutputStreamBuffer, Region};

/// Upper bound on any archived sequence length; a peer announcing more is
/// treated as protocol corruption rather than an allocation request.
pub const MAX_SEQUENCE: u64 = 1 << 30;

/// A value that can be written to and rebuilt from the binary archive.
pub trait Archive: Sized {
    /// Append the encoded form, returning the number of bytes written.
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize;

    /// Rebuild a value, consuming exactly the bytes `archive` wrote.
    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError>;
}

// ------------------------------------------------------------------------------------------------

/// Encoding half: locks an [`OutputStreamBuffer`] and appends raw bytes.
pub struct OutputArchiver<'a> {
    pub(crate) region: MutexGuard<'a, Region>,
}

impl<'a> OutputArchiver<'a> {
    pub fn new(osbuf: &'a OutputStreamBuffer) -> Self {
        Self { region: osbuf.lock() }
    }

    /// Append raw bytes verbatim.
    pub fn put(&mut self, bytes: &[u8]) -> usize {
        self.region.write_bytes(bytes)
    }

    /// Encode one value.
    pub fn archive<T: Archive>(&mut self, value: &T) -> usize {
        value.archive(self)
    }

    /// Encode a sequence size tag.
    pub fn put_size(&mut self, n: usize) -> usize {
        self.put(&(n as u64).to_le_bytes())
    }
}

/// Decoding half: locks an [`InputStreamBuffer`] and consumes raw bytes.
pub struct InputArchiver<'a> {
    pub(crate) region: MutexGuard<'a, Region>,
}

impl<'a> InputArchiver<'a> {
    pub fn new(isbuf: &'a InputStreamBuffer) -> Self {
        Self { region: isbuf.lock() }
    }

    /// Consume exactly `out.len()` bytes or fail without a partial fill.
    pub fn take(&mut self, out: &mut [u8]) -> Result<(), ArchiveError> {
        let available = self.region.available();
        self.region
            .read_bytes(out)
            .map(|_| ())
            .ok_or(ArchiveError::Underflow { needed: out.len(), available })
    }

    /// Decode one value.
    pub fn unarchive<T: Archive>(&mut self) -> Result<T, ArchiveError> {
        T::unarchive(self)
    }

    /// Decode a sequence size tag, bounds-checked against [`MAX_SEQUENCE`].
    pub fn take_size(&mut self) -> Result<usize, ArchiveError> {
        let mut raw = [0u8; 8];
        self.take(&mut raw)?;
        let n = u64::from_le_bytes(raw);
        if n > MAX_SEQUENCE {
            return Err(ArchiveError::OversizedSequence { size: n, limit: MAX_SEQUENCE });
        }
        Ok(n as usize)
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.region.available()
    }
}

// ------------------------------------------------------------------------------------------------

/// Category half of an archived error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCategory {
    Generic = 0,
    System = 1,
    IoStream = 2,
    Future = 3,
}

/// A portable `(value, category)` error-code pair, the archived form of a
/// device or protocol failure traveling inside a `BrokenIO` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub value: i32,
    pub category: ErrorCategory,
}

impl ErrorCode {
    pub fn system(value: i32) -> Self {
        Self { value, category: ErrorCategory::System }
    }

    pub fn iostream(value: i32) -> Self {
        Self { value, category: ErrorCategory::IoStream }
    }

    /// End-of-stream marker the channels use when a peer hangs up cleanly.
    pub fn eof() -> Self {
        Self { value: 0, category: ErrorCategory::IoStream }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        Self::system(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let category = match self.category {
            ErrorCategory::Generic => "generic",
            ErrorCategory::System => "system",
            ErrorCategory::IoStream => "iostream",
            ErrorCategory::Future => "future",
        };
        write!(f, "{}:{}", category, self.value)
    }
}

impl Archive for ErrorCode {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.value.archive(ar) + ar.put(&[self.category as u8])
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let value = i32::unarchive(ar)?;
        let mut tag = [0u8; 1];
        ar.take(&mut tag)?;
        let category = match tag[0] {
            0 => ErrorCategory::Generic,
            1 => ErrorCategory::System,
            2 => ErrorCategory::IoStream,
            3 => ErrorCategory::Future,
            index => return Err(ArchiveError::UnknownVariant { index, what: "ErrorCategory" }),
        };
        Ok(Self { value, category })
    }
}
