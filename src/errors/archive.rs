// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Decode-side failures of the binary archive layer.
//!
//! Encoding into a growable buffer cannot fail; every variant here is a
//! reader-side condition. A channel that hits one of these treats the
//! underlying device as broken, since the byte stream can no longer be
//! aligned with the agreed type schema.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArchiveError {
    /// The buffer ran out of bytes in the middle of a value.
    #[error("archive underflow: needed {needed} bytes, {available} available")]
    Underflow { needed: usize, available: usize },

    /// A tagged-union index byte did not name any variant.
    #[error("unknown variant index {index} for {what}")]
    UnknownVariant { index: u8, what: &'static str },

    /// A presence / pointer flag byte was neither 0 nor 1.
    #[error("invalid flag byte {byte:#04x} for {what}")]
    InvalidFlag { byte: u8, what: &'static str },

    /// A decoded string was not valid UTF-8.
    #[error("archived string is not valid UTF-8")]
    InvalidUtf8,

    /// A size prefix exceeds what a sane peer would send.
    #[error("archived size {size} exceeds limit {limit}")]
    OversizedSequence { size: u64, limit: u64 },

    /// A frame length prefix smaller than the prefix itself.
    #[error("corrupt frame length {length}")]
    CorruptFrame { length: i64 },
}
