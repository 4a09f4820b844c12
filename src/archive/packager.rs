// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Length-prefixed framing over the archive layer.
//!
//! Every frame is `[length: i64][payload]`, where `length` counts the
//! prefix itself plus the payload. The writer emits a placeholder, encodes
//! the payload, then back-patches the real length; the reader refuses to
//! decode until the whole frame has arrived, which is what gives the
//! control plane message atomicity over partial TCP deliveries.

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;
use crate::transport::{InputStreamBuffer, OutputStreamBuffer};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX: usize = std::mem::size_of::<i64>();

/// Frame writer. One instance per message keeps the buffer lock scoped to
/// a single atomic frame.
pub struct OutputPackager<'a> {
    ar: OutputArchiver<'a>,
}

impl<'a> OutputPackager<'a> {
    pub fn new(osbuf: &'a OutputStreamBuffer) -> Self {
        Self { ar: OutputArchiver::new(osbuf) }
    }

    /// Append one framed value, returning the whole frame's size.
    pub fn pack<T: Archive>(&mut self, value: &T) -> usize {
        let patch_at = self.ar.region.available();
        self.ar.put(&0i64.to_le_bytes());
        let size = LENGTH_PREFIX + value.archive(&mut self.ar);
        self.ar.region.patch(patch_at, &(size as i64).to_le_bytes());
        size
    }
}

/// Frame reader. Decoding only begins once `in_avail` covers the prefix
/// and the full frame it announces.
pub struct InputPackager<'a> {
    ar: InputArchiver<'a>,
}

impl<'a> InputPackager<'a> {
    pub fn new(isbuf: &'a InputStreamBuffer) -> Self {
        Self { ar: InputArchiver::new(isbuf) }
    }

    /// Decode one framed value, or `Ok(None)` when the frame has not fully
    /// arrived yet (nothing is consumed in that case).
    pub fn unpack<T: Archive>(&mut self) -> Result<Option<T>, ArchiveError> {
        let available = self.ar.remaining();
        if available < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        let _ = self.ar.region.peek_bytes(&mut prefix);
        let length = i64::from_le_bytes(prefix);
        if length < LENGTH_PREFIX as i64 {
            return Err(ArchiveError::CorruptFrame { length });
        }
        if (available as i64) < length {
            return Ok(None);
        }

        self.ar.take(&mut prefix)?;
        Ok(Some(T::unarchive(&mut self.ar)?))
    }
}
