// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::ops::{AddAssign, SubAssign};

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;

const GIB: u64 = 1 << 30;

/// What one agent host offers, or what one container requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub host: String,
    pub num_cpus: u64,
    pub memory_limit_in_bytes: u64,
    pub space_limit_in_bytes: u64,
}

impl Resource {
    /// Probe the calling host. CPU count comes from the runtime; memory
    /// and scratch space are read best-effort and default to 1 GiB when
    /// the host will not say.
    pub fn probe(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            num_cpus: std::thread::available_parallelism().map(|n| n.get() as u64).unwrap_or(1),
            memory_limit_in_bytes: probe_memory().unwrap_or(GIB),
            space_limit_in_bytes: probe_space().unwrap_or(GIB),
        }
    }

    /// Whether this pool can hold `request` in every dimension.
    pub fn dominates(&self, request: &Resource) -> bool {
        self.num_cpus >= request.num_cpus
            && self.memory_limit_in_bytes >= request.memory_limit_in_bytes
            && self.space_limit_in_bytes >= request.space_limit_in_bytes
    }
}

impl AddAssign<&Resource> for Resource {
    fn add_assign(&mut self, rhs: &Resource) {
        self.num_cpus += rhs.num_cpus;
        self.memory_limit_in_bytes += rhs.memory_limit_in_bytes;
        self.space_limit_in_bytes += rhs.space_limit_in_bytes;
    }
}

impl SubAssign<&Resource> for Resource {
    fn sub_assign(&mut self, rhs: &Resource) {
        self.num_cpus = self.num_cpus.saturating_sub(rhs.num_cpus);
        self.memory_limit_in_bytes = self.memory_limit_in_bytes.saturating_sub(rhs.memory_limit_in_bytes);
        self.space_limit_in_bytes = self.space_limit_in_bytes.saturating_sub(rhs.space_limit_in_bytes);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[host:{}|cpu:{}|memory:{}|space:{}]",
            self.host, self.num_cpus, self.memory_limit_in_bytes, self.space_limit_in_bytes
        )
    }
}

impl Archive for Resource {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.host.archive(ar)
            + self.num_cpus.archive(ar)
            + self.memory_limit_in_bytes.archive(ar)
            + self.space_limit_in_bytes.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            host: String::unarchive(ar)?,
            num_cpus: u64::unarchive(ar)?,
            memory_limit_in_bytes: u64::unarchive(ar)?,
            space_limit_in_bytes: u64::unarchive(ar)?,
        })
    }
}

fn probe_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

fn probe_space() -> Option<u64> {
    let tmp = std::ffi::CString::new(std::env::temp_dir().to_string_lossy().into_owned()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(tmp.as_ptr(), &mut stat) } != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}
