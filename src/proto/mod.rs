// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Control-plane wire messages.
//!
//! Everything between master, agent, executor, and submitter travels as a
//! packager-framed [`Protobuf`] union. The one exception is the
//! [`FrontierPacket`]: the first bytes on a brand-new frontier socket,
//! fixed-layout and unframed, because the receiving agent must identify
//! the stream before any channel machinery exists for it.

mod resource;
mod runtime;
mod task;
mod topology;

pub use resource::Resource;
pub use runtime::{
    ExecutionMode, Runtime, ENV_AGENT_LISTENER_PORT, ENV_BRIDGES, ENV_EXECUTION_MODE,
    ENV_FRONTIERS, ENV_FRONTIER_LISTENER_PORT, ENV_GRAPH_LISTENER_PORT, ENV_MASTER_HOST,
    ENV_PROGRAM, ENV_SHELL_LISTENER_PORT, ENV_STDERR_FD, ENV_STDERR_LISTENER_PORT, ENV_STDOUT_FD,
    ENV_STDOUT_LISTENER_PORT, ENV_SUBMIT_ARGV, ENV_SUBMIT_FILE, ENV_THIS_HOST, ENV_TOPOLOGY_FD,
    ENV_VERTEX_HOSTS, ENV_WEBUI_LISTENER_PORT,
};
pub use task::{KillTask, Solution, TaskId, TaskInfo};
pub use topology::{
    Side, Topology, TopologyContainer, TopologyStream, TopologyVertex, WHOLE,
};

use crate::archive::{Archive, ErrorCode, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;
use crate::graph::Key;

/// A device or protocol failure crossing a channel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokenIo {
    pub errc: ErrorCode,
}

impl BrokenIo {
    pub fn new(errc: ErrorCode) -> Self {
        Self { errc }
    }
}

impl Archive for BrokenIo {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.errc.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { errc: ErrorCode::unarchive(ar)? })
    }
}

/// The tagged union every control channel speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum Protobuf {
    Resource(Resource),
    Topology(Topology),
    TaskInfo(TaskInfo),
    KillTask(KillTask),
    Solution(Solution),
    BrokenIo(BrokenIo),
}

impl Protobuf {
    pub fn tag(&self) -> &'static str {
        match self {
            Protobuf::Resource(_) => "resource",
            Protobuf::Topology(_) => "topology",
            Protobuf::TaskInfo(_) => "taskinfo",
            Protobuf::KillTask(_) => "killtask",
            Protobuf::Solution(_) => "solution",
            Protobuf::BrokenIo(_) => "brokenio",
        }
    }
}

impl Archive for Protobuf {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        match self {
            Protobuf::Resource(m) => ar.put(&[0]) + m.archive(ar),
            Protobuf::Topology(m) => ar.put(&[1]) + m.archive(ar),
            Protobuf::TaskInfo(m) => ar.put(&[2]) + m.archive(ar),
            Protobuf::KillTask(m) => ar.put(&[3]) + m.archive(ar),
            Protobuf::Solution(m) => ar.put(&[4]) + m.archive(ar),
            Protobuf::BrokenIo(m) => ar.put(&[5]) + m.archive(ar),
        }
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let mut index = [0u8; 1];
        ar.take(&mut index)?;
        match index[0] {
            0 => Ok(Protobuf::Resource(Resource::unarchive(ar)?)),
            1 => Ok(Protobuf::Topology(Topology::unarchive(ar)?)),
            2 => Ok(Protobuf::TaskInfo(TaskInfo::unarchive(ar)?)),
            3 => Ok(Protobuf::KillTask(KillTask::unarchive(ar)?)),
            4 => Ok(Protobuf::Solution(Solution::unarchive(ar)?)),
            5 => Ok(Protobuf::BrokenIo(BrokenIo::unarchive(ar)?)),
            index => Err(ArchiveError::UnknownVariant { index, what: "Protobuf" }),
        }
    }
}

/// Fixed-layout identification header of a frontier socket: exactly
/// sixteen little-endian bytes, sent before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierPacket {
    pub graph: Key,
    pub stream: Key,
}

impl FrontierPacket {
    pub const WIRE_SIZE: usize = 16;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut raw = [0u8; Self::WIRE_SIZE];
        raw[..8].copy_from_slice(&self.graph.to_le_bytes());
        raw[8..].copy_from_slice(&self.stream.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            graph: Key::from_le_bytes(raw[..8].try_into().unwrap_or_else(|_| unreachable!())),
            stream: Key::from_le_bytes(raw[8..].try_into().unwrap_or_else(|_| unreachable!())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{InputPackager, OutputPackager};
    use crate::transport::{InputStreamBuffer, OutputStreamBuffer};

    #[test]
    fn protobuf_variants_round_trip_framed() {
        let messages = vec![
            Protobuf::Resource(Resource {
                host: "10.0.0.1".to_string(),
                num_cpus: 8,
                memory_limit_in_bytes: 1 << 33,
                space_limit_in_bytes: 1 << 34,
            }),
            Protobuf::TaskInfo(TaskInfo::new(TaskId::new(3, 7), "10.0.0.2", 0)),
            Protobuf::KillTask(KillTask { task_id: TaskId::new(1, 2) }),
            Protobuf::Solution(Solution::new(9)),
            Protobuf::BrokenIo(BrokenIo::new(ErrorCode::eof())),
        ];

        let osbuf = OutputStreamBuffer::new();
        for m in &messages {
            OutputPackager::new(&osbuf).pack(m);
        }

        let isbuf = InputStreamBuffer::from(osbuf);
        let mut decoded = Vec::new();
        while let Some(m) = InputPackager::new(&isbuf).unpack::<Protobuf>().unwrap() {
            decoded.push(m);
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn unknown_variant_is_a_protocol_error() {
        let osbuf = OutputStreamBuffer::new();
        OutputPackager::new(&osbuf).pack(&250u8);
        let isbuf = InputStreamBuffer::from(osbuf);
        let err = InputPackager::new(&isbuf).unpack::<Protobuf>().unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownVariant { index: 250, what: "Protobuf" }));
    }

    #[test]
    fn frontier_packet_is_exactly_sixteen_bytes() {
        let pkt = FrontierPacket { graph: -1, stream: 42 };
        let raw = pkt.to_bytes();
        assert_eq!(raw.len(), FrontierPacket::WIRE_SIZE);
        assert_eq!(FrontierPacket::from_bytes(&raw), pkt);
    }
}
