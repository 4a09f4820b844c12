// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The runtime map: the string-keyed contract between master, agent, and
//! executor processes.
//!
//! Structured fields travel as plain strings so the map can be injected
//! verbatim into a child's environment. Keyed accessors own the encoding
//! of each field; nothing else in the codebase touches the raw names.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;
use crate::graph::Key;

pub const ENV_EXECUTION_MODE: &str = "DTC_EXECUTION_MODE";
pub const ENV_THIS_HOST: &str = "DTC_THIS_HOST";
pub const ENV_MASTER_HOST: &str = "DTC_MASTER_HOST";
pub const ENV_AGENT_LISTENER_PORT: &str = "DTC_AGENT_LISTENER_PORT";
pub const ENV_GRAPH_LISTENER_PORT: &str = "DTC_GRAPH_LISTENER_PORT";
pub const ENV_SHELL_LISTENER_PORT: &str = "DTC_SHELL_LISTENER_PORT";
pub const ENV_WEBUI_LISTENER_PORT: &str = "DTC_WEBUI_LISTENER_PORT";
pub const ENV_FRONTIER_LISTENER_PORT: &str = "DTC_FRONTIER_LISTENER_PORT";
pub const ENV_STDOUT_LISTENER_PORT: &str = "DTC_STDOUT_LISTENER_PORT";
pub const ENV_STDERR_LISTENER_PORT: &str = "DTC_STDERR_LISTENER_PORT";
pub const ENV_STDOUT_FD: &str = "DTC_STDOUT_FD";
pub const ENV_STDERR_FD: &str = "DTC_STDERR_FD";
pub const ENV_TOPOLOGY_FD: &str = "DTC_TOPOLOGY_FD";
pub const ENV_VERTEX_HOSTS: &str = "DTC_VERTEX_HOSTS";
pub const ENV_FRONTIERS: &str = "DTC_FRONTIERS";
pub const ENV_BRIDGES: &str = "DTC_BRIDGES";
pub const ENV_SUBMIT_FILE: &str = "DTC_SUBMIT_FILE";
pub const ENV_SUBMIT_ARGV: &str = "DTC_SUBMIT_ARGV";
pub const ENV_PROGRAM: &str = "DTC_PROGRAM";

/// Where a process sits in the three-phase execution protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Local,
    Submit,
    Distributed,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Submit => "submit",
            ExecutionMode::Distributed => "distributed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ExecutionMode::Local),
            "submit" => Some(ExecutionMode::Submit),
            "distributed" => Some(ExecutionMode::Distributed),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-sensitive string map carried by every topology; doubles as the
/// child process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runtime {
    vars: BTreeMap<String, String>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every DTC_* variable of the calling process, the way a
    /// submitted topology inherits its submitter's environment.
    pub fn from_process_env() -> Self {
        let vars = std::env::vars().filter(|(k, _)| k.starts_with("DTC_")).collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The full map, for environment injection into a child.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ---- structured fields -------------------------------------------------

    pub fn execution_mode(&self) -> ExecutionMode {
        self.get(ENV_EXECUTION_MODE).and_then(ExecutionMode::parse).unwrap_or_default()
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.set(ENV_EXECUTION_MODE, mode.as_str());
    }

    pub fn this_host(&self) -> Option<&str> {
        self.get(ENV_THIS_HOST)
    }

    pub fn set_this_host(&mut self, host: impl Into<String>) {
        self.set(ENV_THIS_HOST, host.into());
    }

    pub fn program(&self) -> Option<&str> {
        self.get(ENV_PROGRAM)
    }

    pub fn set_program(&mut self, cmd: impl Into<String>) {
        self.set(ENV_PROGRAM, cmd.into());
    }

    pub fn submit_file(&self) -> Option<&str> {
        self.get(ENV_SUBMIT_FILE)
    }

    pub fn submit_argv(&self) -> Option<&str> {
        self.get(ENV_SUBMIT_ARGV)
    }

    pub fn topology_fd(&self) -> Option<i32> {
        self.get(ENV_TOPOLOGY_FD).and_then(|v| v.parse().ok())
    }

    pub fn set_topology_fd(&mut self, fd: i32) {
        self.set(ENV_TOPOLOGY_FD, fd.to_string());
    }

    pub fn stdout_fd(&self) -> Option<i32> {
        self.get(ENV_STDOUT_FD).and_then(|v| v.parse().ok())
    }

    pub fn set_stdout_fd(&mut self, fd: i32) {
        self.set(ENV_STDOUT_FD, fd.to_string());
    }

    pub fn stderr_fd(&self) -> Option<i32> {
        self.get(ENV_STDERR_FD).and_then(|v| v.parse().ok())
    }

    pub fn set_stderr_fd(&mut self, fd: i32) {
        self.set(ENV_STDERR_FD, fd.to_string());
    }

    pub fn stdout_listener_port(&self) -> Option<u16> {
        self.get(ENV_STDOUT_LISTENER_PORT).and_then(|v| v.parse().ok())
    }

    pub fn set_stdout_listener_port(&mut self, port: u16) {
        self.set(ENV_STDOUT_LISTENER_PORT, port.to_string());
    }

    pub fn stderr_listener_port(&self) -> Option<u16> {
        self.get(ENV_STDERR_LISTENER_PORT).and_then(|v| v.parse().ok())
    }

    pub fn set_stderr_listener_port(&mut self, port: u16) {
        self.set(ENV_STDERR_LISTENER_PORT, port.to_string());
    }

    /// `"k1 h1 k2 h2 ..."`: which host owns each vertex.
    pub fn vertex_hosts(&self) -> HashMap<Key, String> {
        let mut hosts = HashMap::new();
        if let Some(raw) = self.get(ENV_VERTEX_HOSTS) {
            let mut it = raw.split_whitespace();
            while let (Some(key), Some(host)) = (it.next(), it.next()) {
                if let Ok(key) = key.parse() {
                    hosts.insert(key, host.to_string());
                }
            }
        }
        hosts
    }

    pub fn set_vertex_hosts(&mut self, hosts: &HashMap<Key, String>) {
        self.set(ENV_VERTEX_HOSTS, encode_pairs(hosts.iter().map(|(k, h)| (*k, h.clone()))));
    }

    /// `"sk1 fd1 sk2 fd2 ..."`: inherited inter-stream descriptors.
    pub fn frontiers(&self) -> HashMap<Key, i32> {
        parse_key_fd_pairs(self.get(ENV_FRONTIERS))
    }

    pub fn set_frontiers(&mut self, frontiers: impl Iterator<Item = (Key, i32)>) {
        self.set(ENV_FRONTIERS, encode_pairs(frontiers));
    }

    /// `"sk1 fd1 ..."`: descriptors handed to a vertex program.
    pub fn bridges(&self) -> HashMap<Key, i32> {
        parse_key_fd_pairs(self.get(ENV_BRIDGES))
    }

    pub fn set_bridges(&mut self, bridges: impl Iterator<Item = (Key, i32)>) {
        self.set(ENV_BRIDGES, encode_pairs(bridges));
    }
}

fn parse_key_fd_pairs(raw: Option<&str>) -> HashMap<Key, i32> {
    let mut out = HashMap::new();
    if let Some(raw) = raw {
        let mut it = raw.split_whitespace();
        while let (Some(key), Some(fd)) = (it.next(), it.next()) {
            if let (Ok(key), Ok(fd)) = (key.parse(), fd.parse()) {
                out.insert(key, fd);
            }
        }
    }
    out
}

fn encode_pairs<V: fmt::Display>(pairs: impl Iterator<Item = (Key, V)>) -> String {
    let mut s = String::new();
    for (key, value) in pairs {
        if !s.is_empty() {
            s.push(' ');
        }
        s.push_str(&format!("{} {}", key, value));
    }
    s
}

impl Archive for Runtime {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.vars.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self { vars: BTreeMap::unarchive(ar)? })
    }
}
