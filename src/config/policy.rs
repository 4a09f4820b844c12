// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process policy: every `DTC_*` variable parsed once at startup.
//!
//! A variable that is absent falls back to its documented default; a
//! variable that is present but unusable is a fatal configuration error,
//! surfaced by refusing to start rather than limping along with a guess.

use crate::errors::SettingsError;
use crate::proto::{
    ExecutionMode, ENV_AGENT_LISTENER_PORT, ENV_EXECUTION_MODE, ENV_FRONTIER_LISTENER_PORT,
    ENV_GRAPH_LISTENER_PORT, ENV_MASTER_HOST, ENV_SHELL_LISTENER_PORT, ENV_STDERR_FD,
    ENV_STDERR_LISTENER_PORT, ENV_STDOUT_FD, ENV_STDOUT_LISTENER_PORT, ENV_SUBMIT_ARGV,
    ENV_SUBMIT_FILE, ENV_THIS_HOST, ENV_TOPOLOGY_FD, ENV_WEBUI_LISTENER_PORT,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_AGENT_LISTENER_PORT: u16 = 9909;
pub const DEFAULT_GRAPH_LISTENER_PORT: u16 = 9910;
pub const DEFAULT_SHELL_LISTENER_PORT: u16 = 9911;
pub const DEFAULT_WEBUI_LISTENER_PORT: u16 = 9912;
pub const DEFAULT_FRONTIER_LISTENER_PORT: u16 = 9913;

/// Snapshot of the `DTC_*` environment.
#[derive(Debug, Clone)]
pub struct Policy {
    pub execution_mode: ExecutionMode,
    pub this_host: String,
    pub master_host: String,
    pub agent_listener_port: u16,
    pub graph_listener_port: u16,
    pub shell_listener_port: u16,
    pub webui_listener_port: u16,
    pub frontier_listener_port: u16,
    pub stdout_listener_port: u16,
    pub stderr_listener_port: u16,
    pub stdout_fd: Option<i32>,
    pub stderr_fd: Option<i32>,
    pub topology_fd: Option<i32>,
    pub submit_file: Option<String>,
    pub submit_argv: Option<String>,
}

impl Policy {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            execution_mode: mode_var(ENV_EXECUTION_MODE)?,
            this_host: string_var(ENV_THIS_HOST, DEFAULT_HOST),
            master_host: string_var(ENV_MASTER_HOST, DEFAULT_HOST),
            agent_listener_port: port_var(ENV_AGENT_LISTENER_PORT, DEFAULT_AGENT_LISTENER_PORT)?,
            graph_listener_port: port_var(ENV_GRAPH_LISTENER_PORT, DEFAULT_GRAPH_LISTENER_PORT)?,
            shell_listener_port: port_var(ENV_SHELL_LISTENER_PORT, DEFAULT_SHELL_LISTENER_PORT)?,
            webui_listener_port: port_var(ENV_WEBUI_LISTENER_PORT, DEFAULT_WEBUI_LISTENER_PORT)?,
            frontier_listener_port: port_var(
                ENV_FRONTIER_LISTENER_PORT,
                DEFAULT_FRONTIER_LISTENER_PORT,
            )?,
            stdout_listener_port: port_var(ENV_STDOUT_LISTENER_PORT, 0)?,
            stderr_listener_port: port_var(ENV_STDERR_LISTENER_PORT, 0)?,
            stdout_fd: fd_var(ENV_STDOUT_FD)?,
            stderr_fd: fd_var(ENV_STDERR_FD)?,
            topology_fd: fd_var(ENV_TOPOLOGY_FD)?,
            submit_file: optional_var(ENV_SUBMIT_FILE),
            submit_argv: optional_var(ENV_SUBMIT_ARGV),
        })
    }
}

fn optional_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn string_var(name: &'static str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}

fn mode_var(name: &'static str) -> Result<ExecutionMode, SettingsError> {
    match optional_var(name) {
        None => Ok(ExecutionMode::Local),
        Some(raw) => {
            ExecutionMode::parse(&raw).ok_or(SettingsError::BadVariable { name, value: raw })
        }
    }
}

fn port_var(name: &'static str, default: u16) -> Result<u16, SettingsError> {
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| SettingsError::BadVariable { name, value: raw }),
    }
}

fn fd_var(name: &'static str) -> Result<Option<i32>, SettingsError> {
    match optional_var(name) {
        None => Ok(None),
        Some(raw) => match raw.parse::<i32>() {
            Ok(fd) if fd >= 0 => Ok(Some(fd)),
            Ok(-1) => Ok(None),
            _ => Err(SettingsError::BadVariable { name, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment mutation is process-global; this lock keeps the policy
    // tests from trampling each other.
    pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        for name in [ENV_EXECUTION_MODE, ENV_AGENT_LISTENER_PORT, ENV_THIS_HOST] {
            std::env::remove_var(name);
        }
        let policy = Policy::from_env().unwrap();
        assert_eq!(policy.execution_mode, ExecutionMode::Local);
        assert_eq!(policy.this_host, DEFAULT_HOST);
        assert_eq!(policy.agent_listener_port, DEFAULT_AGENT_LISTENER_PORT);
        assert_eq!(policy.topology_fd, None);
    }

    #[test]
    fn unparsable_port_refuses_to_start() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_AGENT_LISTENER_PORT, "not-a-port");
        let err = Policy::from_env().unwrap_err();
        std::env::remove_var(ENV_AGENT_LISTENER_PORT);
        match err {
            SettingsError::BadVariable { name, value } => {
                assert_eq!(name, ENV_AGENT_LISTENER_PORT);
                assert_eq!(value, "not-a-port");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn distributed_mode_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_EXECUTION_MODE, "distributed");
        std::env::set_var(ENV_TOPOLOGY_FD, "17");
        let policy = Policy::from_env().unwrap();
        std::env::remove_var(ENV_EXECUTION_MODE);
        std::env::remove_var(ENV_TOPOLOGY_FD);
        assert_eq!(policy.execution_mode, ExecutionMode::Distributed);
        assert_eq!(policy.topology_fd, Some(17));
    }
}
