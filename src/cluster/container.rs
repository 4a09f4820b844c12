// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Isolated child spawn for deployed tasks.
//!
//! A container becomes one OS process running the submitted binary in
//! distributed mode. Isolation is best-effort: fresh UTS/IPC namespaces
//! and an address-space limit where the host allows them, a plain child
//! where it does not. The scheduler's accounting never depends on the
//! isolation actually holding.

use tokio::process::{Child, Command};

use crate::errors::ClusterError;
use crate::proto::Topology;

/// Spawn the executor child for `topology`. Every inherited descriptor
/// (control socket, frontiers, stdio tunnels) must already have its
/// close-on-exec flag cleared by the caller.
pub fn spawn_executor(topology: &Topology) -> Result<Child, ClusterError> {
    let runtime = &topology.runtime;
    let task = topology.task_id();

    let file = runtime.submit_file().ok_or_else(|| ClusterError::DeployFailed {
        task,
        reason: "topology carries no submit file".to_string(),
    })?;
    let argv: Vec<&str> = runtime.submit_argv().map(|s| s.split_whitespace().collect()).unwrap_or_default();

    let memory_limit = topology
        .containers
        .get(&topology.topology)
        .map(|c| c.resource.memory_limit_in_bytes)
        .filter(|limit| *limit > 0);

    let mut cmd = Command::new(file);
    cmd.args(&argv);
    for (name, value) in runtime.iter() {
        cmd.env(name, value);
    }

    unsafe {
        cmd.pre_exec(move || {
            // Best-effort isolation; failures fall back to a plain child.
            libc::unshare(libc::CLONE_NEWUTS | libc::CLONE_NEWIPC);
            if let Some(limit) = memory_limit {
                let rlim = libc::rlimit { rlim_cur: limit, rlim_max: limit };
                libc::setrlimit(libc::RLIMIT_AS, &rlim);
            }
            Ok(())
        });
    }

    cmd.spawn().map_err(|e| ClusterError::DeployFailed { task, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Runtime, TopologyContainer, ENV_SUBMIT_ARGV, ENV_SUBMIT_FILE};

    #[test]
    fn missing_submit_file_is_a_deploy_failure()  {
        let tpg = Topology::new(1, 2);
        match spawn_executor(&tpg) {
            Err(ClusterError::DeployFailed { task, reason }) => {
                assert_eq!(task.graph, 1);
                assert!(reason.contains("submit file"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn child_spawns_and_is_reapable() {
        let mut runtime = Runtime::new();
        runtime.set(ENV_SUBMIT_FILE, "/bin/sh");
        runtime.set(ENV_SUBMIT_ARGV, "-c true");

        let mut tpg = Topology::new(1, 7);
        tpg.containers.insert(7, TopologyContainer::new(7));
        tpg.runtime = runtime;

        let mut child = spawn_executor(&tpg).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }
}
