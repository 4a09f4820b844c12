// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Deterministic best-fit bin packing of containers onto agents.
//!
//! Containers go in descending CPU order. Each picks the candidate agent
//! whose free pool dominates the request and leaves the least memory
//! behind, with ties broken toward preferred hosts and then the lowest
//! agent key. A `required_host` is a hard constraint. Placement is
//! all-or-nothing: if any container has no candidate, the attempt fails
//! as a whole and nothing is reserved.

use std::collections::HashMap;

use crate::graph::Key;
use crate::proto::{Resource, Topology};

/// The scheduler's view of one agent's free pool.
#[derive(Debug, Clone)]
pub struct AgentView {
    pub key: Key,
    pub host: String,
    pub released: Resource,
}

/// One committed pairing of a container to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub container: Key,
    pub agent: Key,
}

/// Find a full placement of `topology`'s containers onto `agents`, or
/// `None` when no packing exists against the given pools.
pub fn best_fit(topology: &Topology, agents: &[AgentView]) -> Option<Vec<Placement>> {
    let mut pools: HashMap<Key, Resource> =
        agents.iter().map(|a| (a.key, a.released.clone())).collect();
    let hosts: HashMap<Key, &str> = agents.iter().map(|a| (a.key, a.host.as_str())).collect();

    // Descending CPU, then key, so equal inputs always pack identically.
    let mut containers: Vec<_> = topology.containers.values().collect();
    containers.sort_by(|a, b| {
        b.resource.num_cpus.cmp(&a.resource.num_cpus).then(a.key.cmp(&b.key))
    });

    let mut placements = Vec::with_capacity(containers.len());
    for container in containers {
        let request = &container.resource;
        let required = container.host();
        let preferred = container.preferred_hosts();

        let mut agent_keys: Vec<Key> = pools.keys().copied().collect();
        agent_keys.sort_unstable();

        let mut best: Option<(u64, bool, Key)> = None;
        for key in agent_keys {
            let host = hosts[&key];
            if let Some(required) = required {
                if required != host {
                    continue;
                }
            }
            let pool = &pools[&key];
            if !pool.dominates(request) {
                continue;
            }
            let leftover = pool.memory_limit_in_bytes - request.memory_limit_in_bytes;
            let not_preferred = !preferred.contains(&host);
            let candidate = (leftover, not_preferred, key);
            if best.map_or(true, |b| candidate < b) {
                best = Some(candidate);
            }
        }

        let (_, _, agent) = best?;
        *pools.get_mut(&agent).unwrap_or_else(|| unreachable!()) -= request;
        placements.push(Placement { container: container.key, agent });
    }

    Some(placements)
}
