// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The cluster controller.
//!
//! Agents connect and announce their resources; submitters connect and
//! deliver whole-form topologies. The master proves a packing exists at
//! enqueue time, commits packings in queue order as resources allow, and
//! ships each container's fragment to its chosen agent. Task reports flow
//! back through the agents; when a graph's placement set drains (or any
//! report carries an error), the submitter receives the assembled
//! [`Solution`] and the graph is retired.
//!
//! All maps are owner-only: channel callbacks promise their payloads onto
//! the reactor turn, never touching the state directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::cluster::scheduler::{best_fit, AgentView, Placement};
use crate::config::Policy;
use crate::engine::{Event, EventId, Handle, Reactor, Signal};
use crate::errors::ClusterError;
use crate::graph::Key;
use crate::observability::messages::cluster::{
    AgentConnected, AgentRemoved, GraphArrived, GraphRemoved, SchedulerBlocked,
};
use crate::observability::messages::StructuredLog;
use crate::proto::{KillTask, Protobuf, Resource, Solution, TaskId, TaskInfo, Topology};
use crate::transport::{insert_channel, ChannelOstream, Device};

/// How often the master logs its cluster snapshot (and, incidentally,
/// proves its loop alive).
const CLUSTER_TICK: Duration = Duration::from_secs(60);

struct MasterAgent {
    key: Key,
    events: Vec<EventId>,
    tx: ChannelOstream,
    resource: Option<Resource>,
    released: Resource,
    cpu_bins: Vec<Option<TaskId>>,
    /// Reserved resources per placed task, for release on completion.
    tasks: HashMap<TaskId, Resource>,
}

impl MasterAgent {
    fn host(&self) -> &str {
        self.resource.as_ref().map(|r| r.host.as_str()).unwrap_or("")
    }

    /// Seat a task into `cpus` empty bins and subtract its reservation.
    fn occupy(&mut self, task: TaskId, reserved: Resource) {
        let mut remaining = reserved.num_cpus;
        for bin in self.cpu_bins.iter_mut() {
            if remaining == 0 {
                break;
            }
            if bin.is_none() {
                *bin = Some(task);
                remaining -= 1;
            }
        }
        self.released -= &reserved;
        self.tasks.insert(task, reserved);
    }

    /// Release a finished task's bins and reservation.
    fn vacate(&mut self, task: TaskId) {
        if let Some(reserved) = self.tasks.remove(&task) {
            for bin in self.cpu_bins.iter_mut() {
                if *bin == Some(task) {
                    *bin = None;
                }
            }
            self.released += &reserved;
        }
    }
}

struct MasterGraph {
    events: Vec<EventId>,
    tx: ChannelOstream,
    topology: Option<Topology>,
    solution: Solution,
    /// Outstanding placements: task id to hosting agent.
    placement: HashMap<TaskId, Key>,
}

/// Owner-only master state.
pub struct MasterState {
    policy: Policy,
    agents: HashMap<Key, MasterAgent>,
    graphs: HashMap<Key, MasterGraph>,
    queue: VecDeque<Key>,
    next_agent_key: Key,
    next_graph_key: Key,
}

impl MasterState {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            agents: HashMap::new(),
            graphs: HashMap::new(),
            queue: VecDeque::new(),
            next_agent_key: 0,
            next_graph_key: 0,
        }
    }
}

/// Point-in-time cluster snapshot for operators.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub host: String,
    pub num_agents: usize,
    pub num_graphs: usize,
    pub agents: Vec<(Key, Resource, Resource, usize)>,
}

pub struct Master;

impl Master {
    /// Run the controller forever.
    pub async fn run(policy: Policy) -> Result<(), ClusterError> {
        let mut reactor = Reactor::new(MasterState::new(policy.clone()));

        let agent_listener =
            TcpListener::bind((policy.this_host.as_str(), policy.agent_listener_port)).await?;
        let graph_listener =
            TcpListener::bind((policy.this_host.as_str(), policy.graph_listener_port)).await?;

        tracing::info!(
            host = %policy.this_host,
            agent_port = agent_listener.local_addr()?.port(),
            graph_port = graph_listener.local_addr()?.port(),
            "master listening"
        );

        tokio::spawn(accept_agents(agent_listener, reactor.handle()));
        tokio::spawn(accept_graphs(graph_listener, reactor.handle()));

        Self::setup(&mut reactor);
        reactor.dispatch().await;
        Ok(())
    }

    /// Install the recurring cluster snapshot; it also keeps the loop
    /// alive while no peer is connected.
    pub(crate) fn setup(reactor: &mut Reactor<MasterState>) {
        let handle = reactor.handle();
        reactor.insert(Event::periodic(CLUSTER_TICK, false, move |_| {
            drop(handle.promise(|r| {
                let info = r.cluster_info();
                tracing::debug!(
                    num_agents = info.num_agents,
                    num_graphs = info.num_graphs,
                    "cluster snapshot"
                );
            }));
            Signal::Default
        }));
    }
}

async fn accept_agents(listener: TcpListener, handle: Handle<MasterState>) {
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            break;
        };
        let device = Arc::new(Device::from(socket));
        drop(handle.promise(move |r| r.insert_agent(device)));
    }
}

async fn accept_graphs(listener: TcpListener, handle: Handle<MasterState>) {
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            break;
        };
        let device = Arc::new(Device::from(socket));
        drop(handle.promise(move |r| r.insert_graph(device)));
    }
}

impl Reactor<MasterState> {
    // ---- agents --------------------------------------------------------------------------------

    pub(crate) fn insert_agent(&mut self, device: Arc<Device>) -> Key {
        let key = self.kernel.next_agent_key;
        self.kernel.next_agent_key += 1;

        let handle = self.handle();
        let (read_event, write_event, tx) = insert_channel(
            self,
            device,
            Arc::new(move |message| {
                let handle = handle.clone();
                match message {
                    Protobuf::Resource(resource) => {
                        drop(handle.promise(move |r| r.on_resource(key, resource)));
                    }
                    Protobuf::TaskInfo(info) => {
                        drop(handle.promise(move |r| r.on_taskinfo(key, info)));
                    }
                    other => {
                        tracing::warn!(agent = key, message = other.tag(), "unexpected agent message");
                    }
                }
            }),
            {
                let handle = self.handle();
                Arc::new(move |_| {
                    drop(handle.promise(move |r| r.remove_agent(key)));
                })
            },
        );

        self.kernel.agents.insert(
            key,
            MasterAgent {
                key,
                events: vec![read_event.id(), write_event.id()],
                tx,
                resource: None,
                released: Resource::default(),
                cpu_bins: Vec::new(),
                tasks: HashMap::new(),
            },
        );
        key
    }

    pub(crate) fn remove_agent(&mut self, key: Key) {
        let Some(agent) = self.kernel.agents.remove(&key) else {
            return;
        };

        // Every graph with a task on this agent has lost work it cannot
        // get back; surface the failure to its submitter.
        let affected: Vec<Key> = agent.tasks.keys().map(|t| t.graph).collect();
        AgentRemoved { agent: key, graphs_affected: affected.len() }.log();

        for id in agent.events {
            self.remove(id);
        }
        for graph in affected {
            if let Some(g) = self.kernel.graphs.get_mut(&graph) {
                g.solution.what = format!("agent {} was lost while hosting tasks", key);
            }
            self.remove_graph(graph);
        }

        self.dequeue();
    }

    /// First message from a connecting agent: its resource announcement.
    pub(crate) fn on_resource(&mut self, key: Key, resource: Resource) {
        if let Some(agent) = self.kernel.agents.get_mut(&key) {
            AgentConnected { agent: key, host: &resource.host, num_cpus: resource.num_cpus }.log();
            agent.cpu_bins = vec![None; resource.num_cpus as usize];
            agent.released = resource.clone();
            agent.resource = Some(resource);
        }
        self.dequeue();
    }

    pub(crate) fn on_taskinfo(&mut self, agent_key: Key, info: TaskInfo) {
        tracing::info!(agent = agent_key, info = %info, "task report");

        if let Some(agent) = self.kernel.agents.get_mut(&agent_key) {
            agent.vacate(info.task_id);
        }

        let graph_key = info.task_id.graph;
        let mut finished = false;
        if let Some(graph) = self.kernel.graphs.get_mut(&graph_key) {
            if graph.placement.remove(&info.task_id).is_some() {
                graph.solution.task_infos.push(info.clone());
            }
            finished = info.has_error() || graph.placement.is_empty();
        }
        if finished {
            self.remove_graph(graph_key);
        }

        self.dequeue();
    }

    // ---- graphs --------------------------------------------------------------------------------

    pub(crate) fn insert_graph(&mut self, device: Arc<Device>) -> Key {
        let key = self.kernel.next_graph_key;
        self.kernel.next_graph_key += 1;

        let handle = self.handle();
        let (read_event, write_event, tx) = insert_channel(
            self,
            device,
            Arc::new(move |message| {
                let handle = handle.clone();
                match message {
                    Protobuf::Topology(topology) => {
                        drop(handle.promise(move |r| r.on_topology(key, topology)));
                    }
                    other => {
                        tracing::warn!(graph = key, message = other.tag(), "unexpected submitter message");
                    }
                }
            }),
            {
                let handle = self.handle();
                Arc::new(move |_| {
                    drop(handle.promise(move |r| r.remove_graph(key)));
                })
            },
        );

        self.kernel.graphs.insert(
            key,
            MasterGraph {
                events: vec![read_event.id(), write_event.id()],
                tx,
                topology: None,
                solution: Solution::new(key),
                placement: HashMap::new(),
            },
        );
        key
    }

    /// A graph leaves the master: kill whatever still runs, deliver the
    /// solution, drop the channel.
    pub(crate) fn remove_graph(&mut self, key: Key) {
        let Some(graph) = self.kernel.graphs.remove(&key) else {
            return;
        };
        self.kernel.queue.retain(|queued| *queued != key);

        for (task, agent_key) in &graph.placement {
            if let Some(agent) = self.kernel.agents.get(agent_key) {
                agent.tx.send(&Protobuf::KillTask(KillTask { task_id: *task }));
            }
        }

        graph.tx.send(&Protobuf::Solution(graph.solution.clone()));
        // The channel's events go away with the graph; drain the solution
        // now rather than waiting for a write turn that will never come.
        let _ = graph.tx.flush();
        GraphRemoved { graph: key, what: &graph.solution.what }.log();

        for id in graph.events {
            self.remove(id);
        }
    }

    /// A whole-form topology arrived from a submitter.
    pub(crate) fn on_topology(&mut self, key: Key, mut topology: Topology) {
        topology.graph = key;

        let fits = self.try_enqueue(&topology);
        let Some(graph) = self.kernel.graphs.get_mut(&key) else {
            return;
        };

        GraphArrived {
            graph: key,
            num_containers: topology.containers.len(),
            num_vertices: topology.vertices.len(),
        }
        .log();

        graph.topology = Some(topology);

        if !fits {
            graph.solution.what = "Resource request doesn't fit in cluster".to_string();
            self.remove_graph(key);
            return;
        }

        self.kernel.queue.push_back(key);
        self.dequeue();
    }

    /// Prove a packing exists against the cluster's total capacity.
    fn try_enqueue(&self, topology: &Topology) -> bool {
        let totals: Vec<AgentView> = self
            .kernel
            .agents
            .values()
            .filter_map(|agent| {
                agent.resource.as_ref().map(|resource| AgentView {
                    key: agent.key,
                    host: resource.host.clone(),
                    released: resource.clone(),
                })
            })
            .collect();
        best_fit(topology, &totals).is_some()
    }

    /// Commit placements in queue order until a graph cannot be placed.
    pub(crate) fn dequeue(&mut self) -> usize {
        let mut num_dequeued = 0;
        loop {
            let Some(key) = self.kernel.queue.front().copied() else {
                break;
            };
            if !self.try_dequeue(key) {
                break;
            }
            self.kernel.queue.pop_front();
            num_dequeued += 1;
        }
        num_dequeued
    }

    /// Attempt one graph against the currently released resources; on
    /// success, reserve and ship every fragment.
    fn try_dequeue(&mut self, key: Key) -> bool {
        let Some(graph) = self.kernel.graphs.get(&key) else {
            // A vanished graph never blocks the queue.
            return true;
        };
        let Some(topology) = &graph.topology else {
            return true;
        };

        let views: Vec<AgentView> = self
            .kernel
            .agents
            .values()
            .filter(|agent| agent.resource.is_some())
            .map(|agent| AgentView {
                key: agent.key,
                host: agent.host().to_string(),
                released: agent.released.clone(),
            })
            .collect();

        let Some(placements) = best_fit(topology, &views) else {
            SchedulerBlocked { graph: key, queue_depth: self.kernel.queue.len() }.log();
            return false;
        };

        self.commit(key, placements);
        true
    }

    fn commit(&mut self, graph_key: Key, placements: Vec<Placement>) {
        let Some(graph) = self.kernel.graphs.get_mut(&graph_key) else {
            return;
        };
        let Some(topology) = graph.topology.as_mut() else {
            return;
        };

        // Record which host owns every vertex so agents can dial the
        // frontier of each inter stream toward its tail.
        let agent_hosts: HashMap<Key, String> = placements
            .iter()
            .filter_map(|p| self.kernel.agents.get(&p.agent).map(|a| (p.container, a.host().to_string())))
            .collect();
        let vertex_hosts: HashMap<Key, String> = topology
            .vertices
            .values()
            .filter_map(|v| agent_hosts.get(&v.container).map(|host| (v.key, host.clone())))
            .collect();
        topology.runtime.set_vertex_hosts(&vertex_hosts);

        let fragments: Vec<(Placement, Topology, Resource)> = placements
            .into_iter()
            .map(|placement| {
                let fragment = topology.extract(placement.container);
                let reserved = topology.containers[&placement.container].resource.clone();
                (placement, fragment, reserved)
            })
            .collect();

        for (placement, fragment, reserved) in fragments {
            let task = fragment.task_id();
            graph.placement.insert(task, placement.agent);
            if let Some(agent) = self.kernel.agents.get_mut(&placement.agent) {
                agent.occupy(task, reserved);
                agent.tx.send(&Protobuf::Topology(fragment));
            }
        }
        tracing::info!(graph = graph_key, "graph placement committed");
    }

    // ---- introspection -------------------------------------------------------------------------

    pub(crate) fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            host: self.kernel.policy.this_host.clone(),
            num_agents: self.kernel.agents.len(),
            num_graphs: self.kernel.graphs.len(),
            agents: self
                .kernel
                .agents
                .values()
                .filter_map(|agent| {
                    agent.resource.as_ref().map(|resource| {
                        (agent.key, resource.clone(), agent.released.clone(), agent.tasks.len())
                    })
                })
                .collect(),
        }
    }
}
