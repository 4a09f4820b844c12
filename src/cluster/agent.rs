// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The per-host daemon: receives topologies from the master, collects the
//! frontier sockets their inter streams need, and incubates each task
//! until it can hatch into an executor child.
//!
//! A task is born in the hatchery with the frontiers it dialed itself
//! (one per input-side inter stream, opened toward the tail vertex's
//! host). Output-side frontiers arrive through the frontier listener,
//! announced by a fixed-layout [`FrontierPacket`]; ones that match no
//! task yet wait in a global pending list. Once the frontier count
//! reaches the topology's inter-stream count, the agent spawns the child
//! with every inherited descriptor un-cloexec'd, writes the topology
//! down the control socket, and waits for the reaper to report the exit
//! status upstream.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::cluster::container;
use crate::config::Policy;
use crate::engine::{EventId, Handle, Reactor};
use crate::errors::{ClusterError, EXIT_BROKEN_CONNECTION};
use crate::graph::Key;
use crate::observability::messages::cluster::{FrontierReceived, TaskDeployed, TaskRemoved};
use crate::observability::messages::StructuredLog;
use crate::proto::{
    ExecutionMode, FrontierPacket, Protobuf, Resource, Side, TaskId, TaskInfo, Topology,
};
use crate::transport::{insert_channel, restore_cloexec, share_with_child, ChannelOstream, Device};

/// One accepted (or dialed) inter-stream socket, identified by its
/// graph and stream keys.
pub struct Frontier {
    pub graph: Key,
    pub stream: Key,
    pub device: Arc<Device>,
}

/// Incubation state: frontiers still being collected.
pub(crate) struct Hatchery {
    frontiers: Vec<Frontier>,
    num_inter_streams: usize,
    stdout: Option<Arc<Device>>,
    stderr: Option<Arc<Device>>,
}

/// Running state: the child is alive behind its control channel.
pub(crate) struct RunningTask {
    events: Vec<EventId>,
    #[allow(dead_code)]
    tx: ChannelOstream,
    pid: Option<i32>,
}

pub(crate) enum TaskHandle {
    Hatchery(Hatchery),
    Executor(RunningTask),
}

pub(crate) struct AgentTask {
    pub topology: Topology,
    pub handle: TaskHandle,
}

impl AgentTask {
    fn hatch(topology: Topology, frontiers: Vec<Frontier>, stdout: Arc<Device>, stderr: Arc<Device>) -> Self {
        let num_inter_streams = topology.num_inter_streams();
        Self {
            topology,
            handle: TaskHandle::Hatchery(Hatchery {
                frontiers,
                num_inter_streams,
                stdout: Some(stdout),
                stderr: Some(stderr),
            }),
        }
    }

    /// An incoming frontier belongs to this task when the graphs agree
    /// and the stream leaves this topology on its output side.
    pub(crate) fn matches(&self, frontier: &Frontier) -> bool {
        self.topology.graph == frontier.graph
            && self.topology.has_inter_stream(frontier.stream, Side::Output)
    }

    /// Every inter stream has its socket.
    pub(crate) fn ready(&self) -> bool {
        match &self.handle {
            TaskHandle::Hatchery(h) => h.frontiers.len() == h.num_inter_streams,
            TaskHandle::Executor(_) => false,
        }
    }

    /// Move every matching frontier out of the global pending list into
    /// this task's hatchery.
    pub(crate) fn splice_pending(&mut self, pending: &mut Vec<Frontier>) {
        let mut i = 0;
        while i < pending.len() {
            if self.matches(&pending[i]) {
                let frontier = pending.swap_remove(i);
                if let TaskHandle::Hatchery(h) = &mut self.handle {
                    h.frontiers.push(frontier);
                }
            } else {
                i += 1;
            }
        }
    }
}

/// Owner-only agent state.
pub struct AgentState {
    policy: Policy,
    master: Option<ChannelOstream>,
    tasks: HashMap<TaskId, AgentTask>,
    pending_frontiers: Vec<Frontier>,
}

/// Everything a topology needs before it can enter the task table: the
/// stdio tunnels and the input-side frontiers, all dialed.
struct PreparedTask {
    topology: Topology,
    frontiers: Vec<Frontier>,
    stdout: Arc<Device>,
    stderr: Arc<Device>,
}

pub struct Agent;

impl Agent {
    /// Run the daemon until the master goes away.
    pub async fn run(policy: Policy) -> Result<(), ClusterError> {
        let mut reactor = Reactor::new(AgentState {
            policy: policy.clone(),
            master: None,
            tasks: HashMap::new(),
            pending_frontiers: Vec::new(),
        });

        let master_addr = format!("{}:{}", policy.master_host, policy.agent_listener_port);
        let device = Device::connect(&policy.master_host, policy.agent_listener_port)
            .await
            .map_err(|source| ClusterError::MasterUnreachable { addr: master_addr, source })?;

        let handle = reactor.handle();
        let prep_policy = policy.clone();
        let (_, _, master_tx) = insert_channel(
            &mut reactor,
            Arc::new(device),
            Arc::new(move |message| match message {
                Protobuf::Topology(topology) => {
                    spawn_task_preparation(handle.clone(), prep_policy.clone(), topology);
                }
                Protobuf::KillTask(kill) => {
                    let task_id = kill.task_id;
                    drop(handle.promise(move |r| r.kill_task(task_id)));
                }
                other => {
                    tracing::warn!(message = other.tag(), "unexpected message on the master channel");
                }
            }),
            Arc::new(|errc| {
                tracing::error!(errc = %errc, "error on the master channel");
                std::process::exit(EXIT_BROKEN_CONNECTION);
            }),
        );

        master_tx.send(&Protobuf::Resource(Resource::probe(policy.this_host.clone())));
        reactor.kernel.master = Some(master_tx);

        let listener =
            TcpListener::bind((policy.this_host.as_str(), policy.frontier_listener_port)).await?;
        let frontier_port = listener.local_addr()?.port();
        tokio::spawn(accept_frontiers(listener, reactor.handle()));

        tracing::info!(
            host = %policy.this_host,
            frontier_port,
            "agent connected to master"
        );

        reactor.dispatch().await;
        Ok(())
    }
}

impl Reactor<AgentState> {
    /// A fully prepared topology joins the task table, adopting any
    /// pending frontiers that belong to it.
    fn insert_task(&mut self, prepared: PreparedTask) {
        let key = prepared.topology.task_id();
        let mut task = AgentTask::hatch(
            prepared.topology,
            prepared.frontiers,
            prepared.stdout,
            prepared.stderr,
        );
        task.splice_pending(&mut self.kernel.pending_frontiers);

        if task.ready() {
            match self.deploy(&mut task) {
                Ok(()) => {
                    self.kernel.tasks.insert(key, task);
                }
                Err(e) => {
                    tracing::error!(task = %key, error = %e, "failed to deploy task");
                    self.report_taskinfo(TaskInfo::new(key, self.kernel.policy.this_host.clone(), -1));
                }
            }
        } else {
            self.kernel.tasks.insert(key, task);
        }
    }

    /// A frontier arrived on the listener; route it to its task or park
    /// it on the pending list.
    fn insert_frontier(&mut self, frontier: Frontier) {
        let key = self
            .kernel
            .tasks
            .iter()
            .find(|(_, task)| task.matches(&frontier))
            .map(|(key, _)| *key);

        let Some(key) = key else {
            self.kernel.pending_frontiers.push(frontier);
            return;
        };

        if let Some(task) = self.kernel.tasks.get_mut(&key) {
            if let TaskHandle::Hatchery(h) = &mut task.handle {
                h.frontiers.push(frontier);
            }
            if task.ready() {
                let mut task = self.kernel.tasks.remove(&key).unwrap_or_else(|| unreachable!());
                match self.deploy(&mut task) {
                    Ok(()) => {
                        self.kernel.tasks.insert(key, task);
                    }
                    Err(e) => {
                        tracing::error!(task = %key, error = %e, "failed to deploy task");
                        self.report_taskinfo(TaskInfo::new(
                            key,
                            self.kernel.policy.this_host.clone(),
                            -1,
                        ));
                    }
                }
            }
        }
    }

    /// Hatch a ready task: encode the frontier table, open the control
    /// socket pair, share every inherited descriptor, fork the executor,
    /// and write it its topology.
    fn deploy(&mut self, task: &mut AgentTask) -> Result<(), ClusterError> {
        let key = task.topology.task_id();
        let TaskHandle::Hatchery(hatchery) = &mut task.handle else {
            return Ok(());
        };

        task.topology
            .runtime
            .set_frontiers(hatchery.frontiers.iter().map(|f| (f.stream, f.device.as_raw_fd())));

        let (parent_side, child_side) = Device::pair()?;
        let child_side = Arc::new(child_side);
        task.topology.runtime.set_topology_fd(child_side.as_raw_fd());

        let mut inherited: Vec<Arc<Device>> =
            hatchery.frontiers.iter().map(|f| Arc::clone(&f.device)).collect();
        inherited.push(Arc::clone(&child_side));
        inherited.extend(hatchery.stdout.iter().cloned());
        inherited.extend(hatchery.stderr.iter().cloned());
        for device in &inherited {
            share_with_child(device)?;
        }

        let spawned = container::spawn_executor(&task.topology);
        for device in &inherited {
            let _ = restore_cloexec(device);
        }
        let mut child = spawned?;
        let pid = child.id().map(|p| p as i32);

        let num_frontiers = hatchery.frontiers.len();
        // The child owns the inherited ends now; dropping ours is what
        // lets its peers observe end-of-stream later.
        hatchery.frontiers.clear();
        hatchery.stdout = None;
        hatchery.stderr = None;

        // Our copy of the child's control end dies with this scope; the
        // parent end backs the control channel.
        drop(inherited);
        drop(child_side);

        let (read_event, write_event, tx) = insert_channel(
            self,
            Arc::new(parent_side),
            Arc::new(|message: Protobuf| {
                tracing::warn!(message = message.tag(), "unexpected message from executor child");
            }),
            Arc::new(|_| {
                // The reaper is the authority on child death; the broken
                // control channel is just its echo.
            }),
        );

        tx.send(&Protobuf::Topology(task.topology.clone()));

        let handle = self.handle();
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = match status {
                Ok(s) => s.code().unwrap_or(-1),
                Err(_) => -1,
            };
            drop(handle.promise(move |r| r.on_child_exit(key, code)));
        });

        TaskDeployed { task: key, num_frontiers }.log();
        task.handle = TaskHandle::Executor(RunningTask {
            events: vec![read_event.id(), write_event.id()],
            tx,
            pid,
        });
        Ok(())
    }

    /// The reaper observed the child's exit; retire the task and report.
    fn on_child_exit(&mut self, key: TaskId, status: i32) {
        let Some(task) = self.kernel.tasks.remove(&key) else {
            return;
        };
        if let TaskHandle::Executor(running) = task.handle {
            for id in running.events {
                self.remove(id);
            }
        }
        TaskRemoved { task: key, status }.log();
        self.report_taskinfo(TaskInfo::new(key, self.kernel.policy.this_host.clone(), status));
    }

    /// Master-ordered teardown. An executing child is killed and reported
    /// by its reaper; a hatchery task is simply dropped.
    fn kill_task(&mut self, key: TaskId) {
        let drop_now = match self.kernel.tasks.get(&key) {
            Some(task) => match &task.handle {
                TaskHandle::Executor(running) => {
                    if let Some(pid) = running.pid {
                        unsafe {
                            libc::kill(pid, libc::SIGKILL);
                        }
                    }
                    false
                }
                TaskHandle::Hatchery(_) => true,
            },
            None => false,
        };
        if drop_now {
            self.kernel.tasks.remove(&key);
            tracing::info!(task = %key, "hatchery task dropped on kill");
        }
    }

    fn report_taskinfo(&mut self, info: TaskInfo) {
        if let Some(master) = &self.kernel.master {
            master.send(&Protobuf::TaskInfo(info));
        }
    }
}

/// Dial the stdio tunnels and the input-side frontiers off the owner
/// turn, then promise the finished task back in.
fn spawn_task_preparation(handle: Handle<AgentState>, policy: Policy, topology: Topology) {
    tokio::spawn(async move {
        let key = topology.task_id();
        let host = policy.this_host.clone();
        match prepare_task(&policy, topology).await {
            Ok(prepared) => {
                drop(handle.promise(move |r| r.insert_task(prepared)));
            }
            Err(e) => {
                tracing::error!(task = %key, error = %e, "failed to prepare task");
                drop(handle.promise(move |r| {
                    r.report_taskinfo(TaskInfo::new(key, host, -1));
                }));
            }
        }
    });
}

async fn prepare_task(policy: &Policy, mut topology: Topology) -> Result<PreparedTask, ClusterError> {
    let task = topology.task_id();
    topology.runtime.set_execution_mode(ExecutionMode::Distributed);

    // The submitter's host carries the stdout/stderr listeners.
    let submit_host = topology
        .runtime
        .this_host()
        .unwrap_or(crate::config::DEFAULT_HOST)
        .to_string();
    let stdout_port = topology.runtime.stdout_listener_port().ok_or_else(|| {
        ClusterError::DeployFailed { task, reason: "no stdout listener port".to_string() }
    })?;
    let stderr_port = topology.runtime.stderr_listener_port().ok_or_else(|| {
        ClusterError::DeployFailed { task, reason: "no stderr listener port".to_string() }
    })?;

    let stdout = Arc::new(Device::connect(&submit_host, stdout_port).await?);
    let stderr = Arc::new(Device::connect(&submit_host, stderr_port).await?);
    topology.runtime.set_stdout_fd(stdout.as_raw_fd());
    topology.runtime.set_stderr_fd(stderr.as_raw_fd());

    // The input side of every inter stream initiates the connection
    // toward the host that owns the tail vertex.
    let vertex_hosts = topology.runtime.vertex_hosts();
    let mut frontiers = Vec::new();
    let input_streams: Vec<(Key, Key)> = topology
        .streams
        .iter()
        .filter(|(key, _)| topology.has_inter_stream(**key, Side::Input))
        .map(|(key, stream)| (*key, stream.tail))
        .collect();

    for (stream_key, tail) in input_streams {
        let host = vertex_hosts.get(&tail).ok_or_else(|| ClusterError::DeployFailed {
            task,
            reason: format!("no host recorded for vertex {}", tail),
        })?;
        let device = Device::connect(host, policy.frontier_listener_port).await.map_err(|source| {
            ClusterError::FrontierUnreachable { host: host.clone(), stream: stream_key, source }
        })?;
        write_frontier_packet(&device, FrontierPacket { graph: topology.graph, stream: stream_key })
            .await
            .map_err(|source| ClusterError::FrontierUnreachable {
                host: host.clone(),
                stream: stream_key,
                source,
            })?;
        frontiers.push(Frontier {
            graph: topology.graph,
            stream: stream_key,
            device: Arc::new(device),
        });
    }

    Ok(PreparedTask { topology, frontiers, stdout, stderr })
}

/// Accept inbound frontier sockets and identify each by its leading
/// packet before handing it to the owner.
async fn accept_frontiers(listener: TcpListener, handle: Handle<AgentState>) {
    loop {
        let Ok((socket, peer)) = listener.accept().await else {
            break;
        };
        let handle = handle.clone();
        tokio::spawn(async move {
            let device = Device::from(socket);
            match read_frontier_packet(&device).await {
                Ok(packet) => {
                    FrontierReceived { graph: packet.graph, stream: packet.stream }.log();
                    drop(handle.promise(move |r| {
                        r.insert_frontier(Frontier {
                            graph: packet.graph,
                            stream: packet.stream,
                            device: Arc::new(device),
                        });
                    }));
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "frontier socket died before identifying");
                }
            }
        });
    }
}

async fn read_frontier_packet(device: &Device) -> io::Result<FrontierPacket> {
    let mut raw = [0u8; FrontierPacket::WIRE_SIZE];
    let mut got = 0;
    while got < raw.len() {
        device.readable().await?;
        match device.try_read(&mut raw[got..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(FrontierPacket::from_bytes(&raw))
}

async fn write_frontier_packet(device: &Device, packet: FrontierPacket) -> io::Result<()> {
    let raw = packet.to_bytes();
    let mut sent = 0;
    while sent < raw.len() {
        device.writable().await?;
        match device.try_write(&raw[sent..]) {
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{TopologyStream, TopologyVertex};

    // A fragment owning vertex 1 in container 10: stream 20 leaves it
    // (output side), stream 21 enters it (input side).
    fn fragment() -> Topology {
        let mut tpg = Topology::new(5, 10);
        tpg.vertices.insert(1, TopologyVertex { key: 1, container: 10 });
        tpg.streams.insert(20, TopologyStream { key: 20, tail: 1, head: 2 });
        tpg.streams.insert(21, TopologyStream { key: 21, tail: 3, head: 1 });
        tpg
    }

    fn frontier(graph: Key, stream: Key) -> Frontier {
        let (a, _b) = Device::pair().unwrap();
        // The pair's other end leaks intentionally; the test only needs
        // an open descriptor.
        std::mem::forget(_b);
        Frontier { graph, stream, device: Arc::new(a) }
    }

    fn hatchling(tpg: Topology, dialed: Vec<Frontier>) -> AgentTask {
        let (out, _o) = Device::pair().unwrap();
        let (err, _e) = Device::pair().unwrap();
        std::mem::forget(_o);
        std::mem::forget(_e);
        AgentTask::hatch(tpg, dialed, Arc::new(out), Arc::new(err))
    }

    #[tokio::test]
    async fn frontier_matching_is_by_graph_and_output_side() {
        let task = hatchling(fragment(), Vec::new());

        // Output-side stream of the right graph: ours.
        assert!(task.matches(&frontier(5, 20)));
        // Input-side stream: the peer agent owns that socket, not us.
        assert!(!task.matches(&frontier(5, 21)));
        // Right stream, wrong graph.
        assert!(!task.matches(&frontier(6, 20)));
        // Unknown stream.
        assert!(!task.matches(&frontier(5, 99)));
    }

    #[tokio::test]
    async fn task_is_ready_exactly_at_its_inter_stream_count() {
        // Two inter streams: one dialed (input side), one accepted.
        let dialed = vec![frontier(5, 21)];
        let mut task = hatchling(fragment(), dialed);
        assert!(!task.ready());

        let mut pending = vec![frontier(5, 20), frontier(6, 20), frontier(5, 77)];
        task.splice_pending(&mut pending);

        assert!(task.ready(), "matching pending frontier must complete the set");
        assert_eq!(pending.len(), 2, "non-matching frontiers stay pending");
        assert!(pending.iter().all(|f| f.graph != 5 || f.stream != 20));
    }

    #[tokio::test]
    async fn frontier_packets_cross_a_socket_whole() {
        let (a, b) = Device::pair().unwrap();
        let packet = FrontierPacket { graph: 12, stream: -3 };
        write_frontier_packet(&a, packet).await.unwrap();
        let decoded = read_frontier_packet(&b).await.unwrap();
        assert_eq!(decoded, packet);
    }
}
