// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Control-plane integration tests: a live master reactor driven over
//! in-process socket pairs standing in for agent and submitter
//! connections. The agents here are hand-rolled wire peers, which lets
//! the tests watch exactly what crosses each channel.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::archive::{InputPackager, OutputPackager};
use crate::cluster::master::{Master, MasterState};
use crate::config::Policy;
use crate::engine::Reactor;
use crate::graph::Key;
use crate::proto::{
    ExecutionMode, Protobuf, Resource, TaskId, TaskInfo, Topology, TopologyContainer,
    TopologyStream, TopologyVertex, WHOLE,
};
use crate::transport::{Device, InputStreamBuffer, OutputStreamBuffer};

const GIB: u64 = 1 << 30;
const TICK: Duration = Duration::from_secs(30);

fn test_policy() -> Policy {
    Policy {
        execution_mode: ExecutionMode::Local,
        this_host: "127.0.0.1".to_string(),
        master_host: "127.0.0.1".to_string(),
        agent_listener_port: 0,
        graph_listener_port: 0,
        shell_listener_port: 0,
        webui_listener_port: 0,
        frontier_listener_port: 0,
        stdout_listener_port: 0,
        stderr_listener_port: 0,
        stdout_fd: None,
        stderr_fd: None,
        topology_fd: None,
        submit_file: None,
        submit_argv: None,
    }
}

/// A hand-driven wire peer: one device plus its decode buffer.
struct Peer {
    device: Device,
    isbuf: InputStreamBuffer,
}

impl Peer {
    fn new(device: Device) -> Self {
        Self { device, isbuf: InputStreamBuffer::new() }
    }

    async fn send(&self, message: &Protobuf) {
        let osbuf = OutputStreamBuffer::new();
        OutputPackager::new(&osbuf).pack(message);
        let mut wire = vec![0u8; osbuf.out_avail()];
        osbuf.copy(&mut wire);

        let mut sent = 0;
        while sent < wire.len() {
            self.device.writable().await.unwrap();
            match self.device.try_write(&wire[sent..]) {
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("peer write failed: {}", e),
            }
        }
    }

    async fn recv(&self) -> Protobuf {
        loop {
            if let Some(message) = InputPackager::new(&self.isbuf).unpack::<Protobuf>().unwrap() {
                return message;
            }
            self.device.readable().await.unwrap();
            let mut chunk = [0u8; 16 * 1024];
            match self.device.try_read(&mut chunk) {
                Ok(0) => panic!("master hung up mid-conversation"),
                Ok(n) => self.isbuf.feed(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("peer read failed: {}", e),
            }
        }
    }
}

/// Poll the owner until the cluster has registered `count` agents with
/// announced resources.
async fn wait_for_agents(handle: &crate::engine::Handle<MasterState>, count: usize) {
    tokio::time::timeout(TICK, async {
        loop {
            let ready = handle
                .promise(move |r| r.cluster_info().agents.len())
                .await
                .unwrap();
            if ready >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("agents never announced their resources");
}

fn resource(host: &str, cpus: u64) -> Resource {
    Resource {
        host: host.to_string(),
        num_cpus: cpus,
        memory_limit_in_bytes: 8 * GIB,
        space_limit_in_bytes: 16 * GIB,
    }
}

/// Whole-form graph: v0 -> v1 -> v2, one vertex per container, every
/// container one cpu.
fn three_container_graph() -> Topology {
    let mut tpg = Topology::new(WHOLE, WHOLE);
    for v in 0..3 {
        let container = 100 + v;
        tpg.vertices.insert(v, TopologyVertex { key: v, container });
        let mut c = TopologyContainer::new(container);
        c.resource.num_cpus = 1;
        c.resource.memory_limit_in_bytes = GIB;
        c.resource.space_limit_in_bytes = GIB;
        tpg.containers.insert(container, c);
    }
    tpg.streams.insert(10, TopologyStream { key: 10, tail: 0, head: 1 });
    tpg.streams.insert(11, TopologyStream { key: 11, tail: 1, head: 2 });
    tpg
}

// Two agents of two cpus each; three unit containers are placed without
// oversubscription, three clean task reports assemble into the solution,
// and every bin returns to the pool.
#[tokio::test]
async fn placement_completion_and_release() {
    let mut reactor = Reactor::new(MasterState::new(test_policy()));
    Master::setup(&mut reactor);
    let handle = reactor.handle();

    let (a1_side, a1) = Device::pair().unwrap();
    let (a2_side, a2) = Device::pair().unwrap();
    let (g_side, submitter) = Device::pair().unwrap();
    let a1 = Peer::new(a1);
    let a2 = Peer::new(a2);
    let submitter = Peer::new(submitter);

    let loop_task = tokio::spawn(async move {
        reactor.dispatch().await;
    });

    let a1_side = Arc::new(a1_side);
    let a2_side = Arc::new(a2_side);
    let g_side = Arc::new(g_side);
    handle
        .promise(move |r| {
            r.insert_agent(a1_side);
            r.insert_agent(a2_side);
            r.insert_graph(g_side);
        })
        .await
        .unwrap();

    a1.send(&Protobuf::Resource(resource("h1", 2))).await;
    a2.send(&Protobuf::Resource(resource("h2", 2))).await;

    // Both announcements must land before the topology so placement sees
    // the full cluster.
    wait_for_agents(&handle, 2).await;

    submitter.send(&Protobuf::Topology(three_container_graph())).await;

    // Three fragments come out, split across the two agents.
    let mut fragments: Vec<(Key, Topology)> = Vec::new();
    while fragments.len() < 3 {
        let (agent, message) = tokio::time::timeout(TICK, async {
            tokio::select! {
                m = a1.recv() => (1 as Key, m),
                m = a2.recv() => (2 as Key, m),
            }
        })
        .await
        .expect("master never shipped all fragments");
        match message {
            Protobuf::Topology(fragment) => fragments.push((agent, fragment)),
            other => panic!("unexpected message to an agent: {:?}", other.tag()),
        }
    }

    let mut per_agent: HashMap<Key, usize> = HashMap::new();
    for (agent, fragment) in &fragments {
        *per_agent.entry(*agent).or_default() += 1;
        assert!(!fragment.is_whole(), "agents must receive per-container fragments");
        assert_eq!(fragment.containers.len(), 1);
        assert_eq!(fragment.vertices.len(), 1);
        assert_eq!(fragment.runtime.vertex_hosts().len(), 3, "fragment must carry every vertex host");
    }
    for (_, count) in per_agent {
        assert!(count <= 2, "an agent was given more containers than cpus");
    }

    // Report every task done with status zero, from the agent that got it.
    for (agent, fragment) in &fragments {
        let info = TaskInfo::new(fragment.task_id(), format!("h{}", agent), 0);
        match agent {
            1 => a1.send(&Protobuf::TaskInfo(info)).await,
            _ => a2.send(&Protobuf::TaskInfo(info)).await,
        }
    }

    let solution = match tokio::time::timeout(TICK, submitter.recv()).await.unwrap() {
        Protobuf::Solution(solution) => solution,
        other => panic!("submitter expected a solution, got {:?}", other.tag()),
    };
    assert_eq!(solution.task_infos.len(), 3);
    assert!(solution.task_infos.iter().all(|info| info.status == 0));
    assert!(solution.what.is_empty(), "clean completion must carry no error: {}", solution.what);

    // Every cpu bin is back in the pool.
    let info = handle.promise(|r| r.cluster_info()).await.unwrap();
    assert_eq!(info.num_graphs, 0);
    for (_, total, released, tasks) in info.agents {
        assert_eq!(total, released, "resources must return to the pool");
        assert_eq!(tasks, 0);
    }

    handle.break_loop().await.unwrap();
    loop_task.await.unwrap();
}

// A request no agent can hold is refused outright, with the rule named
// in the solution.
#[tokio::test]
async fn oversized_request_is_refused_with_a_reason() {
    let mut reactor = Reactor::new(MasterState::new(test_policy()));
    Master::setup(&mut reactor);
    let handle = reactor.handle();

    let (a_side, agent) = Device::pair().unwrap();
    let (g_side, submitter) = Device::pair().unwrap();
    let agent = Peer::new(agent);
    let submitter = Peer::new(submitter);

    let loop_task = tokio::spawn(async move {
        reactor.dispatch().await;
    });

    let a_side = Arc::new(a_side);
    let g_side = Arc::new(g_side);
    handle
        .promise(move |r| {
            r.insert_agent(a_side);
            r.insert_graph(g_side);
        })
        .await
        .unwrap();

    agent.send(&Protobuf::Resource(resource("h1", 2))).await;
    wait_for_agents(&handle, 1).await;

    let mut tpg = Topology::new(WHOLE, WHOLE);
    tpg.vertices.insert(0, TopologyVertex { key: 0, container: 50 });
    let mut c = TopologyContainer::new(50);
    c.resource.num_cpus = 64;
    c.resource.memory_limit_in_bytes = GIB;
    c.resource.space_limit_in_bytes = GIB;
    tpg.containers.insert(50, c);
    submitter.send(&Protobuf::Topology(tpg)).await;

    let solution = match tokio::time::timeout(TICK, submitter.recv()).await.unwrap() {
        Protobuf::Solution(solution) => solution,
        other => panic!("submitter expected a solution, got {:?}", other.tag()),
    };
    assert!(solution.task_infos.is_empty());
    assert!(solution.what.contains("doesn't fit"), "unexpected reason: {}", solution.what);

    handle.break_loop().await.unwrap();
    loop_task.await.unwrap();
}

// When the submitter disappears mid-run, the master kills the placed
// tasks through their agents.
#[tokio::test]
async fn lost_submitter_kills_placed_tasks() {
    let mut reactor = Reactor::new(MasterState::new(test_policy()));
    Master::setup(&mut reactor);
    let handle = reactor.handle();

    let (a_side, agent) = Device::pair().unwrap();
    let (g_side, submitter) = Device::pair().unwrap();
    let agent = Peer::new(agent);
    let submitter = Peer::new(submitter);

    let loop_task = tokio::spawn(async move {
        reactor.dispatch().await;
    });

    let a_side = Arc::new(a_side);
    let g_side = Arc::new(g_side);
    handle
        .promise(move |r| {
            r.insert_agent(a_side);
            r.insert_graph(g_side);
        })
        .await
        .unwrap();

    agent.send(&Protobuf::Resource(resource("h1", 4))).await;
    wait_for_agents(&handle, 1).await;

    submitter.send(&Protobuf::Topology(three_container_graph())).await;

    let mut tasks: Vec<TaskId> = Vec::new();
    for _ in 0..3 {
        match tokio::time::timeout(TICK, agent.recv()).await.unwrap() {
            Protobuf::Topology(fragment) => tasks.push(fragment.task_id()),
            other => panic!("unexpected message to the agent: {:?}", other.tag()),
        }
    }

    drop(submitter);

    let mut killed: Vec<TaskId> = Vec::new();
    for _ in 0..3 {
        match tokio::time::timeout(TICK, agent.recv()).await.unwrap() {
            Protobuf::KillTask(kill) => killed.push(kill.task_id),
            other => panic!("agent expected kill orders, got {:?}", other.tag()),
        }
    }
    tasks.sort();
    killed.sort();
    assert_eq!(tasks, killed);

    handle.break_loop().await.unwrap();
    loop_task.await.unwrap();
}
