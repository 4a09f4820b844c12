// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The executor: a reactor that owns one graph in one of three modes.
//!
//! - **local**: materialize the whole graph in-process, every stream a
//!   socket pair.
//! - **submit**: topologize, ship the whole graph to the master, stand up
//!   stdout/stderr tunnels for the deployed tasks, wait for the solution.
//! - **distributed**: adopt the agent's control socket, receive this
//!   container's fragment, wire intra streams as socket pairs and inter
//!   streams onto the inherited frontier descriptors.
//!
//! Stream teardown policy: removing an istream drops both sides of an
//! intra stream at once; removing an ostream drains the output buffer
//! before the descriptor goes away. A stream marked critical takes the
//! whole process down when either side is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use std::os::unix::io::AsRawFd;

use tokio::net::TcpListener;

use crate::config::Policy;
use crate::engine::{Event, EventId, Handle, Reactor, Signal};
use crate::errors::{
    EngineError, EXIT_BROKEN_CONNECTION, EXIT_CRITICAL_STREAM, EXIT_VERTEX_PROGRAM,
};
use crate::graph::{Graph, InputStream, IstreamFn, Key, OstreamFn, OutputStream, Vertex, VertexFn};
use crate::observability::messages::engine::{
    ExecutorLaunched, OstreamDropped, StreamRetired, VertexProgramExited, VertexProgramSpawned,
};
use crate::observability::messages::StructuredLog;
use crate::proto::{ExecutionMode, Protobuf, Runtime, Solution, ENV_TOPOLOGY_FD};
use crate::transport::{
    insert_channel, restore_cloexec, share_with_child, Device, InputStreamBuffer,
    OutputStreamBuffer,
};

/// Cross-thread face of an executor's reactor.
pub type ExecutorHandle = Handle<ExecutorState>;

/// Sentinel duration that keeps the loop alive while a child runs.
const CHILD_SENTINEL: Duration = Duration::from_secs(365 * 24 * 3600);

/// One stream's runtime wiring inside this executor.
struct StreamRuntime {
    tail: Key,
    head: Key,
    critical: bool,
    intra: bool,
    reader: Option<EventId>,
    writer: Option<EventId>,
    osbuf: Option<Arc<OutputStreamBuffer>>,
    wdevice: Option<Arc<Device>>,
    closing: Arc<AtomicBool>,
    /// Read end destined for a head-side vertex program.
    bridge_r: Option<Arc<Device>>,
    /// Write end destined for a tail-side vertex program.
    bridge_w: Option<Arc<Device>>,
}

impl StreamRuntime {
    fn new(tail: Key, head: Key, critical: bool, intra: bool) -> Self {
        Self {
            tail,
            head,
            critical,
            intra,
            reader: None,
            writer: None,
            osbuf: None,
            wdevice: None,
            closing: Arc::new(AtomicBool::new(false)),
            bridge_r: None,
            bridge_w: None,
        }
    }
}

/// Owner-only executor state; every mutation arrives on an owner turn.
pub struct ExecutorState {
    graph: Graph,
    mode: ExecutionMode,
    policy: Policy,
    runtime: Runtime,
    vertices: HashMap<Key, Arc<Vertex>>,
    streams: HashMap<Key, StreamRuntime>,
    solution: Option<Solution>,
    saved_stdout: Option<i32>,
    saved_stderr: Option<i32>,
}

/// Materializes one graph and drives it to completion.
pub struct Executor {
    reactor: Reactor<ExecutorState>,
}

impl Executor {
    /// Build an executor for `graph`, with the execution mode and the
    /// process wiring taken from the `DTC_*` environment.
    pub fn new(graph: Graph) -> Result<Self, EngineError> {
        let policy = Policy::from_env()?;
        Ok(Self::with_policy(graph, policy))
    }

    /// Build an executor with an explicit policy, bypassing the process
    /// environment.
    pub fn with_policy(graph: Graph, policy: Policy) -> Self {
        let state = ExecutorState {
            graph,
            mode: policy.execution_mode,
            policy,
            runtime: Runtime::from_process_env(),
            vertices: HashMap::new(),
            streams: HashMap::new(),
            solution: None,
            saved_stdout: None,
            saved_stderr: None,
        };
        Self { reactor: Reactor::new(state) }
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.reactor.handle()
    }

    /// Run the three-phase protocol to completion. In submit mode the
    /// master's solution comes back to the caller.
    pub async fn run(mut self) -> Result<Option<Solution>, EngineError> {
        let mode = self.reactor.kernel.mode;
        match mode {
            ExecutionMode::Local => self.reactor.setup_local()?,
            ExecutionMode::Submit => setup_submit(&mut self.reactor).await?,
            ExecutionMode::Distributed => self.reactor.setup_distributed()?,
        }

        ExecutorLaunched {
            mode: mode.as_str(),
            num_vertices: self.reactor.kernel.vertices.len(),
            num_streams: self.reactor.kernel.streams.len(),
        }
        .log();

        self.reactor.dispatch().await;

        if mode == ExecutionMode::Distributed {
            self.reactor.teardown_distributed();
        }

        Ok(self.reactor.kernel.solution.take())
    }
}

impl Reactor<ExecutorState> {
    // ---- setup ---------------------------------------------------------------------------------

    fn setup_local(&mut self) -> Result<(), EngineError> {
        self.kernel.graph.make(None)?;
        self.build_vertices();
        self.wire_streams(&HashMap::new())?;
        self.insert_vertex_events();
        self.insert_probers();
        Ok(())
    }

    fn setup_distributed(&mut self) -> Result<(), EngineError> {
        let fd = self.kernel.policy.topology_fd.ok_or(EngineError::MissingRuntime(ENV_TOPOLOGY_FD))?;
        let device =
            unsafe { Device::adopt_unix(fd) }.map_err(|source| EngineError::BadDescriptor { fd, source })?;

        // Everything the vertices print goes back to the submitter; the
        // original descriptors come back at teardown.
        unsafe {
            self.kernel.saved_stdout = Some(libc::dup(libc::STDOUT_FILENO));
            self.kernel.saved_stderr = Some(libc::dup(libc::STDERR_FILENO));
            if let Some(out) = self.kernel.policy.stdout_fd {
                libc::dup2(out, libc::STDOUT_FILENO);
            }
            if let Some(err) = self.kernel.policy.stderr_fd {
                libc::dup2(err, libc::STDERR_FILENO);
            }
        }

        let handle = self.handle();
        let (_, _, agent_tx) = insert_channel(
            self,
            Arc::new(device),
            Arc::new(move |message| match message {
                Protobuf::Topology(tpg) => {
                    drop(handle.promise(move |r| {
                        if let Err(e) = r.make_distributed(tpg) {
                            tracing::error!(error = %e, "cannot materialize the assigned topology");
                            std::process::exit(EXIT_BROKEN_CONNECTION);
                        }
                    }));
                }
                other => {
                    tracing::warn!(message = other.tag(), "unexpected message on the agent channel");
                }
            }),
            Arc::new(|errc| {
                tracing::error!(errc = %errc, "error on the agent control channel");
                std::process::exit(EXIT_BROKEN_CONNECTION);
            }),
        );
        // The sender half stays alive inside the channel's own events;
        // nothing here writes to the agent unprompted.
        drop(agent_tx);
        Ok(())
    }

    fn teardown_distributed(&mut self) {
        use std::io::Write;
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        unsafe {
            if let Some(saved) = self.kernel.saved_stdout.take() {
                libc::dup2(saved, libc::STDOUT_FILENO);
                libc::close(saved);
            }
            if let Some(saved) = self.kernel.saved_stderr.take() {
                libc::dup2(saved, libc::STDERR_FILENO);
                libc::close(saved);
            }
        }
    }

    /// Materialize a per-container fragment received from the agent.
    fn make_distributed(&mut self, mut tpg: crate::proto::Topology) -> Result<(), EngineError> {
        self.kernel.runtime = tpg.runtime.clone();
        let frontiers = tpg.runtime.frontiers();

        self.kernel.graph.make(Some(&mut tpg))?;
        self.build_vertices();
        self.wire_streams(&frontiers)?;
        self.insert_vertex_events();
        self.insert_probers();

        // The control channel's two events stay up until the agent lets
        // go; everything beyond them is graph work.
        self.set_threshold(2);
        Ok(())
    }

    fn build_vertices(&mut self) {
        let defs: Vec<(Key, Option<String>, Option<String>)> = self
            .kernel
            .graph
            .core
            .vertices
            .values()
            .map(|v| (v.key, v.tag.clone(), v.program.clone()))
            .collect();
        for (key, tag, program) in defs {
            self.kernel.vertices.insert(key, Arc::new(Vertex::new(key, tag, program)));
        }
    }

    /// Allocate a socket pair per intra stream and adopt the inherited
    /// descriptor per inter stream. Every frontier entry must name an
    /// inter stream of this fragment, and every inter stream must have
    /// one.
    fn wire_streams(&mut self, frontiers: &HashMap<Key, i32>) -> Result<(), EngineError> {
        for key in frontiers.keys() {
            if !self.kernel.graph.core.streams.contains_key(key) {
                return Err(EngineError::FrontierUnknown(*key));
            }
        }

        let specs: Vec<(Key, Key, Key, bool)> = self
            .kernel
            .graph
            .core
            .streams
            .values()
            .map(|s| (s.key, s.tail, s.head, s.critical))
            .collect();

        for (key, tail, head, critical) in specs {
            let tail_local = self.kernel.vertices.contains_key(&tail);
            let head_local = self.kernel.vertices.contains_key(&head);
            let intra = tail_local && head_local;
            self.kernel.streams.insert(key, StreamRuntime::new(tail, head, critical, intra));

            match frontiers.get(&key) {
                None => {
                    if !intra {
                        return Err(EngineError::FrontierMissing(key));
                    }
                    let (rdev, wdev) = Device::pair()?;
                    self.insert_istream(key, Arc::new(rdev));
                    self.insert_ostream(key, Arc::new(wdev));
                }
                Some(&fd) => {
                    if intra {
                        return Err(EngineError::FrontierUnknown(key));
                    }
                    let device = Arc::new(
                        unsafe { Device::adopt_tcp(fd) }
                            .map_err(|source| EngineError::BadDescriptor { fd, source })?,
                    );
                    if head_local {
                        self.insert_istream(key, device);
                    } else {
                        self.insert_ostream(key, device);
                    }
                }
            }
        }
        Ok(())
    }

    // ---- stream wiring -------------------------------------------------------------------------

    fn insert_istream(&mut self, key: Key, device: Arc<Device>) {
        let (on_user, head_key): (Option<IstreamFn>, Key) = {
            let def = &self.kernel.graph.core.streams[&key];
            (def.on_istream.clone(), def.head)
        };
        let head = self
            .kernel
            .vertices
            .get(&head_key)
            .cloned()
            .unwrap_or_else(|| unreachable!("istream head must be local"));

        // A program vertex gets the raw descriptor; the reactor never
        // touches it.
        if head.program().is_some() {
            self.kernel.streams.get_mut(&key).unwrap_or_else(|| unreachable!()).bridge_r =
                Some(device);
            return;
        }

        head.attach_istream(key);
        let isbuf = Arc::new(InputStreamBuffer::with_device(Arc::clone(&device)));
        let istream = InputStream::new(key, Arc::clone(&isbuf));
        let handle = self.handle();

        let event = self.insert(Event::read(device, move |_| {
            let mut ended = false;
            loop {
                match isbuf.sync() {
                    Ok(0) => {
                        ended = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        ended = true;
                        break;
                    }
                }
            }

            let mut signal = Signal::Default;
            if istream.in_avail() > 0 || ended {
                if let Some(cb) = &on_user {
                    signal = cb(&head, &istream);
                }
            }

            if ended || signal == Signal::Remove {
                drop(handle.promise(move |r| r.retire_istream(key)));
                return Signal::Remove;
            }
            Signal::Default
        }));

        self.kernel.streams.get_mut(&key).unwrap_or_else(|| unreachable!()).reader =
            Some(event.id());
    }

    fn insert_ostream(&mut self, key: Key, device: Arc<Device>) {
        let (on_user, tail_key): (Option<OstreamFn>, Key) = {
            let def = &self.kernel.graph.core.streams[&key];
            (def.on_ostream.clone(), def.tail)
        };
        let has_on_ostream = on_user.is_some();
        let tail = self
            .kernel
            .vertices
            .get(&tail_key)
            .cloned()
            .unwrap_or_else(|| unreachable!("ostream tail must be local"));

        if tail.program().is_some() {
            self.kernel.streams.get_mut(&key).unwrap_or_else(|| unreachable!()).bridge_w =
                Some(device);
            return;
        }

        let osbuf = Arc::new(OutputStreamBuffer::with_device(Arc::clone(&device)));
        let closing = Arc::new(AtomicBool::new(false));
        let kick_slot: Arc<OnceLock<Arc<dyn Fn() + Send + Sync>>> = Arc::new(OnceLock::new());

        let handle = self.handle();
        let ostream = OutputStream::new(
            key,
            Arc::clone(&osbuf),
            {
                let kick_slot = Arc::clone(&kick_slot);
                Arc::new(move || {
                    if let Some(kick) = kick_slot.get() {
                        kick();
                    }
                })
            },
            {
                let handle = handle.clone();
                Arc::new(move || {
                    drop(handle.promise(move |r| r.retire_ostream(key)));
                })
            },
        );

        let event = {
            let osbuf = Arc::clone(&osbuf);
            let closing = Arc::clone(&closing);
            let kick_slot = Arc::clone(&kick_slot);
            let ostream = ostream.clone();
            let tail = Arc::clone(&tail);
            let handle = handle.clone();
            self.insert(Event::write(Arc::clone(&device), move |_| {
                let mut signal = Signal::Default;
                if !closing.load(Ordering::Acquire) {
                    if let Some(cb) = &on_user {
                        signal = cb(&tail, &ostream);
                    }
                }

                if osbuf.flush().is_err() {
                    drop(handle.promise(move |r| r.retire_ostream(key)));
                    return Signal::Default;
                }

                if closing.load(Ordering::Acquire) && osbuf.out_avail() == 0 {
                    drop(handle.promise(move |r| r.finish_ostream(key)));
                    return Signal::Default;
                }

                if osbuf.out_avail() > 0 {
                    if let Some(kick) = kick_slot.get() {
                        kick();
                    }
                }
                if signal == Signal::Remove {
                    drop(handle.promise(move |r| r.retire_ostream(key)));
                }
                Signal::Default
            }))
        };

        let write_id = event.id();
        let arm = self.handle();
        let _ = kick_slot.set(Arc::new(move || {
            drop(arm.thaw(write_id));
        }));

        {
            let srt = self.kernel.streams.get_mut(&key).unwrap_or_else(|| unreachable!());
            srt.writer = Some(write_id);
            srt.osbuf = Some(osbuf);
            srt.wdevice = Some(device);
            srt.closing = closing;
        }
        tail.attach_ostream(ostream);

        // A producer-side callback wants one shot as soon as the device
        // is writable.
        if has_on_ostream {
            self.thaw(write_id);
        }
    }

    // ---- stream removal ------------------------------------------------------------------------

    /// Release a stream from its consumer side. Intra streams drop both
    /// ends; a critical stream takes the process with it.
    pub(crate) fn retire_istream(&mut self, key: Key) {
        let (critical, intra, reader, writer, tail) = {
            let Some(srt) = self.kernel.streams.get_mut(&key) else {
                return;
            };
            if srt.reader.is_none() {
                return;
            }
            let reader = srt.reader.take();
            let writer = if srt.intra { srt.writer.take() } else { None };
            if srt.intra {
                srt.osbuf = None;
                srt.wdevice = None;
            }
            (srt.critical, srt.intra, reader, writer, srt.tail)
        };

        if critical {
            tracing::error!(stream = key, "critical stream broke");
            std::process::exit(EXIT_CRITICAL_STREAM);
        }

        StreamRetired { stream: key, side: "input" }.log();
        if let Some(id) = reader {
            self.remove(id);
        }
        if let Some(id) = writer {
            self.remove(id);
        }
        if intra {
            if let Some(vertex) = self.kernel.vertices.get(&tail).cloned() {
                vertex.detach_ostream(key);
            }
        }
    }

    /// Release a stream from its producer side: flush-on-close. The
    /// buffer drains first; whatever the device refuses to take when it
    /// dies is dropped and logged.
    pub(crate) fn retire_ostream(&mut self, key: Key) {
        enum Next {
            Finish,
            FinishDropped(usize),
            Drain(EventId),
        }

        let (critical, next) = {
            let Some(srt) = self.kernel.streams.get_mut(&key) else {
                return;
            };
            let Some(writer) = srt.writer else {
                return;
            };
            srt.closing.store(true, Ordering::Release);
            let next = match &srt.osbuf {
                None => Next::Finish,
                Some(osbuf) => match osbuf.flush() {
                    Ok(_) if osbuf.out_avail() == 0 => Next::Finish,
                    Ok(_) => Next::Drain(writer),
                    Err(_) => Next::FinishDropped(osbuf.out_avail()),
                },
            };
            (srt.critical, next)
        };

        if critical {
            tracing::error!(stream = key, "critical stream broke");
            std::process::exit(EXIT_CRITICAL_STREAM);
        }

        match next {
            Next::Finish => self.finish_ostream(key),
            Next::FinishDropped(unflushed) => {
                OstreamDropped { stream: key, unflushed }.log();
                self.finish_ostream(key);
            }
            Next::Drain(writer) => {
                self.thaw(writer);
            }
        }
    }

    /// Terminal half of the ostream removal: the buffer is empty (or
    /// abandoned) and the descriptor can go.
    pub(crate) fn finish_ostream(&mut self, key: Key) {
        let (writer, tail) = {
            let Some(srt) = self.kernel.streams.get_mut(&key) else {
                return;
            };
            let writer = srt.writer.take();
            if let Some(device) = srt.wdevice.take() {
                device.close_write();
            }
            srt.osbuf = None;
            (writer, srt.tail)
        };

        if let Some(vertex) = self.kernel.vertices.get(&tail).cloned() {
            vertex.detach_ostream(key);
        }
        StreamRetired { stream: key, side: "output" }.log();
        if let Some(id) = writer {
            self.remove(id);
        }
    }

    // ---- vertices and probers ------------------------------------------------------------------

    fn insert_vertex_events(&mut self) {
        let items: Vec<(Arc<Vertex>, Option<VertexFn>)> = self
            .kernel
            .graph
            .core
            .vertices
            .values()
            .map(|def| {
                let vertex = self.kernel.vertices[&def.key].clone();
                (vertex, def.on.clone())
            })
            .collect();

        for (vertex, on) in items {
            let handle = self.handle();
            self.insert(Event::timeout(Duration::ZERO, move |_| {
                if let Some(cb) = &on {
                    cb(&vertex);
                }
                if vertex.program().is_some() {
                    let key = vertex.key();
                    drop(handle.promise(move |r| r.spawn_vertex_program(key)));
                }
                Signal::Default
            }));
        }
    }

    fn insert_probers(&mut self) {
        let items: Vec<(Arc<Vertex>, Duration, Option<crate::graph::ProberFn>)> = self
            .kernel
            .graph
            .core
            .probers
            .values()
            .filter_map(|def| {
                let vertex = self.kernel.vertices.get(&def.vertex)?.clone();
                match def.period {
                    Some(period) => Some((vertex, period, def.on.clone())),
                    None => {
                        tracing::warn!(vertex = def.vertex, "prober without a period is ignored");
                        None
                    }
                }
            })
            .collect();

        for (vertex, period, on) in items {
            self.insert(Event::periodic(period, false, move |_| match &on {
                Some(cb) => cb(&vertex),
                None => Signal::Remove,
            }));
        }
    }

    // ---- vertex programs -----------------------------------------------------------------------

    /// Fork a vertex's external program with its stream descriptors
    /// bridged into the child environment.
    pub(crate) fn spawn_vertex_program(&mut self, vertex_key: Key) {
        let Some(vertex) = self.kernel.vertices.get(&vertex_key).cloned() else {
            return;
        };
        let Some(command) = vertex.program().map(str::to_string) else {
            return;
        };

        let mut bridge_devices = Vec::new();
        let mut bridge_fds = Vec::new();
        for (skey, srt) in &self.kernel.streams {
            if srt.head == vertex_key {
                if let Some(device) = &srt.bridge_r {
                    bridge_devices.push(Arc::clone(device));
                    bridge_fds.push((*skey, device.as_raw_fd()));
                }
            }
            if srt.tail == vertex_key {
                if let Some(device) = &srt.bridge_w {
                    bridge_devices.push(Arc::clone(device));
                    bridge_fds.push((*skey, device.as_raw_fd()));
                }
            }
        }

        let mut runtime = self.kernel.runtime.clone();
        runtime.set_bridges(bridge_fds.iter().copied());
        runtime.set_program(command.as_str());

        let argv: Vec<&str> = command.split_whitespace().collect();
        if argv.is_empty() {
            tracing::error!(vertex = vertex_key, "vertex program command is empty");
            std::process::exit(EXIT_VERTEX_PROGRAM);
        }

        for device in &bridge_devices {
            let _ = share_with_child(device);
        }

        let mut cmd = tokio::process::Command::new(argv[0]);
        cmd.args(&argv[1..]);
        for (name, value) in runtime.iter() {
            cmd.env(name, value);
        }

        let spawned = cmd.spawn();
        for device in &bridge_devices {
            let _ = restore_cloexec(device);
        }

        match spawned {
            Ok(mut child) => {
                VertexProgramSpawned {
                    vertex: vertex_key,
                    command: &command,
                    num_bridges: bridge_fds.len(),
                }
                .log();

                // The sentinel holds the loop open until the child is
                // reaped; its removal is the reap notification.
                let sentinel = self.insert(Event::timeout(CHILD_SENTINEL, |_| Signal::Default));
                let sentinel_id = sentinel.id();
                let handle = self.handle();
                tokio::spawn(async move {
                    let status = child.wait().await;
                    drop(handle.promise(move |r| {
                        r.remove(sentinel_id);
                        let success = matches!(&status, Ok(s) if s.success());
                        VertexProgramExited { vertex: vertex_key, success }.log();
                        if !success {
                            std::process::exit(EXIT_VERTEX_PROGRAM);
                        }
                    }));
                });
            }
            Err(e) => {
                tracing::error!(vertex = vertex_key, error = %e, "failed to spawn vertex program");
                std::process::exit(EXIT_VERTEX_PROGRAM);
            }
        }
    }
}

// ---- submit mode -------------------------------------------------------------------------------

/// Topologize the graph, open the standard-stream tunnels, ship the whole
/// topology to the master, and wait for a solution.
async fn setup_submit(reactor: &mut Reactor<ExecutorState>) -> Result<(), EngineError> {
    let policy = reactor.kernel.policy.clone();

    let stdout_listener =
        TcpListener::bind((policy.this_host.as_str(), policy.stdout_listener_port)).await?;
    let stderr_listener =
        TcpListener::bind((policy.this_host.as_str(), policy.stderr_listener_port)).await?;
    let stdout_port = stdout_listener.local_addr()?.port();
    let stderr_port = stderr_listener.local_addr()?.port();

    tokio::spawn(pump_tunnel(stdout_listener, false));
    tokio::spawn(pump_tunnel(stderr_listener, true));

    let mut tpg = reactor.kernel.graph.topologize()?;
    tpg.runtime.set_execution_mode(ExecutionMode::Submit);
    if tpg.runtime.this_host().is_none() {
        tpg.runtime.set_this_host(policy.this_host.clone());
    }
    tpg.runtime.set_stdout_listener_port(stdout_port);
    tpg.runtime.set_stderr_listener_port(stderr_port);

    tracing::info!(
        master = %policy.master_host,
        port = policy.graph_listener_port,
        stdout_port,
        stderr_port,
        "submitting graph to master"
    );

    let device = Device::connect(&policy.master_host, policy.graph_listener_port).await?;

    let handle = reactor.handle();
    let (_, _, master_tx) = insert_channel(
        reactor,
        Arc::new(device),
        Arc::new(move |message| match message {
            Protobuf::Solution(solution) => {
                drop(handle.promise(move |r| {
                    r.kernel.solution = Some(solution);
                }));
                drop(handle.break_loop());
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

    master_tx.send(&Protobuf::Topology(tpg));
    Ok(())
}

/// Accept standard-stream tunnel connections from deployed executors and
/// echo them onto our own stdio.
async fn pump_tunnel(listener: TcpListener, to_stderr: bool) {
    loop {
        match listener.accept().await {
            Ok((mut socket, _)) => {
                tokio::spawn(async move {
                    if to_stderr {
                        let _ = tokio::io::copy(&mut socket, &mut tokio::io::stderr()).await;
                    } else {
                        let _ = tokio::io::copy(&mut socket, &mut tokio::io::stdout()).await;
                    }
                });
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::graph::Graph;

    fn local_policy() -> Policy {
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

    // A linear graph a -> b: a emits 0..99 and closes; b accumulates.
    #[tokio::test]
    async fn local_linear_graph_delivers_everything_in_order() {
        let collected: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        let a = g
            .vertex()
            .on(|v| {
                for i in 0..100i64 {
                    v.broadcast(&i);
                }
                for key in v.ostream_keys() {
                    v.ostream(key).unwrap().close();
                }
            })
            .key();
        let b = g.vertex().key();

        let sink = Arc::clone(&collected);
        g.stream(a, b).on_istream(move |_, istream| {
            while let Ok(Some(value)) = istream.recv::<i64>() {
                sink.lock().unwrap().push(value);
            }
            Signal::Default
        });

        let executor = Executor::with_policy(g, local_policy());
        tokio::time::timeout(Duration::from_secs(20), executor.run())
            .await
            .expect("local graph never drained")
            .unwrap();

        assert_eq!(*collected.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    // Ten thousand random-length strings through one stream, in order.
    #[tokio::test]
    async fn socket_pair_stream_carries_bulk_strings() {
        use rand::{Rng, SeedableRng};

        let sent: Arc<Vec<String>> = Arc::new({
            let mut rng = rand::rngs::StdRng::seed_from_u64(42);
            (0..10_000)
                .map(|i| {
                    let len = rng.gen_range(0..64);
                    format!("{:05}:{}", i, "x".repeat(len))
                })
                .collect()
        });
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        let to_send = Arc::clone(&sent);
        let a = g
            .vertex()
            .on(move |v| {
                for value in to_send.iter() {
                    v.broadcast(value);
                }
                for key in v.ostream_keys() {
                    v.ostream(key).unwrap().close();
                }
            })
            .key();
        let b = g.vertex().key();

        let sink = Arc::clone(&received);
        g.stream(a, b).on_istream(move |_, istream| {
            while let Ok(Some(value)) = istream.recv::<String>() {
                sink.lock().unwrap().push(value);
            }
            Signal::Default
        });

        let executor = Executor::with_policy(g, local_policy());
        tokio::time::timeout(Duration::from_secs(60), executor.run())
            .await
            .expect("bulk stream never drained")
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), sent.len());
        assert_eq!(&*received, &*sent);
    }

    // A prober ticks until it asks to be removed; the executor then runs
    // out of events and stops.
    #[tokio::test]
    async fn prober_ticks_and_retires() {
        use std::sync::atomic::AtomicUsize;

        let ticks = Arc::new(AtomicUsize::new(0));

        let mut g = Graph::new();
        let a = g.vertex().key();
        let counter = Arc::clone(&ticks);
        g.prober(a).period(Duration::from_millis(5)).on(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                Signal::Remove
            } else {
                Signal::Default
            }
        });

        let executor = Executor::with_policy(g, local_policy());
        tokio::time::timeout(Duration::from_secs(10), executor.run())
            .await
            .expect("prober graph never stopped")
            .unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    // An istream callback can end the stream early from the consumer
    // side; both ends of the intra pair go away.
    #[tokio::test]
    async fn consumer_can_retire_a_stream_early() {
        let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

        let mut g = Graph::new();
        let a = g
            .vertex()
            .on(|v| {
                for i in 0..10i64 {
                    v.broadcast(&i);
                }
                // The producer never closes; the consumer gives up first.
            })
            .key();
        let b = g.vertex().key();

        let sink = Arc::clone(&seen);
        g.stream(a, b).on_istream(move |_, istream| {
            while let Ok(Some(value)) = istream.recv::<i64>() {
                sink.lock().unwrap().push(value);
                if value >= 4 {
                    return Signal::Remove;
                }
            }
            Signal::Default
        });

        let executor = Executor::with_policy(g, local_policy());
        tokio::time::timeout(Duration::from_secs(10), executor.run())
            .await
            .expect("early retirement never drained the loop")
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 5, "consumer saw {} values before retiring", seen.len());
        assert_eq!(seen[..5], [0, 1, 2, 3, 4]);
    }
}
