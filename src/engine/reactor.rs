// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Single-owner event loop with a worker pool.
//!
//! Exactly one task owns a [`Reactor`] and is the only place its event set
//! mutates. Every other thread talks to it through [`Handle::promise`]: a
//! closure enqueued on the loop channel, run synchronously on the owner's
//! next turn, its result delivered through a future. Handlers themselves
//! run on the runtime's worker pool, so handlers of different events
//! execute in parallel while one event never races itself: an I/O event
//! leaves the demux before its handler starts and is re-armed only after
//! the handler returns [`Signal::Default`].
//!
//! The reactor is generic over a kernel state `K`. The master, agent, and
//! executor are reactors whose promises close over `&mut Reactor<K>`,
//! which keeps all their maps owner-only without a single lock.
//!
//! Activation rules:
//! - READ: one-shot readiness, handler on a worker, re-armed on `Default`.
//! - WRITE: armed only by `thaw`; `Default` leaves it disarmed so output
//!   buffers decide when writability matters again.
//! - TIMEOUT: leaves the event set before its handler runs.
//! - PERIODIC: next deadline is `sync_time + period` once the handler is
//!   done.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::poll_fn;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Expired, Key as TimerKey};

use crate::engine::event::{Event, EventId, EventKind, Signal};
use crate::errors::EngineError;

type PromiseFn<K> = Box<dyn FnOnce(&mut Reactor<K>) + Send>;

/// One shot at the timer heap's next due entry.
fn next_expired(
    timers: &mut DelayQueue<EventId>,
) -> impl std::future::Future<Output = Option<Expired<EventId>>> + '_ {
    poll_fn(move |cx| timers.poll_expired(cx))
}

enum Msg<K> {
    /// Run a closure on the owner turn.
    Promise(PromiseFn<K>),
    /// An I/O waiter observed readiness.
    Ready(EventId),
    /// A worker finished a handler.
    Done(EventId, Signal),
}

/// Result of a promised closure; resolves once the owner ran it.
pub struct Promise<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> Future for Promise<R> {
    type Output = Result<R, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.map_err(|_| EngineError::LoopGone))
    }
}

/// Cross-thread face of a reactor. Cheap to clone; every operation is a
/// promise funneled through the loop channel, which doubles as the
/// owner's wakeup notifier.
pub struct Handle<K> {
    tx: mpsc::UnboundedSender<Msg<K>>,
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<K: Send + 'static> Handle<K> {
    /// Enqueue `f` for the owner's next turn and hand back its result.
    pub fn promise<R, F>(&self, f: F) -> Promise<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Reactor<K>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(Msg::Promise(Box::new(move |reactor| {
            let _ = tx.send(f(reactor));
        })));
        Promise { rx }
    }

    pub fn insert(&self, event: Event) -> Promise<Arc<Event>> {
        self.promise(move |r| r.insert(event))
    }

    pub fn remove(&self, id: EventId) -> Promise<bool> {
        self.promise(move |r| r.remove(id))
    }

    pub fn freeze(&self, id: EventId) -> Promise<bool> {
        self.promise(move |r| r.freeze(id))
    }

    pub fn thaw(&self, id: EventId) -> Promise<bool> {
        self.promise(move |r| r.thaw(id))
    }

    pub fn break_loop(&self) -> Promise<bool> {
        self.promise(|r| {
            if r.break_loop {
                false
            } else {
                r.break_loop = true;
                true
            }
        })
    }

    pub(crate) fn send_done(&self, id: EventId, signal: Signal) {
        let _ = self.tx.send(Msg::Done(id, signal));
    }
}

/// The event loop. See the module docs for the ownership rules.
pub struct Reactor<K> {
    /// User state mutated only on owner turns.
    pub kernel: K,

    tx: mpsc::UnboundedSender<Msg<K>>,
    rx: mpsc::UnboundedReceiver<Msg<K>>,

    events: HashMap<EventId, Arc<Event>>,
    timers: DelayQueue<EventId>,
    timer_keys: HashMap<EventId, TimerKey>,
    deadlines: HashMap<EventId, Instant>,
    waiters: HashMap<EventId, JoinHandle<()>>,

    sync_time: Instant,
    break_loop: bool,
    threshold: usize,
    break_loop_on: Option<Box<dyn Fn(&Reactor<K>) -> bool + Send>>,
}

impl<K: Send + 'static> Reactor<K> {
    pub fn new(kernel: K) -> Self {
        // Writing into a hung-up peer must surface as an error code on the
        // write, not kill the process.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kernel,
            tx,
            rx,
            events: HashMap::new(),
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
            deadlines: HashMap::new(),
            waiters: HashMap::new(),
            sync_time: Instant::now(),
            break_loop: false,
            threshold: 0,
            break_loop_on: None,
        }
    }

    pub fn handle(&self) -> Handle<K> {
        Handle { tx: self.tx.clone() }
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// The loop exits once `num_events()` drops to this value.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Extra user-supplied stop predicate, checked once per turn.
    pub fn break_loop_on(&mut self, predicate: impl Fn(&Reactor<K>) -> bool + Send + 'static) {
        self.break_loop_on = Some(Box::new(predicate));
    }

    pub fn sync_time(&self) -> Instant {
        self.sync_time
    }

    /// Insert an event and arm it per its kind. WRITE events start
    /// disarmed; `thaw` arms them once there is something to write.
    pub fn insert(&mut self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        self.events.insert(event.id(), Arc::clone(&event));
        match &event.kind {
            EventKind::Timeout { after } => {
                let deadline = Instant::now() + *after;
                self.arm_timer(event.id(), deadline);
            }
            EventKind::Periodic { period, from_now } => {
                let deadline =
                    if *from_now { Instant::now() } else { Instant::now() + *period };
                self.arm_timer(event.id(), deadline);
            }
            EventKind::Read { .. } => self.spawn_waiter(&event),
            EventKind::Write { .. } => {}
        }
        event
    }

    /// Drop the reactor's ownership. An in-flight handler finishes but the
    /// event never fires again; the last `Arc` may die on a worker.
    pub fn remove(&mut self, id: EventId) -> bool {
        if self.events.remove(&id).is_none() {
            return false;
        }
        self.disarm(id);
        self.deadlines.remove(&id);
        true
    }

    /// Keep the event alive but out of the demux / timer heap.
    pub fn freeze(&mut self, id: EventId) -> bool {
        if !self.events.contains_key(&id) {
            return false;
        }
        self.disarm(id);
        true
    }

    /// Re-arm a frozen (or disarmed WRITE) event.
    pub fn thaw(&mut self, id: EventId) -> bool {
        let Some(event) = self.events.get(&id).cloned() else {
            return false;
        };
        match &event.kind {
            EventKind::Timeout { after } => {
                if !self.timer_keys.contains_key(&id) {
                    let deadline =
                        self.deadlines.get(&id).copied().unwrap_or_else(|| Instant::now() + *after);
                    self.arm_timer(id, deadline.max(Instant::now()));
                }
            }
            EventKind::Periodic { period, .. } => {
                if !self.timer_keys.contains_key(&id) {
                    let deadline = self.deadlines.get(&id).copied().unwrap_or(self.sync_time + *period);
                    self.arm_timer(id, deadline.max(Instant::now()));
                }
            }
            EventKind::Read { .. } | EventKind::Write { .. } => {
                if !self.waiters.contains_key(&id) {
                    self.spawn_waiter(&event);
                }
            }
        }
        true
    }

    /// Run the loop to completion. Each turn: drain promises, check the
    /// stop conditions, sleep on readiness or the nearest deadline, then
    /// fire everything due against the refreshed sync time.
    pub async fn dispatch(&mut self) {
        self.break_loop = false;

        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.on_msg(msg);
            }

            if self.should_break() {
                break;
            }

            let timers_armed = !self.timers.is_empty();
            tokio::select! {
                biased;
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => {
                            self.sync_time = Instant::now();
                            self.on_msg(msg);
                        }
                        None => break,
                    }
                }
                Some(expired) = next_expired(&mut self.timers), if timers_armed => {
                    self.sync_time = Instant::now();
                    self.fire_timer(expired.into_inner());
                    // Everything else already due fires on the same turn,
                    // in deadline order.
                    while let Some(Some(expired)) = next_expired(&mut self.timers).now_or_never() {
                        self.fire_timer(expired.into_inner());
                    }
                }
            }
        }

        self.break_loop = true;
    }

    fn should_break(&mut self) -> bool {
        if self.break_loop || self.events.len() <= self.threshold {
            return true;
        }
        if let Some(predicate) = self.break_loop_on.take() {
            let stop = predicate(self);
            self.break_loop_on = Some(predicate);
            if stop {
                return true;
            }
        }
        false
    }

    fn on_msg(&mut self, msg: Msg<K>) {
        match msg {
            Msg::Promise(f) => f(self),
            Msg::Ready(id) => {
                // A readiness report with no waiter entry is stale: the
                // event was frozen or removed after the report was sent.
                if self.waiters.remove(&id).is_some() {
                    if let Some(event) = self.events.get(&id).cloned() {
                        self.activate(event);
                    }
                }
            }
            Msg::Done(id, signal) => self.on_done(id, signal),
        }
    }

    fn fire_timer(&mut self, id: EventId) {
        self.timer_keys.remove(&id);
        if let Some(event) = self.events.get(&id).cloned() {
            self.activate(event);
        }
    }

    /// Hand one fired event to the worker pool.
    fn activate(&mut self, event: Arc<Event>) {
        if matches!(event.kind, EventKind::Timeout { .. }) {
            // A one-shot leaves the reactor before its handler runs.
            self.events.remove(&event.id());
            self.deadlines.remove(&event.id());
        }

        let handle = self.handle();
        tokio::spawn(async move {
            let signal = (event.on)(&event);
            handle.send_done(event.id(), signal);
        });
    }

    fn on_done(&mut self, id: EventId, signal: Signal) {
        let Some(event) = self.events.get(&id).cloned() else {
            return;
        };
        match signal {
            Signal::Remove => {
                self.remove(id);
            }
            Signal::Default => match &event.kind {
                EventKind::Read { .. } => self.spawn_waiter(&event),
                // Disarmed until the owner of the output buffer thaws it.
                EventKind::Write { .. } => {}
                EventKind::Periodic { period, .. } => {
                    let deadline = self.sync_time + *period;
                    self.arm_timer(id, deadline);
                }
                EventKind::Timeout { .. } => {}
            },
        }
    }

    fn arm_timer(&mut self, id: EventId, deadline: Instant) {
        self.deadlines.insert(id, deadline);
        let key = self.timers.insert_at(id, deadline);
        self.timer_keys.insert(id, key);
    }

    fn disarm(&mut self, id: EventId) {
        if let Some(key) = self.timer_keys.remove(&id) {
            let _ = self.timers.try_remove(&key);
        }
        if let Some(waiter) = self.waiters.remove(&id) {
            waiter.abort();
        }
    }

    fn spawn_waiter(&mut self, event: &Arc<Event>) {
        debug_assert!(event.is_io());
        let tx = self.tx.clone();
        let id = event.id();
        let event = Arc::clone(event);
        let waiter = tokio::spawn(async move {
            event.wait_ready().await;
            let _ = tx.send(Msg::Ready(event.id()));
        });
        self.waiters.insert(id, waiter);
    }
}

impl<K> Drop for Reactor<K> {
    fn drop(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            waiter.abort();
        }
    }
}
