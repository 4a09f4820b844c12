// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The unit of reactor work: a timer or an I/O readiness record plus the
//! handler the worker pool runs when it fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::transport::Device;

/// Process-wide event identity. Monotonic, never reused.
pub type EventId = u64;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// What a handler tells the reactor about the event's future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep the event; the reactor re-arms it per its kind.
    Default,
    /// Drop the reactor's ownership of the event.
    Remove,
}

/// Handler run on a worker whenever the event fires.
pub type EventFn = Box<dyn Fn(&Event) -> Signal + Send + Sync>;

pub(crate) enum EventKind {
    /// Fires once, `after` past insertion.
    Timeout { after: Duration },
    /// Re-fires every `period`; `from_now` selects an immediate first shot.
    Periodic { period: Duration, from_now: bool },
    /// Fires when the device has readable bytes.
    Read { device: Arc<Device> },
    /// Fires when the device accepts writes. Not armed until thawed.
    Write { device: Arc<Device> },
}

pub struct Event {
    id: EventId,
    pub(crate) kind: EventKind,
    pub(crate) on: EventFn,
}

impl Event {
    pub fn timeout(after: Duration, on: impl Fn(&Event) -> Signal + Send + Sync + 'static) -> Self {
        Self::new(EventKind::Timeout { after }, on)
    }

    pub fn periodic(
        period: Duration,
        from_now: bool,
        on: impl Fn(&Event) -> Signal + Send + Sync + 'static,
    ) -> Self {
        Self::new(EventKind::Periodic { period, from_now }, on)
    }

    pub fn read(device: Arc<Device>, on: impl Fn(&Event) -> Signal + Send + Sync + 'static) -> Self {
        Self::new(EventKind::Read { device }, on)
    }

    pub fn write(device: Arc<Device>, on: impl Fn(&Event) -> Signal + Send + Sync + 'static) -> Self {
        Self::new(EventKind::Write { device }, on)
    }

    fn new(kind: EventKind, on: impl Fn(&Event) -> Signal + Send + Sync + 'static) -> Self {
        Self { id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed), kind, on: Box::new(on) }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// The device of a READ/WRITE event.
    pub fn device(&self) -> Option<&Arc<Device>> {
        match &self.kind {
            EventKind::Read { device } | EventKind::Write { device } => Some(device),
            _ => None,
        }
    }

    pub(crate) fn is_io(&self) -> bool {
        matches!(self.kind, EventKind::Read { .. } | EventKind::Write { .. })
    }

    /// Resolve when the device side of this event is ready. Readiness
    /// errors also resolve: the handler observes the failure on its next
    /// device operation.
    pub(crate) async fn wait_ready(&self) {
        match &self.kind {
            EventKind::Read { device } => {
                let _ = device.readable().await;
            }
            EventKind::Write { device } => {
                let _ = device.writable().await;
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EventKind::Timeout { .. } => "timeout",
            EventKind::Periodic { .. } => "periodic",
            EventKind::Read { .. } => "read",
            EventKind::Write { .. } => "write",
        };
        f.debug_struct("Event").field("id", &self.id).field("kind", &kind).finish()
    }
}
