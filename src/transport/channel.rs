// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bi-directional control channel: one device, an input stream event that
//! decodes packager-framed [`Protobuf`] messages, and an output stream
//! event that drains the send buffer whenever the device can take bytes.
//!
//! The write event spends its life disarmed; [`ChannelOstream::send`]
//! thaws it after queueing a frame, and the handler re-thaws itself while
//! bytes remain. EOF, device errors, and undecodable bytes all funnel
//! into the error callback as an [`ErrorCode`], after which the event
//! retires itself; the callback decides whether that means removing a
//! peer or exiting the process.

use std::io;
use std::sync::{Arc, OnceLock};

use crate::archive::{ErrorCode, InputPackager, OutputPackager};
use crate::engine::{Event, Reactor, Signal};
use crate::proto::Protobuf;
use crate::transport::{Device, InputStreamBuffer, OutputStreamBuffer};

/// Called once per decoded message, on a worker.
pub type MessageFn = Arc<dyn Fn(Protobuf) + Send + Sync>;

/// Called once when the channel breaks, with the broken-IO code.
pub type ErrorFn = Arc<dyn Fn(ErrorCode) + Send + Sync>;

/// Cloneable sender half of a channel.
#[derive(Clone)]
pub struct ChannelOstream {
    osbuf: Arc<OutputStreamBuffer>,
    kick: Arc<dyn Fn() + Send + Sync>,
}

impl ChannelOstream {
    /// Queue one framed message and wake the write event.
    pub fn send(&self, message: &Protobuf) -> usize {
        let n = OutputPackager::new(&self.osbuf).pack(message);
        (self.kick)();
        n
    }

    pub fn pending(&self) -> usize {
        self.osbuf.out_avail()
    }

    /// Best-effort synchronous drain, for channels about to be retired
    /// before their write event gets another turn.
    pub fn flush(&self) -> std::io::Result<usize> {
        self.osbuf.flush()
    }
}

/// Wire a device into the reactor as a message channel. Returns the two
/// stream events and the sender half.
pub fn insert_channel<K: Send + 'static>(
    reactor: &mut Reactor<K>,
    device: Arc<Device>,
    on_message: MessageFn,
    on_error: ErrorFn,
) -> (Arc<Event>, Arc<Event>, ChannelOstream) {
    let isbuf = Arc::new(InputStreamBuffer::with_device(Arc::clone(&device)));
    let osbuf = Arc::new(OutputStreamBuffer::with_device(Arc::clone(&device)));

    let read_event = {
        let isbuf = Arc::clone(&isbuf);
        let on_error = Arc::clone(&on_error);
        Event::read(Arc::clone(&device), move |_| {
            let mut eof = false;
            let mut fatal = None;
            loop {
                match isbuf.sync() {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        fatal = Some(ErrorCode::from_io(&e));
                        break;
                    }
                }
            }

            // Whole frames that made it in still get delivered, even when
            // the device died right behind them.
            loop {
                match InputPackager::new(&isbuf).unpack::<Protobuf>() {
                    Ok(Some(message)) => on_message(message),
                    Ok(None) => break,
                    Err(_) => {
                        on_error(ErrorCode::iostream(libc::EPROTO));
                        return Signal::Remove;
                    }
                }
            }

            if let Some(errc) = fatal {
                on_error(errc);
                return Signal::Remove;
            }
            if eof {
                on_error(ErrorCode::eof());
                return Signal::Remove;
            }
            Signal::Default
        })
    };
    let read_event = reactor.insert(read_event);

    // The handler needs its own wakeup hook, which only exists once the
    // event does; the slot breaks the cycle.
    let kick_slot: Arc<OnceLock<Arc<dyn Fn() + Send + Sync>>> = Arc::new(OnceLock::new());

    let write_event = {
        let osbuf = Arc::clone(&osbuf);
        let on_error = Arc::clone(&on_error);
        let kick_slot = Arc::clone(&kick_slot);
        Event::write(Arc::clone(&device), move |_| match osbuf.flush() {
            Ok(_) => {
                if osbuf.out_avail() > 0 {
                    if let Some(kick) = kick_slot.get() {
                        kick();
                    }
                }
                Signal::Default
            }
            Err(e) => {
                on_error(ErrorCode::from_io(&e));
                Signal::Remove
            }
        })
    };
    let write_event = reactor.insert(write_event);

    let handle = reactor.handle();
    let write_id = write_event.id();
    let kick: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        drop(handle.thaw(write_id));
    });
    let _ = kick_slot.set(Arc::clone(&kick));

    (read_event, write_event, ChannelOstream { osbuf, kick })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::graph::Key;
    use crate::proto::{TaskId, TaskInfo};

    // Both channel ends live in one reactor; messages pumped through a
    // socket pair come out in order and intact.
    #[tokio::test]
    async fn messages_cross_a_socket_pair_in_order() {
        let mut reactor = Reactor::new(());
        let handle = reactor.handle();
        let (a, b) = Device::pair().unwrap();

        let received: Arc<Mutex<Vec<Protobuf>>> = Arc::new(Mutex::new(Vec::new()));

        const COUNT: Key = 1000;
        let received_in_handler = Arc::clone(&received);
        let (_, _, _b_tx) = insert_channel(
            &mut reactor,
            Arc::new(b),
            Arc::new(move |message| {
                let mut seen = received_in_handler.lock().unwrap();
                seen.push(message);
                if seen.len() as Key == COUNT {
                    drop(handle.break_loop());
                }
            }),
            Arc::new(|errc| panic!("receiver broke: {}", errc)),
        );

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_in_handler = Arc::clone(&errors);
        let (_, _, a_tx) = insert_channel(
            &mut reactor,
            Arc::new(a),
            Arc::new(|_| {}),
            Arc::new(move |errc| errors_in_handler.lock().unwrap().push(errc)),
        );

        for i in 0..COUNT {
            a_tx.send(&Protobuf::TaskInfo(TaskInfo::new(TaskId::new(i, i), "h", 0)));
        }

        tokio::time::timeout(std::time::Duration::from_secs(20), reactor.dispatch())
            .await
            .expect("channel never delivered everything");

        let received = received.lock().unwrap();
        assert_eq!(received.len(), COUNT as usize);
        for (i, message) in received.iter().enumerate() {
            match message {
                Protobuf::TaskInfo(info) => assert_eq!(info.task_id.graph, i as Key),
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_hangup_surfaces_as_eof() {
        let mut reactor = Reactor::new(());
        let handle = reactor.handle();
        let (a, b) = Device::pair().unwrap();

        let seen: Arc<Mutex<Option<ErrorCode>>> = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        insert_channel(
            &mut reactor,
            Arc::new(b),
            Arc::new(|_| {}),
            Arc::new(move |errc| {
                *seen_in_handler.lock().unwrap() = Some(errc);
                drop(handle.break_loop());
            }),
        );

        drop(a);
        tokio::time::timeout(std::time::Duration::from_secs(5), reactor.dispatch())
            .await
            .expect("hangup never observed");

        assert_eq!(*seen.lock().unwrap(), Some(ErrorCode::eof()));
    }

    #[tokio::test]
    async fn garbage_on_the_wire_is_a_protocol_error() {
        let mut reactor = Reactor::new(());
        let handle = reactor.handle();
        let (a, b) = Device::pair().unwrap();

        let seen: Arc<Mutex<Option<ErrorCode>>> = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        insert_channel(
            &mut reactor,
            Arc::new(b),
            Arc::new(|message| panic!("decoded garbage into {:?}", message)),
            Arc::new(move |errc| {
                *seen_in_handler.lock().unwrap() = Some(errc);
                drop(handle.break_loop());
            }),
        );

        // A frame announcing a variant index that does not exist.
        let mut frame = Vec::new();
        frame.extend_from_slice(&9i64.to_le_bytes());
        frame.push(0xee);
        a.writable().await.unwrap();
        a.try_write(&frame).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), reactor.dispatch())
            .await
            .expect("protocol error never observed");

        assert_eq!(*seen.lock().unwrap(), Some(ErrorCode::iostream(libc::EPROTO)));
    }
}
