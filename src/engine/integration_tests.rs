// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Reactor behavior tests: timer ordering, promise ordering, one-shot
//! readiness, and the remove/freeze/thaw lifecycle.
//!
//! Timer tests run on the current-thread runtime so that handler spawn
//! order is observation order, and with paused time so deadlines are
//! exact rather than best-effort.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::engine::{Event, Reactor, Signal};
use crate::transport::Device;

#[tokio::test(start_paused = true)]
async fn expired_timeouts_fire_in_deadline_order() {
    let mut reactor = Reactor::new(());
    let log: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let t0 = Instant::now();

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for _ in 0..100 {
        let after = Duration::from_micros(rng.gen_range(1_000..50_000));
        let deadline = t0 + after;
        let log = Arc::clone(&log);
        reactor.insert(Event::timeout(after, move |_| {
            log.lock().unwrap().push((Instant::now(), deadline));
            Signal::Default
        }));
    }

    reactor.dispatch().await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 100);
    for window in log.windows(2) {
        assert!(window[0].1 <= window[1].1, "deadlines dispatched out of order");
    }
    for (dispatched, deadline) in log.iter() {
        assert!(dispatched >= deadline, "handler ran before its deadline");
    }
}

#[tokio::test(start_paused = true)]
async fn periodic_event_refires_until_removed() {
    let mut reactor = Reactor::new(());
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_in_handler = Arc::clone(&hits);
    reactor.insert(Event::periodic(Duration::from_millis(10), false, move |_| {
        if hits_in_handler.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
            Signal::Remove
        } else {
            Signal::Default
        }
    }));

    reactor.dispatch().await;
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn promises_observe_owner_state_in_order() {
    let mut reactor = Reactor::new(Vec::<usize>::new());
    let handle = reactor.handle();

    // Keep the loop alive until the spawned task says otherwise.
    reactor.insert(Event::periodic(Duration::from_secs(3600), false, |_| Signal::Default));

    let pusher = tokio::spawn(async move {
        for i in 0..32 {
            let appended = handle.promise(move |r| {
                r.kernel.push(i);
                r.kernel.len()
            });
            // The future resolves only after the closure ran on the owner
            // and saw every previously promised mutation.
            assert_eq!(appended.await.unwrap(), i + 1);
        }
        handle.break_loop().await.unwrap();
    });

    reactor.dispatch().await;
    pusher.await.unwrap();
    assert_eq!(reactor.kernel, (0..32).collect::<Vec<_>>());
}

#[tokio::test]
async fn read_event_drains_without_reentry() {
    let mut reactor = Reactor::new(());
    let (tail, head) = Device::pair().unwrap();
    let head = Arc::new(head);

    const TOTAL: usize = 64 * 1024;
    let payload = vec![0xabu8; TOTAL];
    let mut written = 0;
    while written < TOTAL {
        tail.writable().await.unwrap();
        written += tail.try_write(&payload[written..]).unwrap();
    }
    drop(tail);

    let received = Arc::new(AtomicUsize::new(0));
    let fires = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicBool::new(false));

    let received_in_handler = Arc::clone(&received);
    let fires_in_handler = Arc::clone(&fires);
    let in_flight_in_handler = Arc::clone(&in_flight);
    reactor.insert(Event::read(Arc::clone(&head), move |event| {
        assert!(
            !in_flight_in_handler.swap(true, Ordering::SeqCst),
            "handler re-entered while running"
        );
        fires_in_handler.fetch_add(1, Ordering::SeqCst);

        let device = event.device().unwrap();
        let mut chunk = [0u8; 4096];
        let signal = loop {
            match device.try_read(&mut chunk) {
                Ok(0) => break Signal::Remove,
                Ok(n) => {
                    received_in_handler.fetch_add(n, Ordering::SeqCst);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break Signal::Default,
                Err(e) => panic!("device error: {}", e),
            }
        };

        in_flight_in_handler.store(false, Ordering::SeqCst);
        signal
    }));

    reactor.dispatch().await;

    assert_eq!(received.load(Ordering::SeqCst), TOTAL);
    let fires = fires.load(Ordering::SeqCst);
    assert!(fires >= 1, "read event never fired");
    assert!(fires <= TOTAL / 4096 + 2, "read event fired more often than the data supports");
}

#[tokio::test(start_paused = true)]
async fn removed_event_never_fires_again() {
    let mut reactor = Reactor::new(());
    let handle = reactor.handle();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_in_handler = Arc::clone(&hits);
    let periodic = reactor.insert(Event::periodic(Duration::from_millis(5), false, move |_| {
        hits_in_handler.fetch_add(1, Ordering::SeqCst);
        Signal::Default
    }));
    let id = periodic.id();

    let hits_in_task = Arc::clone(&hits);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(27)).await;
        assert!(handle.remove(id).await.unwrap());
        let frozen_at = hits_in_task.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits_in_task.load(Ordering::SeqCst), frozen_at, "event fired after removal");

        handle.break_loop().await.unwrap();
    });

    reactor.dispatch().await;
    assert!(hits.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn frozen_event_stays_silent_until_thawed() {
    let mut reactor = Reactor::new(());
    let handle = reactor.handle();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_in_handler = Arc::clone(&hits);
    let periodic = reactor.insert(Event::periodic(Duration::from_millis(5), false, move |_| {
        hits_in_handler.fetch_add(1, Ordering::SeqCst);
        Signal::Default
    }));
    let id = periodic.id();

    let hits_in_task = Arc::clone(&hits);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(23)).await;
        assert!(handle.freeze(id).await.unwrap());
        let frozen_at = hits_in_task.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits_in_task.load(Ordering::SeqCst), frozen_at, "event fired while frozen");

        assert!(handle.thaw(id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(hits_in_task.load(Ordering::SeqCst) > frozen_at, "event never resumed");

        handle.break_loop().await.unwrap();
    });

    reactor.dispatch().await;
}

#[tokio::test]
async fn break_loop_stops_a_busy_reactor() {
    let mut reactor = Reactor::new(());
    let handle = reactor.handle();

    reactor.insert(Event::periodic(Duration::from_millis(1), true, |_| Signal::Default));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.break_loop().await.unwrap());
    });

    tokio::time::timeout(Duration::from_secs(5), reactor.dispatch())
        .await
        .expect("break_loop did not stop the dispatch loop");
}
