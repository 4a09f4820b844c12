// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rill::engine::{Executor, Signal};
use rill::graph::Graph;

/// Demo showing a local-mode linear pipeline: a producer vertex streams
/// the squares of 1..=20 to a consumer vertex, while a prober reports
/// progress once per second.
///
/// Usage: cargo run --example pipeline
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== rill local pipeline demo ===\n");

    let received: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let mut graph = Graph::new();

    let producer = graph
        .vertex()
        .tag("producer")
        .on(|v| {
            for i in 1..=20i64 {
                v.broadcast(&(i * i));
            }
            // Closing flushes whatever is still buffered, then the
            // consumer sees end-of-stream.
            for key in v.ostream_keys() {
                v.ostream(key).unwrap().close();
            }
        })
        .key();

    let sink = Arc::clone(&received);
    let consumer = graph.vertex().tag("consumer").key();
    graph.stream(producer, consumer).tag("squares").on_istream(move |_, istream| {
        while let Ok(Some(square)) = istream.recv::<i64>() {
            sink.lock().unwrap().push(square);
        }
        Signal::Default
    });

    let watched = Arc::clone(&received);
    graph.prober(consumer).period(Duration::from_secs(1)).on(move |_| {
        println!("progress: {} squares so far", watched.lock().unwrap().len());
        Signal::Remove
    });

    Executor::new(graph)?.run().await?;

    let received = received.lock().unwrap();
    println!("received {} values:", received.len());
    println!("{:?}", *received);
    Ok(())
}
