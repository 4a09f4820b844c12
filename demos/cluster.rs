// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use rill::engine::{Executor, Signal};
use rill::graph::Graph;

/// Demo showing a two-container graph that can run in every execution
/// mode. The same binary acts as submitter and as deployed executor:
/// the agents respawn it with `DTC_EXECUTION_MODE=distributed` and the
/// builder calls replay only the fragment each container owns.
///
/// Usage:
///   cargo run --example cluster                       # local mode
///
///   # against a running rill-master and rill-agent(s):
///   DTC_EXECUTION_MODE=submit \
///   DTC_SUBMIT_FILE=target/debug/examples/cluster \
///   DTC_MASTER_HOST=127.0.0.1 \
///   cargo run --example cluster
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut graph = Graph::new();

    let source = graph
        .vertex()
        .tag("source")
        .on(|v| {
            for word in ["to", "be", "or", "not", "to", "be"] {
                v.broadcast(&word.to_string());
            }
            for key in v.ostream_keys() {
                v.ostream(key).unwrap().close();
            }
        })
        .key();

    let counter = graph.vertex().tag("counter").key();
    graph.stream(source, counter).tag("words").on_istream(|vertex, istream| {
        let mut n = 0usize;
        while let Ok(Some(word)) = istream.recv::<String>() {
            println!("{} saw '{}'", vertex.tag().unwrap_or("counter"), word);
            n += 1;
        }
        if n == 0 {
            println!("word stream drained");
        }
        Signal::Default
    });

    graph.container().add(source).cpu(1).key();
    graph.container().add(counter).cpu(1).key();

    if let Some(solution) = Executor::new(graph)?.run().await? {
        println!("{}", solution);
    }
    Ok(())
}
