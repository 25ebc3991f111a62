//! Spawns five in-process Gossip Nodes, wires them into a bounded-degree
//! graph, and solicits `:count-alive` from one of them.

use ripple::gossip::config::Config;
use ripple::gossip::message::Verb;
use ripple::gossip::uid::{self, Regime};
use ripple::gossip::{api, graph, init, registry, InitConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let conf = InitConfig {
        async_threads: num_cpus::get(),
    };
    let _guard = init(conf).unwrap();

    uid::set_regime(Regime::Tiny);
    let config = Config {
        numnodes: 5,
        ..Config::default()
    };

    let nodes = graph::bootstrap(&config).await.unwrap();

    println!("{} nodes registered: {}", nodes.len(), registry::node::len());

    let aggregate = api::solicit_wait(&nodes[0], Verb::COUNT_ALIVE, Vec::new())
        .await
        .unwrap();
    let count: u64 = bincode::deserialize(&aggregate.payload).unwrap();
    println!(
        "count-alive from node #{} => {} (partial = {})",
        nodes[0].uid(),
        count,
        aggregate.partial
    );
}
