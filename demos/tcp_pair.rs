//! Two Gossip Nodes in the same process, each behind its own TCP
//! listener, joined as Proxy Nodes over loopback. Demonstrates a
//! broadcast crossing an actual socket rather than an in-process
//! mailbox hop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ripple::gossip::config::Config;
use ripple::gossip::message::Verb;
use ripple::gossip::node::{self, proxy::ProxyNode};
use ripple::gossip::registry::node::Router;
use ripple::gossip::uid::{self, Regime};
use ripple::gossip::{api, init, listener, InitConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let _guard = init(InitConfig {
        async_threads: num_cpus::get(),
    })
    .unwrap();
    uid::set_regime(Regime::Tiny);
    let config = Config::default();

    let listener_a = listener::start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let listener_b = listener::start("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let node_a = node::spawn(uid::allocate(), &config);
    let node_b = node::spawn(uid::allocate(), &config);

    // The proxy's own registry-slot uid must differ from node_b's: both
    // nodes share one process-wide Node Registry here, and node_b is
    // already registered under its own uid by `node::spawn`. Node A's
    // neighbor edge points at the proxy's slot; the proxy's `remote_uid`
    // stays `node_b.uid()` so the frame that crosses the loopback socket
    // is addressed to node B's real, locally-registered uid.
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let proxy_uid = uid::allocate();
    let proxy_to_b = Arc::new(ProxyNode::new(
        proxy_uid,
        node_b.uid(),
        loopback,
        listener_b.local_addr().port(),
        Router::shared(),
    ));
    ripple::gossip::registry::node::register_proxy(proxy_to_b);
    node_a.add_neighbor(proxy_uid).await.unwrap();

    println!(
        "node A ({}) broadcasting :count-alive across {} -> {}",
        node_a.uid(),
        listener_a.local_addr(),
        listener_b.local_addr()
    );
    api::broadcast(&node_a, Verb::COUNT_ALIVE, Vec::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("node B ({}) should now have fired :count-alive once", node_b.uid());

    listener_a.stop();
    listener_b.stop();
}
