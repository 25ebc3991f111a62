//! Cross-module scenarios: propagation across multiple wired-up Gossip
//! Nodes, and connection lifecycle over real loopback sockets. Single-node
//! admission edge cases (soft/hard expiry) live alongside `node::mod` as
//! `#[cfg(test)]` unit tests instead, since they need the injectable
//! clock and cache introspection that are only available inside the
//! crate.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use ripple::gossip::config::Config;
use ripple::gossip::error::ErrorKind;
use ripple::gossip::message::{Kind, Message, Verb};
use ripple::gossip::node::{self, proxy::ProxyNode, verbs};
use ripple::gossip::registry::{self, node::Router};
use ripple::gossip::uid::{self, Regime, Uid};
use ripple::gossip::{api, listener, InitConfig};

static INIT: Once = Once::new();

/// Brings up the process-wide registries exactly once per test binary and
/// leaks the guard, so later tests in this file don't tear down state a
/// sibling test (running concurrently under the default test harness) is
/// still relying on.
fn ensure_runtime() {
    INIT.call_once(|| {
        let guard = ripple::init(InitConfig { async_threads: 1 }).unwrap();
        std::mem::forget(guard);
        uid::set_regime(Regime::Tiny);
    });
}

fn fresh_config() -> Config {
    Config {
        solicit_deadline: Duration::from_millis(300),
        ..Config::default()
    }
}

/// Registers a fire-and-forget command verb under a unique name (so
/// concurrently-running tests in this file don't clobber each other's
/// handlers) that just bumps a counter.
fn counting_probe() -> (Verb, Arc<AtomicU64>) {
    let counter = Arc::new(AtomicU64::new(0));
    let verb = Verb::new(format!("probe-{}", uid::allocate()));
    let inner = counter.clone();
    verbs::register_command(verb.as_str(), Arc::new(move |_: &[u8]| {
        inner.fetch_add(1, Ordering::SeqCst);
    }));
    (verb, counter)
}

#[tokio::test]
async fn triangle_broadcast_fires_verb_exactly_once_per_node() {
    ensure_runtime();
    let config = fresh_config();
    let (probe, counter) = counting_probe();

    let a = node::spawn(uid::allocate(), &config);
    let b = node::spawn(uid::allocate(), &config);
    let c = node::spawn(uid::allocate(), &config);
    for (x, y) in [(&a, &b), (&b, &c), (&c, &a)] {
        x.add_neighbor(y.uid()).await.unwrap();
        y.add_neighbor(x.uid()).await.unwrap();
    }

    api::broadcast(&a, probe, Vec::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn ring_of_four_admits_each_broadcast_exactly_once_despite_duplicate_path() {
    ensure_runtime();
    let config = fresh_config();
    let (probe, counter) = counting_probe();

    let nodes: Vec<_> = (0..4).map(|_| node::spawn(uid::allocate(), &config)).collect();
    for i in 0..4 {
        let j = (i + 1) % 4;
        nodes[i].add_neighbor(nodes[j].uid()).await.unwrap();
        nodes[j].add_neighbor(nodes[i].uid()).await.unwrap();
    }

    api::broadcast(&nodes[0], probe, Vec::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The last node in the ring hears the broadcast from both directions;
    // loop suppression must admit only the first arrival.
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn solicit_wait_aggregates_count_across_a_chain() {
    ensure_runtime();
    let config = fresh_config();

    let a = node::spawn(uid::allocate(), &config);
    let b = node::spawn(uid::allocate(), &config);
    let c = node::spawn(uid::allocate(), &config);
    a.add_neighbor(b.uid()).await.unwrap();
    b.add_neighbor(a.uid()).await.unwrap();
    b.add_neighbor(c.uid()).await.unwrap();
    c.add_neighbor(b.uid()).await.unwrap();

    let aggregate = api::solicit_wait(&a, Verb::COUNT_ALIVE, Vec::new()).await.unwrap();
    let count: u64 = bincode::deserialize(&aggregate.payload).unwrap();

    assert_eq!(count, 3);
    assert!(!aggregate.partial);
}

#[tokio::test]
async fn concurrent_ensure_connection_dedups_to_one_owner() {
    ensure_runtime();
    let peer = listener::start("127.0.0.1:0".parse::<SocketAddr>().unwrap()).await.unwrap();
    let addr = peer.local_addr();
    let before = registry::connection::len();

    let outbox = Router::shared();
    let remote_uid = uid::allocate();
    let proxy_a = ProxyNode::new(uid::allocate(), remote_uid, addr.ip(), addr.port(), outbox.clone());
    let proxy_b = ProxyNode::new(uid::allocate(), remote_uid, addr.ip(), addr.port(), outbox);

    let probe = || Message::fresh(Kind::Command { verb: Verb::new(Verb::COUNT_ALIVE) }, Uid::from_raw(1), 30, Vec::new());
    let (r1, r2) = tokio::join!(proxy_a.send(Uid::from_raw(1), probe()), proxy_b.send(Uid::from_raw(1), probe()));
    r1.unwrap();
    r2.unwrap();

    assert_eq!(registry::connection::len(), before + 1);
    peer.stop();
}

#[tokio::test]
async fn peer_hangup_closes_owner_and_frees_registry_slot() {
    ensure_runtime();
    let fake_peer = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = fake_peer.local_addr().unwrap();

    let outbox = Router::shared();
    let proxy = ProxyNode::new(uid::allocate(), uid::allocate(), addr.ip(), addr.port(), outbox);
    let probe = || Message::fresh(Kind::Command { verb: Verb::new(Verb::COUNT_ALIVE) }, Uid::from_raw(1), 30, Vec::new());

    let (accepted, send_result) = tokio::join!(fake_peer.accept(), proxy.send(Uid::from_raw(1), probe()));
    send_result.unwrap();
    let (accepted, _) = accepted.unwrap();

    let before = registry::connection::len();
    assert!(before >= 1);
    drop(accepted);

    let mut freed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if registry::connection::len() < before {
            freed = true;
            break;
        }
    }
    assert!(freed, "connection registry entry was not removed after peer hangup");

    let err = proxy.send(Uid::from_raw(1), probe()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
}
