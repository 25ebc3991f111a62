//! Graph Builder: wires a set of local Gossip Nodes into a connected,
//! bounded-degree neighbor graph.
//!
//! This implementation builds a ring (trivially connected on its own)
//! plus deterministically-chosen chords, added only while they keep
//! every vertex under the degree bound. Chord selection uses a small
//! seeded splitmix64 generator rather than pulling in a full `rand`
//! dependency for what is, here, just a reproducible shuffle.

use crate::gossip::config::Config;
use crate::gossip::error::*;
use crate::gossip::node::proxy::ProxyNode;
use crate::gossip::node::NodeHandle;
use crate::gossip::registry::node::{register_proxy, Router};
use crate::gossip::uid;

const BOOTSTRAP_MAX_DEGREE: usize = 4;
const BOOTSTRAP_SEED: u64 = 1;

/// Builds a ring-plus-chords graph over `nodes`, wiring each edge by
/// calling `NodeHandle::add_neighbor` on both endpoints. `max_degree`
/// must be at least 2 for any graph of more than 2 nodes (the ring
/// alone needs two edges per vertex). Deterministic given `seed`.
pub async fn build_ring_with_chords(nodes: &[NodeHandle], max_degree: usize, seed: u64) -> Result<()> {
    let n = nodes.len();
    if n <= 1 {
        return Ok(());
    }
    if n > 2 && max_degree < 2 {
        return Err(Error::simple(ErrorKind::Graph));
    }
    if n == 2 && max_degree < 1 {
        return Err(Error::simple(ErrorKind::Graph));
    }

    let mut degree = vec![0usize; n];

    // Ring: i <-> i+1 (mod n). For n == 2 this is a single mutual edge.
    let ring_edges = if n == 2 { 1 } else { n };
    for i in 0..ring_edges {
        let j = (i + 1) % n;
        connect(nodes, &mut degree, i, j).await?;
    }

    // Deterministic chords: for each vertex in order, try one
    // additional edge to a pseudo-random other vertex, skipping any
    // choice that would exceed the degree bound or duplicate the ring.
    let mut rng_state = seed | 1;
    for i in 0..n {
        if degree[i] >= max_degree {
            continue;
        }
        let candidate = (splitmix64(&mut rng_state) as usize) % n;
        if candidate == i {
            continue;
        }
        if degree[candidate] >= max_degree {
            continue;
        }
        if are_ring_adjacent(i, candidate, n) {
            continue;
        }
        connect(nodes, &mut degree, i, candidate).await?;
    }

    Ok(())
}

/// Spawns `config.numnodes` local Gossip Nodes, wires them into a
/// bounded-degree graph among themselves, dials every address in
/// `config.all_known_addresses` as a Proxy Node, and adds each of
/// those proxies as a neighbor of every spawned local node, so the
/// fresh nodes have an immediate path into the rest of the fleet.
///
/// Each dialed proxy gets its own freshly allocated registry-slot uid,
/// since registering it under a borrowed uid could collide with a
/// locally-hosted node sharing this same process-wide registry. The
/// remote endpoint's own uid isn't known yet at bootstrap time, so
/// traffic addressed there uses the anonymous-broadcast uid, reaching
/// every locally-hosted node at that address; that peer's own Router
/// then binds a proper Proxy back to us from our next outbound frame's
/// sender uid.
pub async fn bootstrap(config: &Config) -> Result<Vec<NodeHandle>> {
    let nodes: Vec<NodeHandle> = (0..config.numnodes)
        .map(|_| crate::gossip::node::spawn(uid::allocate(), config))
        .collect();
    build_ring_with_chords(&nodes, BOOTSTRAP_MAX_DEGREE, BOOTSTRAP_SEED).await?;

    for remote in &config.all_known_addresses {
        let proxy_uid = uid::allocate();
        let proxy = std::sync::Arc::new(ProxyNode::new(
            proxy_uid,
            uid::ANONYMOUS,
            remote.ip(),
            remote.port(),
            Router::shared(),
        ));
        register_proxy(proxy);
        for node in &nodes {
            node.add_neighbor(proxy_uid).await?;
        }
    }

    Ok(nodes)
}

fn are_ring_adjacent(i: usize, j: usize, n: usize) -> bool {
    let d = i.abs_diff(j);
    d == 1 || d == n - 1
}

async fn connect(nodes: &[NodeHandle], degree: &mut [usize], i: usize, j: usize) -> Result<()> {
    nodes[i].add_neighbor(nodes[j].uid()).await?;
    nodes[j].add_neighbor(nodes[i].uid()).await?;
    degree[i] += 1;
    degree[j] += 1;
    Ok(())
}

/// A minimal deterministic PRNG, sufficient for reproducible chord
/// selection; not used anywhere a cryptographic guarantee is needed
/// (message IDs draw from `OsRng` instead).
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::config::Config;
    use crate::gossip::node;
    use crate::gossip::uid::Uid;

    #[tokio::test]
    async fn ring_of_four_is_connected_under_degree_bound() {
        crate::gossip::registry::node::init();
        let config = Config::default();
        let nodes: Vec<NodeHandle> = (0..4).map(|i| node::spawn(Uid::from_raw(100 + i), &config)).collect();
        build_ring_with_chords(&nodes, 3, 42).await.unwrap();
        for n in &nodes {
            let snap = n.snapshot().await;
            assert!(snap.neighbor_count >= 2);
            assert!(snap.neighbor_count <= 3);
        }
    }

    #[tokio::test]
    async fn single_node_graph_is_a_noop() {
        crate::gossip::registry::node::init();
        let config = Config::default();
        let nodes = vec![node::spawn(Uid::from_raw(200), &config)];
        build_ring_with_chords(&nodes, 4, 1).await.unwrap();
        assert_eq!(nodes[0].snapshot().await.neighbor_count, 0);
    }

    #[tokio::test]
    async fn rejects_insufficient_degree_bound() {
        crate::gossip::registry::node::init();
        let config = Config::default();
        let nodes: Vec<NodeHandle> = (0..5).map(|i| node::spawn(Uid::from_raw(300 + i), &config)).collect();
        let err = build_ring_with_chords(&nodes, 1, 7).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Graph);
    }

    #[tokio::test]
    async fn bootstrap_spawns_numnodes_and_dials_known_addresses() {
        crate::gossip::registry::node::init();
        crate::gossip::registry::connection::init();
        crate::gossip::uid::set_regime(crate::gossip::uid::Regime::Tiny);

        let peer = crate::gossip::listener::start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let config = Config {
            numnodes: 3,
            all_known_addresses: vec![peer.local_addr()],
            ..Config::default()
        };

        let nodes = bootstrap(&config).await.unwrap();
        assert_eq!(nodes.len(), 3);
        for node in &nodes {
            let snap = node.snapshot().await;
            // Every local node picks up a neighbor edge to the dialed
            // proxy in addition to whatever the ring-with-chords pass added.
            assert!(snap.neighbor_count >= 1);
        }
        peer.stop();
    }
}
