//! Gossip Node: the propagation core.
//!
//! Each node is a single-threaded cooperative actor: admission, cache
//! update, verb dispatch, and forward enqueue are all synchronous work
//! performed inside one mailbox handler, with forwarding itself never
//! blocking on network I/O (local forwards are non-blocking mailbox
//! posts; remote forwards are detached tasks via `ProxyNode::forward`).

pub mod proxy;
pub mod verbs;

use std::collections::HashSet as StdHashSet;
use std::sync::Arc;
use std::time::Duration;

use linked_hash_map::LinkedHashMap;
use smallvec::SmallVec;

use crate::gossip::channel::{self, MailboxTx};
use crate::gossip::config::Config;
use crate::gossip::error::*;
use crate::gossip::message::{Kind, Message, MessageId, Verb};
use crate::gossip::registry;
use crate::gossip::uid::Uid;

const MAILBOX_BOUND: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MAX_NEIGHBORS: usize = 8;

/// Abstraction over "now", so admission/expiry logic is testable
/// without sleeping real wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        crate::gossip::message::now_unix()
    }
}

/// The outcome of a solicitation: either every reachable node answered
/// before the deadline, or the deadline fired first and `partial` is
/// set to flag the aggregate as incomplete.
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub payload: Vec<u8>,
    pub partial: bool,
}

enum NodeCommand {
    Admit {
        source: Option<Uid>,
        message: Message,
    },
    Broadcast {
        verb: Verb,
        payload: Vec<u8>,
    },
    Solicit {
        verb: Verb,
        payload: Vec<u8>,
        direct: bool,
        reply: oneshot::Sender<Aggregate>,
    },
    DeadlineElapsed(MessageId),
    AddNeighbor(Uid),
    SweepExpired,
    #[cfg(test)]
    Snapshot(oneshot::Sender<NodeSnapshot>),
}

#[cfg(test)]
#[derive(Debug)]
pub struct NodeSnapshot {
    pub cache_len: usize,
    pub neighbor_count: usize,
    pub pending_replies: usize,
}

/// A cheap, cloneable reference to a running Gossip Node.
#[derive(Clone)]
pub struct NodeHandle {
    uid: Uid,
    tx: MailboxTx<NodeCommand>,
}

impl NodeHandle {
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Non-blocking propagation forward from a local neighbor or the
    /// inbound router (registry::node::Router). Drops on backpressure
    /// rather than stalling the caller's actor loop.
    pub fn forward(&self, source: Uid, message: Message) {
        let mut tx = self.tx.clone();
        if tx
            .try_post(NodeCommand::Admit {
                source: Some(source),
                message,
            })
            .is_err()
        {
            tracing::warn!(uid = %self.uid, "neighbor mailbox full or closed, dropping forward");
        }
    }

    /// Injects a fresh COMMAND message locally, admitting it as if it
    /// had just arrived from the network.
    pub async fn broadcast(&self, verb: Verb, payload: Vec<u8>) -> Result<()> {
        let mut tx = self.tx.clone();
        tx.post(NodeCommand::Broadcast { verb, payload }).await
    }

    /// Injects a fresh SOLICIT locally and awaits its aggregate, either
    /// tree-aggregated back up through the forwarding path or, when
    /// `direct` is set, answered straight to this node by every
    /// reachable peer.
    pub async fn solicit(&self, verb: Verb, payload: Vec<u8>, direct: bool) -> Result<Aggregate> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut tx = self.tx.clone();
        tx.post(NodeCommand::Solicit {
            verb,
            payload,
            direct,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| Error::simple(ErrorKind::Closed))
    }

    /// Administrative: adds a neighbor edge. Callers wiring up a graph
    /// are expected to call this on both endpoints to get a
    /// bidirectional edge. Duplicates are ignored, not an error.
    pub async fn add_neighbor(&self, uid: Uid) -> Result<()> {
        let mut tx = self.tx.clone();
        tx.post(NodeCommand::AddNeighbor(uid)).await
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> NodeSnapshot {
        let (tx, rx) = oneshot::channel();
        let mut mtx = self.tx.clone();
        mtx.post(NodeCommand::Snapshot(tx)).await.unwrap();
        rx.await.unwrap()
    }
}

struct CacheEntry {
    timestamp: u64,
    ttl_seconds: u32,
}

enum ReplyMode {
    /// Tree aggregation: resolves as soon as every neighbor but the
    /// one we heard from has replied, or at the deadline.
    Tree { outstanding: StdHashSet<Uid> },
    /// Flattened aggregation (solicit_direct): every reachable node
    /// answers straight to the origin; completion is undetectable, so
    /// this only ever resolves at the deadline.
    Direct,
}

enum ReplyTarget {
    Local(oneshot::Sender<Aggregate>),
    Upstream(Uid),
}

struct ReplyState {
    verb: Verb,
    aggregate: Vec<u8>,
    mode: ReplyMode,
    target: ReplyTarget,
}

struct GossipNodeState {
    uid: Uid,
    neighbors: SmallVec<[Uid; MAX_NEIGHBORS]>,
    seen_cache: LinkedHashMap<MessageId, CacheEntry>,
    reply_boxes: std::collections::HashMap<MessageId, ReplyState>,
    default_ttl: u32,
    solicit_deadline: Duration,
    clock: Arc<dyn Clock>,
}

/// Spawns a new Gossip Node, registers it in the Node Registry, and
/// returns a handle to it. Uses the system clock.
pub fn spawn(uid: Uid, config: &Config) -> NodeHandle {
    spawn_with_clock(uid, config, Arc::new(SystemClock))
}

/// As `spawn`, but with an injectable clock — used by tests that need
/// to fast-forward past TTL expiry without sleeping.
pub fn spawn_with_clock(uid: Uid, config: &Config, clock: Arc<dyn Clock>) -> NodeHandle {
    let (tx, rx) = channel::mailbox(MAILBOX_BOUND);
    let handle = NodeHandle { uid, tx: tx.clone() };
    let state = GossipNodeState {
        uid,
        neighbors: SmallVec::new(),
        seen_cache: LinkedHashMap::new(),
        reply_boxes: std::collections::HashMap::new(),
        default_ttl: config.default_ttl.as_secs().max(1) as u32,
        solicit_deadline: config.solicit_deadline,
        clock,
    };
    tokio::spawn(run(rx, state, handle.clone()));
    spawn_sweeper(tx);
    registry::node::register_local(handle.clone());
    handle
}

fn spawn_sweeper(mut tx: MailboxTx<NodeCommand>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            if tx.try_post(NodeCommand::SweepExpired).is_err() {
                return;
            }
        }
    });
}

fn spawn_deadline(uid: Uid, mut tx: MailboxTx<NodeCommand>, id: MessageId, deadline: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if tx.try_post(NodeCommand::DeadlineElapsed(id)).is_err() {
            tracing::debug!(%uid, %id, "deadline fired after node shut down");
        }
    });
}

async fn run(mut rx: channel::MailboxRx<NodeCommand>, mut state: GossipNodeState, self_handle: NodeHandle) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            NodeCommand::Admit { source, message } => {
                admit(&mut state, source, message);
            }
            NodeCommand::Broadcast { verb, payload } => {
                let message = Message::fresh(Kind::Command { verb }, state.uid, state.default_ttl, payload);
                admit(&mut state, None, message);
            }
            NodeCommand::Solicit {
                verb,
                payload,
                direct,
                reply,
            } => {
                let message = Message::fresh(
                    Kind::Solicit {
                        verb: verb.clone(),
                        direct_reply: direct,
                    },
                    state.uid,
                    state.default_ttl,
                    payload,
                );
                let mode = if direct {
                    ReplyMode::Direct
                } else {
                    ReplyMode::Tree {
                        outstanding: forward_targets(&state, None).into_iter().collect(),
                    }
                };
                state.reply_boxes.insert(
                    message.id,
                    ReplyState {
                        verb,
                        aggregate: Vec::new(),
                        mode,
                        target: ReplyTarget::Local(reply),
                    },
                );
                spawn_deadline(state.uid, self_handle.tx.clone(), message.id, state.solicit_deadline);
                admit(&mut state, None, message);
            }
            NodeCommand::DeadlineElapsed(id) => {
                if state.reply_boxes.contains_key(&id) {
                    resolve(&mut state, id, true);
                }
            }
            NodeCommand::AddNeighbor(uid) => {
                if !state.neighbors.contains(&uid) {
                    state.neighbors.push(uid);
                }
            }
            NodeCommand::SweepExpired => sweep(&mut state),
            #[cfg(test)]
            NodeCommand::Snapshot(reply) => {
                let _ = reply.send(NodeSnapshot {
                    cache_len: state.seen_cache.len(),
                    neighbor_count: state.neighbors.len(),
                    pending_replies: state.reply_boxes.len(),
                });
            }
        }
    }
    registry::node::remove(self_handle.uid);
}

fn forward_targets(state: &GossipNodeState, source: Option<Uid>) -> Vec<Uid> {
    state
        .neighbors
        .iter()
        .copied()
        .filter(|&n| Some(n) != source)
        .collect()
}

/// The admission and caching algorithm: expiry checks, loop
/// suppression via the seen-cache, then verb execution/forwarding or
/// reply bookkeeping depending on the message kind.
fn admit(state: &mut GossipNodeState, source: Option<Uid>, message: Message) {
    let now = state.clock.now();
    let expiry = message.expiry();
    let hard_cutoff = message.timestamp + 2 * message.ttl_seconds as u64;

    if now > hard_cutoff {
        state.seen_cache.remove(&message.id);
        tracing::trace!(uid = %state.uid, id = %message.id, "dropping hard-expired message");
        return;
    }
    if now > expiry {
        tracing::trace!(uid = %state.uid, id = %message.id, "dropping soft-expired message");
        return;
    }
    if state.seen_cache.contains_key(&message.id) {
        tracing::trace!(uid = %state.uid, id = %message.id, "duplicate message, loop suppressed");
        return;
    }
    state.seen_cache.insert(
        message.id,
        CacheEntry {
            timestamp: message.timestamp,
            ttl_seconds: message.ttl_seconds,
        },
    );

    match message.kind.clone() {
        Kind::Command { verb } => {
            verbs::execute_command(&verb, &message.payload);
            let targets = forward_targets(state, source);
            dispatch_many(state, &targets, source, &message);
        }
        Kind::Solicit { verb, direct_reply } => {
            handle_solicit(state, source, &message, verb, direct_reply);
        }
        Kind::Reply { solicitation_id } => {
            handle_reply(state, solicitation_id, &message);
        }
    }
}

fn handle_solicit(state: &mut GossipNodeState, source: Option<Uid>, message: &Message, verb: Verb, direct_reply: bool) {
    let targets = forward_targets(state, source);

    if direct_reply && !state.reply_boxes.contains_key(&message.id) {
        // A plain relay under direct semantics: answer straight to the
        // origin now, keep no local bookkeeping for this solicitation.
        let contribution = verbs::own_contribution(&verb, state.uid);
        let reply = message.reply(state.uid, contribution);
        route_to(state, message.origin_uid, state.uid, reply);
    } else {
        let entry = state.reply_boxes.entry(message.id).or_insert_with(|| ReplyState {
            verb: verb.clone(),
            aggregate: verbs::identity(&verb),
            mode: if direct_reply {
                ReplyMode::Direct
            } else {
                ReplyMode::Tree {
                    outstanding: targets.iter().copied().collect(),
                }
            },
            target: ReplyTarget::Upstream(source.expect("a relayed solicit always has a source")),
        });
        if entry.aggregate.is_empty() {
            entry.aggregate = verbs::identity(&verb);
        }
        let contribution = verbs::own_contribution(&verb, state.uid);
        if let Err(error) = verbs::merge(&verb, &mut entry.aggregate, &contribution) {
            tracing::warn!(%error, "failed to merge own contribution");
        }
        maybe_resolve(state, message.id);
    }

    dispatch_many(state, &targets, source, message);
}

fn handle_reply(state: &mut GossipNodeState, solicitation_id: MessageId, message: &Message) {
    let Some(entry) = state.reply_boxes.get_mut(&solicitation_id) else {
        tracing::debug!(uid = %state.uid, id = %solicitation_id, "reply for unknown/expired solicitation, dropping");
        return;
    };
    let verb = entry.verb.clone();
    if let Err(error) = verbs::merge(&verb, &mut entry.aggregate, &message.payload) {
        tracing::warn!(%error, "failed to merge downstream reply");
        return;
    }
    match &mut entry.mode {
        ReplyMode::Tree { outstanding } => {
            outstanding.remove(&message.origin_uid);
            if outstanding.is_empty() {
                resolve(state, solicitation_id, false);
            }
        }
        ReplyMode::Direct => {
            // No outstanding set to track; only the deadline resolves this.
        }
    }
}

fn maybe_resolve(state: &mut GossipNodeState, id: MessageId) {
    let ready = matches!(
        state.reply_boxes.get(&id),
        Some(ReplyState { mode: ReplyMode::Tree { outstanding }, .. }) if outstanding.is_empty()
    );
    if ready {
        resolve(state, id, false);
    }
}

fn resolve(state: &mut GossipNodeState, id: MessageId, partial: bool) {
    let Some(entry) = state.reply_boxes.remove(&id) else {
        return;
    };
    match entry.target {
        ReplyTarget::Local(waiter) => {
            let _ = waiter.send(Aggregate {
                payload: entry.aggregate,
                partial,
            });
        }
        ReplyTarget::Upstream(upstream) => {
            let reply = Message {
                id: MessageId::fresh(),
                kind: Kind::Reply { solicitation_id: id },
                origin_uid: state.uid,
                timestamp: state.clock.now(),
                ttl_seconds: state.default_ttl,
                payload: entry.aggregate,
            };
            route_to(state, upstream, state.uid, reply);
        }
    }
}

/// Routes a single message to one neighbor (point-to-point: reply
/// delivery, or one leg of a neighbor-exclusion fanout).
fn route_to(_state: &GossipNodeState, target_uid: Uid, sender: Uid, message: Message) {
    match registry::node::lookup(target_uid) {
        Some(registry::node::NodeEntry::Local(handle)) => handle.forward(sender, message),
        Some(registry::node::NodeEntry::Proxy(proxy)) => proxy.forward(sender, message),
        None => tracing::warn!(%target_uid, "route target not found in node registry, dropping"),
    }
}

fn dispatch_many(state: &GossipNodeState, targets: &[Uid], _source: Option<Uid>, message: &Message) {
    for &target in targets {
        route_to(state, target, state.uid, message.clone());
    }
}

/// Proactive eviction of hard-expired cache entries, so an idle node's
/// cache doesn't wait on a repeat receipt to shrink. `LinkedHashMap`
/// preserves insertion order, so this walks from the front and stops
/// at the first entry that isn't hard-expired yet — an approximation
/// when TTLs vary across messages, traded for O(1) amortized sweeps.
fn sweep(state: &mut GossipNodeState) {
    let now = state.clock.now();
    while let Some((_, front)) = state.seen_cache.front() {
        let hard_cutoff = front.timestamp + 2 * front.ttl_seconds as u64;
        if now > hard_cutoff {
            state.seen_cache.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeClock(AtomicU64);

    impl Clock for FakeClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn spawn_test_node(uid: u64, now: u64) -> (NodeHandle, Arc<FakeClock>) {
        registry::node::init();
        let clock = Arc::new(FakeClock(AtomicU64::new(now)));
        let handle = spawn_with_clock(Uid::from_raw(uid), &Config::default(), clock.clone());
        (handle, clock)
    }

    #[tokio::test]
    async fn broadcast_fires_verb_once_and_caches_message() {
        let (node, _clock) = spawn_test_node(1, 1_000);
        node.broadcast(Verb::new(Verb::COUNT_ALIVE), Vec::new()).await.unwrap();
        tokio::task::yield_now().await;
        let snap = node.snapshot().await;
        assert_eq!(snap.cache_len, 1);
    }

    #[tokio::test]
    async fn solicit_wait_on_isolated_node_resolves_immediately() {
        let (node, _clock) = spawn_test_node(2, 1_000);
        let aggregate = node.solicit(Verb::new(Verb::COUNT_ALIVE), Vec::new(), false).await.unwrap();
        let count: u64 = bincode::deserialize(&aggregate.payload).unwrap();
        assert_eq!(count, 1);
        assert!(!aggregate.partial);
    }

    #[tokio::test]
    async fn soft_expired_message_is_dropped_without_caching() {
        let (node, _clock) = spawn_test_node(3, 1_000);
        let stale = Message {
            id: MessageId::fresh(),
            kind: Kind::Command {
                verb: Verb::new(Verb::COUNT_ALIVE),
            },
            origin_uid: Uid::from_raw(99),
            timestamp: 1_000 - 15,
            ttl_seconds: 10,
            payload: Vec::new(),
        };
        node.forward(Uid::from_raw(99), stale);
        tokio::task::yield_now().await;
        let snap = node.snapshot().await;
        assert_eq!(snap.cache_len, 0);
    }

    #[tokio::test]
    async fn hard_expired_message_is_purged_and_not_refired() {
        let (node, clock) = spawn_test_node(4, 1_000);
        verbs::init();
        let counter = Arc::new(AtomicU64::new(0));
        let inner = counter.clone();
        verbs::register_command(
            "hard-expiry-probe",
            Arc::new(move |_: &[u8]| {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let message = Message {
            id: MessageId::fresh(),
            kind: Kind::Command {
                verb: Verb::new("hard-expiry-probe"),
            },
            origin_uid: Uid::from_raw(77),
            timestamp: 1_000,
            ttl_seconds: 10,
            payload: Vec::new(),
        };

        node.forward(Uid::from_raw(77), message.clone());
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(node.snapshot().await.cache_len, 1);

        clock.0.store(1_000 + 2 * 10 + 1, Ordering::SeqCst);
        node.forward(Uid::from_raw(77), message);
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "hard-expired resend must not refire the verb");
        assert_eq!(node.snapshot().await.cache_len, 0, "hard-expired entry must be purged from the cache");
    }
}
