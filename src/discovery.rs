//! Module `discovery` implement topic sharding across broker nodes.
//!
//! Every topic is owned by exactly one broker. A node knows its own client
//! address and the client addresses of its peers, in the order they joined. The
//! owner is computed from the topic's hash alone, so any node asked about the same
//! topic, with the same peer list, returns the same broker.

use crate::{ConnectionInfo, TopicName};

/// Return the broker that owns topic `name`. `own` is the client address of the
/// local node and `peers` the client addresses of other known brokers.
pub fn assigned_broker(
    name: &TopicName,
    own: ConnectionInfo,
    peers: &[ConnectionInfo],
) -> ConnectionInfo {
    match peers.get(to_index(name, peers.len())) {
        Some(peer) => *peer,
        None => own,
    }
}

// index into peers, `n` points to local node.
fn to_index(name: &TopicName, n: usize) -> usize {
    (name.hash32().unsigned_abs() as usize) % (n + 1)
}

#[cfg(test)]
#[path = "discovery_test.rs"]
mod discovery_test;
