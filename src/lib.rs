//! Package implement a distributed publish/subscribe broker for chunked posts.
//!
//! A network of broker nodes jointly own a namespace of topics. Each topic is
//! owned by exactly one node, computed by hashing the topic name over the list of
//! known brokers, refer [discovery]. Publishers stream posts to the owning broker
//! as a sequence of [PostInfo] and [Packet] frames, and subscribers receive every
//! completed post in the order its [PostInfo] arrived at the broker, refer
//! [FanOut].
//!
//! Broker side:
//!
//! * [Broker], a node that listens for clients and peer brokers.
//! * [TopicRegistry], per node map of topics.
//! * [BrokerTopic], topic store handling concurrently in-flight posts.
//!
//! Client side:
//!
//! * [client], request helpers for discover, create, delete, publish and subscribe.
//! * [UserTopic], assembles posts received from a broker.

#[macro_use]
mod error;

mod broker;
pub mod client;
mod config;
mod dao;
pub mod discovery;
mod fanout;
mod filesystem;
mod frame;
mod handler;
mod listener;
mod message;
mod pull;
mod push;
mod registry;
mod thread;
mod topic;
mod types;
mod user_topic;
mod util;

pub use broker::Broker;
pub use client::{Client, Subscription};
pub use config::Config;
pub use dao::{MemoryDao, StoredTopic, TopicDao};
pub use error::{Error, ErrorKind};
pub use fanout::FanOut;
pub use filesystem::TopicFileSystem;
pub use frame::{read_frame, recv, send, write_frame, StreamItem};
pub use message::Message;
pub use pull::PullWorker;
pub use push::{Outcome, Protocol, PushWorker};
pub use registry::TopicRegistry;
pub use thread::{Thread, Threadable};
pub use topic::{BrokerTopic, PostSink, Subscriber, SubscriberID};
pub use types::{new_post_id, PostID, FETCH_ALL_POSTS};
pub use types::{ConnectionInfo, Packet, Post, PostInfo, TopicName, TopicToken};
pub use user_topic::UserTopic;

use std::time;

pub const SLEEP_10MS: time::Duration = time::Duration::from_millis(10);

/// Default payload size for each packet, when a post is split into packets.
pub const PACKET_SIZE: usize = 64 * 1024;
/// Default maximum size of a frame, including packet payload.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

pub const POLL_EVENTS_SIZE: usize = 1024;
pub const CONTROL_CHAN_SIZE: usize = 1024;

/// Result returned by this methods and functions defined in this package.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for protocol framing, data-encoding and decoding. Shall return one of the
/// following error-kind: `InsufficientBytes`, `MalformedFrame`, `InvalidInput`.
pub trait Packetize: Sized {
    /// Deserialize bytes and construct a value, return the value and the number of
    /// bytes consumed from `stream`.
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)>;

    /// Serialize value into bytes.
    fn encode(&self) -> Result<Vec<u8>>;
}
