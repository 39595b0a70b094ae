use log::{debug, warn};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, ErrorKind, Result};
use crate::{Packet, PostID, PostInfo, TopicName, FETCH_ALL_POSTS};

/// Type alias for identifying subscribers within a topic.
pub type SubscriberID = u64;

/// Trait implemented by types that want to be notified of every append on a
/// topic. Notifications are delivered synchronously while the topic is locked,
/// hence implementations shall not block and shall not call back into the topic.
///
/// Returning an error shall remove the subscriber from the topic.
pub trait Subscriber: Send + Sync {
    fn on_post_info(&self, topic: &TopicName, info: &PostInfo) -> Result<()>;

    fn on_packet(&self, topic: &TopicName, packet: &Packet) -> Result<()>;
}

/// Trait implemented by topic stores that can be filled from a post stream,
/// refer [crate::PullWorker].
pub trait PostSink {
    fn name(&self) -> &TopicName;

    fn post_info(&self, info: PostInfo) -> Result<()>;

    fn packet(&self, packet: Packet) -> Result<()>;

    fn last_completed_id(&self) -> PostID;
}

impl<T: PostSink> PostSink for Arc<T> {
    fn name(&self) -> &TopicName {
        self.as_ref().name()
    }

    fn post_info(&self, info: PostInfo) -> Result<()> {
        self.as_ref().post_info(info)
    }

    fn packet(&self, packet: Packet) -> Result<()> {
        self.as_ref().packet(packet)
    }

    fn last_completed_id(&self) -> PostID {
        self.as_ref().last_completed_id()
    }
}

/// Broker side topic store.
///
/// Posts are kept in the order their [PostInfo] arrived. Any number of posts can be
/// in-flight at the same time, packets are routed to their post using
/// [Packet::post_id], a post is complete once its final packet is appended.
pub struct BrokerTopic {
    name: TopicName,
    prefix: String,
    inner: Mutex<Inner>,
}

struct Entry {
    // offset into `Inner::infos`.
    index: usize,
    packets: Vec<Packet>,
    complete: bool,
}

#[derive(Default)]
struct Inner {
    infos: Vec<PostInfo>,
    posts: BTreeMap<PostID, Entry>,
    subscribers: BTreeMap<SubscriberID, Arc<dyn Subscriber>>,
    next_subscriber: SubscriberID,
}

impl fmt::Debug for BrokerTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BrokerTopic")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PostSink for BrokerTopic {
    fn name(&self) -> &TopicName {
        &self.name
    }

    fn post_info(&self, info: PostInfo) -> Result<()> {
        self.append_post_info(info)
    }

    fn packet(&self, packet: Packet) -> Result<()> {
        self.append_packet(packet)
    }

    fn last_completed_id(&self) -> PostID {
        self.lock().last_completed_id()
    }
}

impl BrokerTopic {
    pub fn new(prefix: &str, name: TopicName) -> BrokerTopic {
        BrokerTopic {
            prefix: format!("{}:topic:{}", prefix, name),
            name,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn as_name(&self) -> &TopicName {
        &self.name
    }

    /// Number of posts, complete and in-flight, in this topic.
    pub fn len(&self) -> usize {
        self.lock().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a new post, fails if a post with the same id already exists.
    pub fn append_post_info(&self, info: PostInfo) -> Result<()> {
        let mut inner = self.lock();

        if inner.posts.contains_key(&info.id) {
            err!(PostExists, desc: "{} post {} already exists", self.prefix, info.id)?;
        }

        let entry = Entry { index: inner.infos.len(), packets: Vec::default(), complete: false };
        inner.posts.insert(info.id, entry);
        inner.infos.push(info.clone());
        debug!("{} post-info {} poster:{}", self.prefix, info.id, info.poster);

        inner.notify(&self.prefix, |sub| sub.on_post_info(&self.name, &info));
        Ok(())
    }

    /// Append packet to its in-flight post.
    pub fn append_packet(&self, packet: Packet) -> Result<()> {
        let mut inner = self.lock();

        match inner.posts.get_mut(&packet.post_id) {
            Some(entry) if entry.complete => {
                err!(ProtocolError, desc: "{} post {} complete", self.prefix, packet.post_id)?
            }
            Some(entry) => {
                entry.complete = packet.is_final;
                entry.packets.push(packet.clone());
            }
            None => err!(PostNotFound, desc: "{} post {}", self.prefix, packet.post_id)?,
        }

        inner.notify(&self.prefix, |sub| sub.on_packet(&self.name, &packet));
        Ok(())
    }

    /// Return completed posts after post `id`, in the order their post-info was
    /// appended. Fails if `id` is neither [FETCH_ALL_POSTS] nor a known post.
    pub fn posts_since(&self, id: PostID) -> Result<Vec<(PostInfo, Vec<Packet>)>> {
        let inner = self.lock();
        let start = inner.start_after(&self.prefix, id)?;
        Ok(inner.completed_range(start, inner.infos.len()))
    }

    /// Register a subscriber for every future append.
    pub fn subscribe(&self, sub: Arc<dyn Subscriber>) -> SubscriberID {
        let mut inner = self.lock();
        let id = inner.add_subscriber(sub);
        debug!("{} subscribe id:{}", self.prefix, id);
        id
    }

    /// Same as [BrokerTopic::posts_since] and [BrokerTopic::subscribe], done
    /// atomically. Returned backfill holds the completed posts after `id` that are
    /// ahead of the first in-flight post. From the first in-flight post onwards,
    /// every post, complete or not, is replayed into `sub` before it is registered.
    /// Subscriber thus sees every post after `id` exactly once and in the order
    /// their post-info arrived, backfill first.
    pub fn subscribe_since(
        &self,
        id: PostID,
        sub: Arc<dyn Subscriber>,
    ) -> Result<(SubscriberID, Vec<(PostInfo, Vec<Packet>)>)> {
        let mut inner = self.lock();

        let start = inner.start_after(&self.prefix, id)?;
        let split = inner.first_in_flight(start);
        let backfill = inner.completed_range(start, split);

        for info in inner.infos[split..].iter() {
            if let Some(entry) = inner.posts.get(&info.id) {
                sub.on_post_info(&self.name, info)?;
                for packet in entry.packets.iter() {
                    sub.on_packet(&self.name, packet)?;
                }
            }
        }

        let sub_id = inner.add_subscriber(sub);
        debug!(
            "{} subscribe id:{} since:{} backfill:{}",
            self.prefix,
            sub_id,
            id,
            backfill.len()
        );

        Ok((sub_id, backfill))
    }

    /// Remove subscriber, return false if it is not subscribed.
    pub fn unsubscribe(&self, id: SubscriberID) -> bool {
        let ok = self.lock().subscribers.remove(&id).is_some();
        debug!("{} unsubscribe id:{} ok:{}", self.prefix, id, ok);
        ok
    }

    pub fn num_subscribers(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<Inner> {
        // a panicking subscriber must not take the topic down with it.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Inner {
    fn start_after(&self, prefix: &str, id: PostID) -> Result<usize> {
        match id {
            FETCH_ALL_POSTS => Ok(0),
            id => match self.posts.get(&id) {
                Some(entry) => Ok(entry.index + 1),
                None => err!(PostNotFound, desc: "{} cursor post {}", prefix, id),
            },
        }
    }

    // offset of the first in-flight post at or after `start`.
    fn first_in_flight(&self, start: usize) -> usize {
        let off = self.infos[start..]
            .iter()
            .position(|info| !matches!(self.posts.get(&info.id), Some(e) if e.complete));
        match off {
            Some(off) => start + off,
            None => self.infos.len(),
        }
    }

    fn completed_range(&self, start: usize, end: usize) -> Vec<(PostInfo, Vec<Packet>)> {
        self.infos[start..end]
            .iter()
            .filter_map(|info| match self.posts.get(&info.id) {
                Some(entry) if entry.complete => Some((info.clone(), entry.packets.clone())),
                _ => None,
            })
            .collect()
    }

    fn last_completed_id(&self) -> PostID {
        self.infos
            .iter()
            .rev()
            .find(|info| matches!(self.posts.get(&info.id), Some(e) if e.complete))
            .map(|info| info.id)
            .unwrap_or(FETCH_ALL_POSTS)
    }

    fn add_subscriber(&mut self, sub: Arc<dyn Subscriber>) -> SubscriberID {
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        self.subscribers.insert(id, sub);
        id
    }

    fn notify<F>(&mut self, prefix: &str, f: F)
    where
        F: Fn(&Arc<dyn Subscriber>) -> Result<()>,
    {
        let failed: Vec<SubscriberID> = self
            .subscribers
            .iter()
            .filter_map(|(id, sub)| f(sub).err().map(|_| *id))
            .collect();

        for id in failed.into_iter() {
            warn!("{} subscriber {} failed, removing", prefix, id);
            self.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
#[path = "topic_test.rs"]
mod topic_test;
