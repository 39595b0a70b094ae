//! Module `registry` implement the per node map of topics.

use log::{debug, info, warn};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex, MutexGuard};
use std::net;

use crate::dao::{lock_dao, PostWriter, SharedDao};
use crate::{BrokerTopic, Packet, PostID, PostInfo, Subscriber, SubscriberID, TopicName};
use crate::{Error, ErrorKind, Result};

/// Type alias for identifying consumer connections within a topic.
pub type ConsumerID = u64;

/// Type alias for identifying publisher connections within a topic.
pub type PublisherID = u64;

/// Thread safe map of topic-name to [BrokerTopic], along with consumer and
/// publisher connections active on each topic.
///
/// Creation and deletion of a topic are persisted before the registry is updated,
/// if persistence fails registry is left unchanged. Mutating calls on the same
/// topic-name are serialized, calls into persistence are serialized for the whole
/// node.
pub struct TopicRegistry {
    prefix: String,
    dao: SharedDao,
    topics: Mutex<BTreeMap<TopicName, Entry>>,
    locks: Mutex<BTreeMap<TopicName, Arc<Mutex<()>>>>,
    // set under `topics` lock, no connections are tracked once closed.
    closed: AtomicBool,
}

struct Entry {
    topic: Arc<BrokerTopic>,
    // post writer subscribed to `topic`.
    writer: SubscriberID,
    consumers: BTreeMap<ConsumerID, net::TcpStream>,
    publishers: BTreeMap<PublisherID, net::TcpStream>,
    next_conn: u64,
}

impl Entry {
    fn new(topic: BrokerTopic, writer: Arc<dyn Subscriber>) -> Entry {
        let writer = topic.subscribe(writer);
        Entry {
            topic: Arc::new(topic),
            writer,
            consumers: BTreeMap::default(),
            publishers: BTreeMap::default(),
            next_conn: 0,
        }
    }

    fn to_conn_id(&mut self) -> u64 {
        let id = self.next_conn;
        self.next_conn += 1;
        id
    }

    fn shutdown(&mut self, prefix: &str) {
        let consumers = std::mem::take(&mut self.consumers).into_iter();
        let publishers = std::mem::take(&mut self.publishers).into_iter();
        for (id, conn) in consumers.chain(publishers) {
            match conn.shutdown(net::Shutdown::Both) {
                Ok(()) => debug!("{} shutdown connection {} ...", prefix, id),
                Err(err) => debug!("{} shutdown connection {}: {}", prefix, id, err),
            }
        }
    }
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new(prefix: &str, dao: SharedDao) -> TopicRegistry {
        TopicRegistry {
            prefix: format!("{}:registry", prefix),
            dao,
            topics: Mutex::new(BTreeMap::default()),
            locks: Mutex::new(BTreeMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a registry with every topic persisted in `dao`. Posts are loaded
    /// before the topic is hooked to persistence, so they are not written again.
    pub fn from_dao(prefix: &str, dao: SharedDao) -> Result<TopicRegistry> {
        let val = TopicRegistry::new(prefix, dao);
        let stored = lock_dao(&val.dao).read_all_topics()?;

        let mut topics = val.lock_topics();
        for stored in stored.into_iter() {
            let topic = BrokerTopic::new(&val.prefix, stored.name.clone());
            let n = stored.posts.len();
            for post in stored.posts.iter() {
                topic.append_post_info(post.info.clone())?;
                for packet in post.to_packets(crate::PACKET_SIZE).into_iter() {
                    topic.append_packet(packet)?;
                }
            }
            let entry = Entry::new(topic, val.to_writer(&stored.name));
            info!("{} loaded topic {} with {} posts", val.prefix, stored.name, n);
            topics.insert(stored.name, entry);
        }
        std::mem::drop(topics);

        Ok(val)
    }

    pub fn exists(&self, name: &TopicName) -> bool {
        self.lock_topics().contains_key(name)
    }

    pub fn get(&self, name: &TopicName) -> Option<Arc<BrokerTopic>> {
        self.lock_topics().get(name).map(|e| Arc::clone(&e.topic))
    }

    pub fn names(&self) -> Vec<TopicName> {
        self.lock_topics().keys().cloned().collect()
    }

    /// Create a new topic, persist it and hook it to persistence.
    pub fn create(&self, name: &TopicName) -> Result<()> {
        let lock = self.to_name_lock(name);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());

        if self.exists(name) {
            err!(TopicExists, desc: "{} topic {} exists", self.prefix, name)?;
        }
        lock_dao(&self.dao).create_topic(name)?;

        let topic = BrokerTopic::new(&self.prefix, name.clone());
        let entry = Entry::new(topic, self.to_writer(name));
        self.lock_topics().insert(name.clone(), entry);

        info!("{} created topic {}", self.prefix, name);
        Ok(())
    }

    /// Delete a topic, persist the deletion, then unhook the topic from
    /// persistence and shutdown all its consumer and publisher connections. Posts
    /// that complete on the deleted topic afterwards are not persisted, even if a
    /// topic by the same name is created again.
    pub fn delete(&self, name: &TopicName) -> Result<()> {
        let lock = self.to_name_lock(name);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());

        if !self.exists(name) {
            err!(TopicNotFound, desc: "{} topic {}", self.prefix, name)?;
        }
        lock_dao(&self.dao).delete_topic(name)?;

        let entry = self.lock_topics().remove(name);
        if let Some(mut entry) = entry {
            entry.topic.unsubscribe(entry.writer);
            entry.shutdown(&self.prefix);
        }

        info!("{} deleted topic {}", self.prefix, name);
        Ok(())
    }

    /// Track `conn` as a consumer of topic `name`, so that it gets shut down when
    /// the topic is deleted or the registry is closed.
    pub fn register_consumer(&self, name: &TopicName, conn: net::TcpStream) -> Result<ConsumerID> {
        let mut topics = self.lock_topics();
        if self.closed.load(SeqCst) {
            err!(InvalidInput, desc: "{} closed, consumer for {}", self.prefix, name)?;
        }
        match topics.get_mut(name) {
            Some(entry) => {
                let id = entry.to_conn_id();
                entry.consumers.insert(id, conn);
                debug!("{} topic {} consumer {}", self.prefix, name, id);
                Ok(id)
            }
            None => err!(TopicNotFound, desc: "{} topic {}", self.prefix, name),
        }
    }

    /// Stop tracking consumer, return false if not found.
    pub fn deregister_consumer(&self, name: &TopicName, id: ConsumerID) -> bool {
        match self.lock_topics().get_mut(name) {
            Some(entry) => entry.consumers.remove(&id).is_some(),
            None => false,
        }
    }

    /// Track `conn` as a publisher to topic `name`, so that it gets shut down when
    /// the topic is deleted or the registry is closed. Return the topic along with
    /// the publisher's id.
    pub fn register_publisher(
        &self,
        name: &TopicName,
        conn: net::TcpStream,
    ) -> Result<(Arc<BrokerTopic>, PublisherID)> {
        let mut topics = self.lock_topics();
        if self.closed.load(SeqCst) {
            err!(InvalidInput, desc: "{} closed, publisher for {}", self.prefix, name)?;
        }
        match topics.get_mut(name) {
            Some(entry) => {
                let id = entry.to_conn_id();
                entry.publishers.insert(id, conn);
                debug!("{} topic {} publisher {}", self.prefix, name, id);
                Ok((Arc::clone(&entry.topic), id))
            }
            None => err!(TopicNotFound, desc: "{} topic {}", self.prefix, name),
        }
    }

    /// Stop tracking publisher, return false if not found.
    pub fn deregister_publisher(&self, name: &TopicName, id: PublisherID) -> bool {
        match self.lock_topics().get_mut(name) {
            Some(entry) => entry.publishers.remove(&id).is_some(),
            None => false,
        }
    }

    pub fn num_consumers(&self, name: &TopicName) -> usize {
        match self.lock_topics().get(name) {
            Some(entry) => entry.consumers.len(),
            None => 0,
        }
    }

    /// Refer [BrokerTopic::posts_since].
    pub fn posts_since(
        &self,
        name: &TopicName,
        id: PostID,
    ) -> Result<Vec<(PostInfo, Vec<Packet>)>> {
        self.to_topic(name)?.posts_since(id)
    }

    /// Refer [BrokerTopic::subscribe].
    pub fn subscribe(&self, name: &TopicName, sub: Arc<dyn Subscriber>) -> Result<SubscriberID> {
        Ok(self.to_topic(name)?.subscribe(sub))
    }

    /// Refer [BrokerTopic::subscribe_since].
    pub fn subscribe_since(
        &self,
        name: &TopicName,
        id: PostID,
        sub: Arc<dyn Subscriber>,
    ) -> Result<(SubscriberID, Vec<(PostInfo, Vec<Packet>)>)> {
        self.to_topic(name)?.subscribe_since(id, sub)
    }

    pub fn num_publishers(&self, name: &TopicName) -> usize {
        match self.lock_topics().get(name) {
            Some(entry) => entry.publishers.len(),
            None => 0,
        }
    }

    /// Shutdown every consumer and publisher connection, topics are left as is.
    /// Connections can't be registered after close.
    pub fn close(&self) {
        let mut topics = self.lock_topics();
        self.closed.store(true, SeqCst);
        for (name, entry) in topics.iter_mut() {
            let n = entry.consumers.len() + entry.publishers.len();
            if n > 0 {
                warn!("{} closing {} connections on {}", self.prefix, n, name);
            }
            entry.shutdown(&self.prefix);
        }
    }

    fn to_topic(&self, name: &TopicName) -> Result<Arc<BrokerTopic>> {
        match self.get(name) {
            Some(topic) => Ok(topic),
            None => err!(TopicNotFound, desc: "{} topic {}", self.prefix, name),
        }
    }

    fn to_writer(&self, name: &TopicName) -> Arc<dyn Subscriber> {
        let prefix = format!("{}:{}", self.prefix, name);
        Arc::new(PostWriter::new(&prefix, Arc::clone(&self.dao)))
    }

    fn to_name_lock(&self, name: &TopicName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(locks.entry(name.clone()).or_default())
    }

    fn lock_topics(&self) -> MutexGuard<BTreeMap<TopicName, Entry>> {
        self.topics.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
