//! Module `dao` define the persistence interface for topics.
//!
//! Brokers persist topic creation, deletion and every completed post through a
//! [TopicDao]. On restart a broker rehydrates its topics using
//! [TopicDao::read_all_topics]. Two implementations are available, [MemoryDao]
//! and [crate::TopicFileSystem].

use log::{debug, warn};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, ErrorKind, Result};
use crate::{Packet, Post, PostID, PostInfo, Subscriber, TopicName};

/// Persistence interface for topics and their posts.
///
/// Implementations shall return errors of kind `Persistence`, or `IOError` for
/// failures from the underlying storage.
pub trait TopicDao: Send {
    fn create_topic(&mut self, name: &TopicName) -> Result<()>;

    fn delete_topic(&mut self, name: &TopicName) -> Result<()>;

    /// Persist a complete post, posts are persisted in the order they complete.
    fn write_post(&mut self, post: &Post, name: &TopicName) -> Result<()>;

    /// Read back every topic with its posts, in the order they were written.
    fn read_all_topics(&mut self) -> Result<Vec<StoredTopic>>;
}

/// Topic as read back from persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTopic {
    pub name: TopicName,
    pub posts: Vec<Post>,
}

/// Persistence handle shared by a node, calls into the dao are serialized.
pub type SharedDao = Arc<Mutex<Box<dyn TopicDao>>>;

pub fn to_shared<D: 'static + TopicDao>(dao: D) -> SharedDao {
    let dao: Box<dyn TopicDao> = Box::new(dao);
    Arc::new(Mutex::new(dao))
}

pub fn lock_dao(dao: &SharedDao) -> MutexGuard<Box<dyn TopicDao>> {
    dao.lock().unwrap_or_else(|err| err.into_inner())
}

/// Volatile implementation of [TopicDao].
///
/// Clones share the same set of topics, so a clone held outside a broker can be
/// used to inspect what was persisted or to restart a broker from it.
#[derive(Clone, Default)]
pub struct MemoryDao {
    topics: Arc<Mutex<BTreeMap<TopicName, Vec<Post>>>>,
}

impl TopicDao for MemoryDao {
    fn create_topic(&mut self, name: &TopicName) -> Result<()> {
        let mut topics = self.lock();
        match topics.get(name) {
            Some(_) => err!(Persistence, desc: "topic {} already persisted", name),
            None => {
                topics.insert(name.clone(), Vec::default());
                Ok(())
            }
        }
    }

    fn delete_topic(&mut self, name: &TopicName) -> Result<()> {
        match self.lock().remove(name) {
            Some(_) => Ok(()),
            None => err!(Persistence, desc: "topic {} not persisted", name),
        }
    }

    fn write_post(&mut self, post: &Post, name: &TopicName) -> Result<()> {
        match self.lock().get_mut(name) {
            Some(posts) if posts.iter().any(|p| p.info.id == post.info.id) => {
                err!(Persistence, desc: "{} post {} already persisted", name, post.info.id)
            }
            Some(posts) => {
                posts.push(post.clone());
                Ok(())
            }
            None => err!(Persistence, desc: "topic {} not persisted", name),
        }
    }

    fn read_all_topics(&mut self) -> Result<Vec<StoredTopic>> {
        let topics = self
            .lock()
            .iter()
            .map(|(name, posts)| StoredTopic { name: name.clone(), posts: posts.clone() })
            .collect();
        Ok(topics)
    }
}

impl MemoryDao {
    fn lock(&self) -> MutexGuard<BTreeMap<TopicName, Vec<Post>>> {
        self.topics.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Subscriber that persists every post of a topic once it completes.
///
/// Packets are buffered per post, hence posts completing out of order are written
/// in completion order. A post that fails to persist is logged and skipped, the
/// writer stays subscribed for the posts that follow.
pub struct PostWriter {
    prefix: String,
    dao: SharedDao,
    posts: Mutex<BTreeMap<PostID, (PostInfo, Vec<Packet>)>>,
}

impl Subscriber for PostWriter {
    fn on_post_info(&self, _topic: &TopicName, info: &PostInfo) -> Result<()> {
        self.lock().insert(info.id, (info.clone(), Vec::default()));
        Ok(())
    }

    fn on_packet(&self, topic: &TopicName, packet: &Packet) -> Result<()> {
        let mut posts = self.lock();

        let (info, mut packets) = match posts.remove(&packet.post_id) {
            Some(entry) => entry,
            None => err!(
                ProtocolError,
                desc: "{} packet for unknown post {}", self.prefix, packet.post_id
            )?,
        };
        packets.push(packet.clone());

        if !packet.is_final {
            posts.insert(info.id, (info, packets));
            return Ok(());
        }
        std::mem::drop(posts);

        let post = Post::from_packets(info, &packets)?;
        match lock_dao(&self.dao).write_post(&post, topic) {
            Ok(()) => {
                debug!("{} persisted post {} len:{}", self.prefix, post.info.id, post.data.len())
            }
            Err(err) => warn!("{} skip post {}, {}", self.prefix, post.info.id, err),
        }

        Ok(())
    }
}

impl PostWriter {
    pub fn new(prefix: &str, dao: SharedDao) -> PostWriter {
        PostWriter {
            prefix: format!("{}:writer", prefix),
            dao,
            posts: Mutex::new(BTreeMap::default()),
        }
    }

    fn lock(&self) -> MutexGuard<BTreeMap<PostID, (PostInfo, Vec<Packet>)>> {
        self.posts.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
#[path = "dao_test.rs"]
mod dao_test;
