use log::debug;

use std::sync::{Mutex, MutexGuard};

use crate::{Error, ErrorKind, Result};
use crate::{Packet, Post, PostID, PostInfo, PostSink, TopicName, TopicToken};
use crate::FETCH_ALL_POSTS;

/// Client side topic store.
///
/// A broker streams posts to a subscriber one after the other, hence at most one
/// post is in-flight at any time. Complete posts are assembled from their packets
/// and kept in arrival order.
pub struct UserTopic {
    name: TopicName,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    posts: Vec<Post>,
    current: Option<(PostInfo, Vec<Packet>)>,
    // number of posts already handed out by `pull()`.
    pulled: usize,
}

impl PostSink for UserTopic {
    fn name(&self) -> &TopicName {
        &self.name
    }

    fn post_info(&self, info: PostInfo) -> Result<()> {
        let mut inner = self.lock();
        if let Some((cur, _)) = &inner.current {
            err!(ProtocolError, desc: "post-info {} while post {} in-flight", info.id, cur.id)?;
        }
        if inner.posts.iter().any(|p| p.info.id == info.id) {
            err!(PostExists, desc: "{} post {} already exists", self.name, info.id)?;
        }

        inner.current = Some((info, Vec::default()));
        Ok(())
    }

    fn packet(&self, packet: Packet) -> Result<()> {
        let mut inner = self.lock();
        let (info, mut packets) = match inner.current.take() {
            Some((info, packets)) if info.id == packet.post_id => (info, packets),
            Some((info, _)) => {
                err!(ProtocolError, desc: "packet {} within post {}", packet.post_id, info.id)?
            }
            None => err!(ProtocolError, desc: "packet {} without post-info", packet.post_id)?,
        };

        let is_final = packet.is_final;
        packets.push(packet);
        match is_final {
            true => {
                let post = Post::from_packets(info, &packets)?;
                debug!("{} new post {} len:{}", self.name, post.info.id, post.data.len());
                inner.posts.push(post);
            }
            false => inner.current = Some((info, packets)),
        }

        Ok(())
    }

    fn last_completed_id(&self) -> PostID {
        match self.lock().posts.last() {
            Some(post) => post.info.id,
            None => FETCH_ALL_POSTS,
        }
    }
}

impl UserTopic {
    pub fn new(name: TopicName) -> UserTopic {
        UserTopic { name, inner: Mutex::new(Inner::default()) }
    }

    /// Create a topic from posts already known to the client.
    pub fn from_posts(name: TopicName, posts: Vec<Post>) -> UserTopic {
        let inner = Inner { posts, current: None, pulled: 0 };
        UserTopic { name, inner: Mutex::new(inner) }
    }

    /// Token to subscribe for posts newer than the ones in this topic.
    pub fn token(&self) -> TopicToken {
        TopicToken { name: self.name.clone(), last_id: self.last_completed_id() }
    }

    pub fn len(&self) -> usize {
        self.lock().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return posts after post `id`, [FETCH_ALL_POSTS] to return all posts. Fails if
    /// `id` is not a known post.
    pub fn posts_since(&self, id: PostID) -> Result<Vec<Post>> {
        let inner = self.lock();
        let start = match id {
            FETCH_ALL_POSTS => 0,
            id => match inner.posts.iter().position(|p| p.info.id == id) {
                Some(off) => off + 1,
                None => err!(PostNotFound, desc: "{} post {}", self.name, id)?,
            },
        };

        Ok(inner.posts[start..].to_vec())
    }

    /// Return posts received since the last call to pull.
    pub fn pull(&self) -> Vec<Post> {
        let mut inner = self.lock();
        let posts = inner.posts[inner.pulled..].to_vec();
        inner.pulled = inner.posts.len();
        posts
    }

    /// Remove all posts, including the one in-flight.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.posts.clear();
        inner.current = None;
        inner.pulled = 0;
    }

    fn lock(&self) -> MutexGuard<Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
#[path = "user_topic_test.rs"]
mod user_topic_test;
