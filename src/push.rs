use log::{debug, info, warn};

use std::{fmt, io, result};

use crate::frame::{self, StreamItem};
use crate::{Error, ErrorKind, Result};
use crate::{Packet, PostInfo, TopicName};

/// Post streams come in two flavours.
///
/// Both start with a header frame carrying `count:i32`, followed by, for each post,
/// a [PostInfo] frame and its packet frames, the last packet marked final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Stream carries exactly `count` posts.
    Bounded,
    /// Stream header carries [Protocol::KEEP_OPEN_COUNT] and the stream continues
    /// until the connection is closed.
    KeepOpen,
}

impl Protocol {
    pub const KEEP_OPEN_COUNT: i32 = i32::MAX;

    fn to_count(&self, n: usize) -> Result<i32> {
        match self {
            Protocol::Bounded => match i32::try_from(n) {
                Ok(Self::KEEP_OPEN_COUNT) | Err(_) => {
                    err!(InvalidInput, desc: "too many posts {} for bounded stream", n)
                }
                Ok(count) => Ok(count),
            },
            Protocol::KeepOpen => Ok(Self::KEEP_OPEN_COUNT),
        }
    }
}

/// Result of a push or pull over a post stream.
pub struct Outcome {
    pub topic: TopicName,
    /// Number of posts completely sent or applied.
    pub posts: usize,
    pub success: bool,
    /// Reason for failure, or `Disconnected` when an open ended stream was closed
    /// by the peer.
    pub cause: Option<Error>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let cause = self.cause.as_ref().map(|e| e.to_string());
        write!(
            f,
            "topic:{} posts:{} success:{} cause:{}",
            self.topic,
            self.posts,
            self.success,
            cause.as_deref().unwrap_or("-")
        )
    }
}

impl Outcome {
    /// Stream ended successfully because the peer closed the connection.
    pub fn is_peer_closed(&self) -> bool {
        match &self.cause {
            Some(err) => self.success && err.kind() == ErrorKind::Disconnected,
            None => false,
        }
    }
}

/// Completion callback for push and pull workers.
pub type Callback = Box<dyn FnOnce(&Outcome) + Send>;

/// Write a sequence of posts as a post stream.
pub struct PushWorker {
    prefix: String,
    topic: TopicName,
    protocol: Protocol,
    posts: Vec<(PostInfo, Vec<Packet>)>,
    callback: Option<Callback>,
}

impl PushWorker {
    pub fn new(
        prefix: &str,
        topic: TopicName,
        protocol: Protocol,
        posts: Vec<(PostInfo, Vec<Packet>)>,
    ) -> PushWorker {
        PushWorker {
            prefix: format!("{}:push:{}", prefix, topic),
            topic,
            protocol,
            posts,
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    /// Push all posts to `conn` and flush. Errors are not returned but reported in
    /// the outcome, which is also handed over to callback if any.
    pub fn run<W: io::Write>(mut self, mut conn: W) -> Outcome {
        let mut count = 0;
        let res = self.push(&mut conn, &mut count);

        let outcome = Outcome {
            topic: self.topic.clone(),
            posts: count,
            success: res.is_ok(),
            cause: res.err(),
        };
        match outcome.success {
            true => info!("{} {:?} done {}", self.prefix, self.protocol, outcome),
            false => warn!("{} {:?} fail {}", self.prefix, self.protocol, outcome),
        }

        if let Some(callback) = self.callback.take() {
            callback(&outcome);
        }
        outcome
    }

    fn push<W: io::Write>(&mut self, conn: &mut W, count: &mut usize) -> Result<()> {
        frame::send(conn, &self.protocol.to_count(self.posts.len())?)?;

        for (info, packets) in self.posts.drain(..) {
            debug!("{} post:{} packets:{}", self.prefix, info.id, packets.len());
            frame::send(conn, &StreamItem::PostInfo(info))?;
            for packet in packets.into_iter() {
                frame::send(conn, &StreamItem::Packet(packet))?;
            }
            *count += 1;
        }

        frame::flush(conn)
    }
}
