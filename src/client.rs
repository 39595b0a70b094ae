//! Module `client` implement requests to broker nodes.
//!
//! Every request opens a new connection. Topics are owned by a single broker in
//! the network, so clients first discover the owner of a topic and then send
//! create, delete, publish and subscribe requests to it:
//!
//! ```ignore
//! let client = Client::new(any_broker).to_owner(&name)?;
//! client.create_topic(&name)?;
//! client.publish(&name, &[post])?;
//! ```

use log::{debug, info, warn};

use std::io;
use std::{mem, net, sync::Arc};

use crate::{frame, Error, ErrorKind, Result, Thread};
use crate::{ConnectionInfo, Message, Outcome, Packetize, Post, TopicName};
use crate::{Protocol, PullWorker, PushWorker, UserTopic, MAX_FRAME_SIZE, PACKET_SIZE};

/// Request helper bound to a single broker node.
#[derive(Clone)]
pub struct Client {
    prefix: String,
    broker: net::SocketAddr,
    max_frame_size: u32,
    packet_size: usize,
}

impl Client {
    /// Client for broker's client-facing endpoint at `broker`.
    pub fn new(broker: net::SocketAddr) -> Client {
        Client {
            prefix: format!("client:{}", broker),
            broker,
            max_frame_size: MAX_FRAME_SIZE,
            packet_size: PACKET_SIZE,
        }
    }

    pub fn set_max_frame_size(&mut self, size: u32) -> &mut Self {
        self.max_frame_size = size;
        self
    }

    /// Posts are split into packets of `size` bytes while publishing.
    pub fn set_packet_size(&mut self, size: usize) -> &mut Self {
        self.packet_size = size;
        self
    }

    pub fn to_broker(&self) -> net::SocketAddr {
        self.broker
    }

    /// Ask the broker for the owner of topic `name`.
    pub fn discover(&self, name: &TopicName) -> Result<ConnectionInfo> {
        let (_, owner) = self.request(&Message::DiscoverBroker(name.clone()))?;
        debug!("{} topic {} owned by {}", self.prefix, name, owner);
        Ok(owner)
    }

    /// Discover the owner of topic `name` and return a client for it.
    pub fn to_owner(&self, name: &TopicName) -> Result<Client> {
        let owner = self.discover(name)?;
        let mut client = Client::new(owner.addr);
        client.set_max_frame_size(self.max_frame_size).set_packet_size(self.packet_size);
        Ok(client)
    }

    /// Return false if the topic already exists or could not be persisted.
    pub fn create_topic(&self, name: &TopicName) -> Result<bool> {
        let (_, ok) = self.request(&Message::CreateTopic(name.clone()))?;
        Ok(ok)
    }

    /// Return false if the topic does not exist or could not be persisted.
    pub fn delete_topic(&self, name: &TopicName) -> Result<bool> {
        let (_, ok) = self.request(&Message::DeleteTopic(name.clone()))?;
        Ok(ok)
    }

    /// Publish posts to topic `name` as a bounded stream. Returns after the broker
    /// has applied the stream. Return false if the topic does not exist or if the
    /// broker could not apply every post, say a post-id already exists in the
    /// topic. Posts ahead of the failing post remain applied.
    pub fn publish(&self, name: &TopicName, posts: &[Post]) -> Result<bool> {
        let (conn, ok) = self.request::<bool>(&Message::PublishData(name.clone()))?;
        if !ok {
            warn!("{} publish rejected for {}", self.prefix, name);
            return Ok(false);
        }

        let posts = posts
            .iter()
            .map(|post| (post.info.clone(), post.to_packets(self.packet_size)))
            .collect();
        let push = PushWorker::new(&self.prefix, name.clone(), Protocol::Bounded, posts);
        let outcome = push.run(io::BufWriter::new(&conn));
        if let Some(err) = outcome.cause {
            return Err(err);
        }

        conn.shutdown(net::Shutdown::Write).ok();
        let ok: bool = frame::recv(&mut &conn, self.max_frame_size)?;
        if !ok {
            warn!("{} publish to {} not applied", self.prefix, name);
        }
        Ok(ok)
    }

    /// Subscribe for posts newer than the ones already in `topic`, refer
    /// [UserTopic::token]. Posts are pulled into `topic` on a separate thread until
    /// the subscription is closed. Return None if the broker rejected the
    /// subscription.
    pub fn subscribe(&self, topic: Arc<UserTopic>) -> Result<Option<Subscription>> {
        let token = topic.token();
        let (conn, ok) = self.request::<bool>(&Message::SubscribeConsumer(token.clone()))?;
        if !ok {
            warn!("{} subscribe rejected for {:?}", self.prefix, token);
            return Ok(None);
        }

        let mut worker = PullWorker::new(&self.prefix, Arc::clone(&topic));
        worker.set_max_frame_size(self.max_frame_size);
        worker.set_connection(conn.try_clone()?);
        let thrd = Thread::spawn(&self.prefix, worker);

        info!("{} subscribed to {} since:{}", self.prefix, token.name, token.last_id);
        Ok(Some(Subscription { topic, conn, thrd: Some(thrd) }))
    }

    fn request<T: Packetize>(&self, msg: &Message) -> Result<(net::TcpStream, T)> {
        let conn = err!(
            IOError,
            try: net::TcpStream::connect(self.broker),
            "{} connect", self.prefix
        )?;

        let mut w = io::BufWriter::new(&conn);
        frame::send(&mut w, msg)?;
        frame::flush(&mut w)?;
        mem::drop(w);

        let reply = frame::recv(&mut &conn, self.max_frame_size)?;
        Ok((conn, reply))
    }
}

/// Handle to a subscription, posts are pulled into [Subscription::as_topic].
pub struct Subscription {
    topic: Arc<UserTopic>,
    conn: net::TcpStream,
    thrd: Option<Thread<PullWorker<Arc<UserTopic>>, ()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(thrd) = self.thrd.take() {
            self.conn.shutdown(net::Shutdown::Both).ok();
            thrd.close_wait();
        }
    }
}

impl Subscription {
    pub fn as_topic(&self) -> &Arc<UserTopic> {
        &self.topic
    }

    /// Return whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        match &self.thrd {
            Some(thrd) => thrd.is_finished(),
            None => true,
        }
    }

    /// Wait for the broker to end the stream.
    pub fn wait(mut self) -> Option<Outcome> {
        let thrd = self.thrd.take()?;
        thrd.close_wait().take_outcome()
    }

    /// Close the subscription and return the outcome of the stream.
    pub fn close(self) -> Option<Outcome> {
        self.conn.shutdown(net::Shutdown::Both).ok();
        self.wait()
    }
}
