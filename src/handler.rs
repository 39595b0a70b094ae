use log::{debug, info, warn};

use std::{io, net, sync::Arc};

use crate::broker::Context;
use crate::frame;
use crate::listener::Endpoint;
use crate::thread::{Rx, Threadable};
use crate::{Error, ErrorKind, Result};
use crate::{FanOut, Message, Packetize, Protocol, PullWorker, PushWorker};
use crate::{TopicName, TopicToken};

/// Serve a single request on an accepted connection.
///
/// Every connection carries exactly one [Message], which must arrive within
/// [crate::Config::request_timeout]. Request-reply messages are closed after the
/// reply, publish connections are closed after the pull and its status reply,
/// subscribe connections are held until the subscriber goes away or the topic is
/// deleted. Peer connections are handed over to the node.
pub struct Handler {
    prefix: String,
    endpoint: Endpoint,
    ctx: Arc<Context>,
    conn: Option<net::TcpStream>,
}

impl Threadable for Handler {
    type Req = ();
    type Resp = ();

    fn main_loop(mut self, _rx: Rx<(), ()>) -> Self {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return self,
        };

        let res = match self.endpoint {
            Endpoint::Client => self.handle_client(conn),
            Endpoint::Peer => self.handle_peer(conn),
        };
        match res {
            Ok(()) => debug!("{} handler exit ...", self.prefix),
            Err(err) => debug!("{} handler exit, {}", self.prefix, err),
        }

        self
    }
}

impl Handler {
    pub fn new(
        prefix: &str,
        endpoint: Endpoint,
        ctx: Arc<Context>,
        conn: net::TcpStream,
    ) -> Handler {
        Handler {
            prefix: format!("{}:handler", prefix),
            endpoint,
            ctx,
            conn: Some(conn),
        }
    }

    fn handle_client(&self, conn: net::TcpStream) -> Result<()> {
        let msg = match self.recv_request(&conn) {
            Ok(msg) => msg,
            Err(err) => {
                shutdown(&conn);
                return Err(err);
            }
        };
        debug!("{} request {:?}", self.prefix, msg);

        match msg {
            Message::PublishData(name) => self.publish(conn, name),
            Message::SubscribeConsumer(token) => self.subscribe(conn, token),
            Message::DiscoverBroker(name) => {
                let broker = self.ctx.assigned_broker(&name);
                debug!("{} topic {} owned by {}", self.prefix, name, broker);
                reply(&conn, &broker)
            }
            Message::CreateTopic(name) => {
                let ok = self.ctx.registry.create(&name).is_ok();
                reply(&conn, &ok)
            }
            Message::DeleteTopic(name) => {
                let ok = self.ctx.registry.delete(&name).is_ok();
                reply(&conn, &ok)
            }
            Message::PeerHandshake(peer) => {
                shutdown(&conn);
                err!(ProtocolError, desc: "{} peer-handshake {} from client", self.prefix, peer)
            }
        }
    }

    fn handle_peer(&self, conn: net::TcpStream) -> Result<()> {
        let msg = match self.recv_request(&conn) {
            Ok(msg) => msg,
            Err(err) => {
                shutdown(&conn);
                return Err(err);
            }
        };
        match msg {
            Message::PeerHandshake(peer) => {
                info!("{} peer {} joined", self.prefix, peer);
                self.ctx.add_peer(peer, conn);
                Ok(())
            }
            msg => {
                shutdown(&conn);
                err!(ProtocolError, desc: "{} unexpected {:?} from peer", self.prefix, msg)
            }
        }
    }

    fn recv_request(&self, conn: &net::TcpStream) -> Result<Message> {
        conn.set_read_timeout(Some(self.ctx.config.request_timeout()))?;
        let msg = frame::recv(&mut &*conn, self.ctx.config.max_frame_size)?;
        conn.set_read_timeout(None)?;
        Ok(msg)
    }

    // Reply true and pull a bounded stream, then reply whether every post in the
    // stream was applied.
    fn publish(&self, conn: net::TcpStream, name: TopicName) -> Result<()> {
        let registry = &self.ctx.registry;

        let (topic, publisher) = match registry.register_publisher(&name, conn.try_clone()?) {
            Ok(val) => val,
            Err(_) => {
                warn!("{} publish to {} rejected", self.prefix, name);
                return reply(&conn, &false);
            }
        };

        let res = match reply(&conn, &true) {
            Ok(()) => {
                let mut worker = PullWorker::new(&self.prefix, topic);
                worker.set_max_frame_size(self.ctx.config.max_frame_size);
                let outcome = worker.run(&conn);

                let ok = outcome.success && outcome.cause.is_none();
                if !ok {
                    self.drain(&conn);
                }
                let res = reply(&conn, &ok);
                match outcome.cause {
                    Some(err) if !outcome.success => Err(err),
                    _ => res,
                }
            }
            Err(err) => Err(err),
        };

        registry.deregister_publisher(&name, publisher);
        shutdown(&conn);

        res
    }

    // Discard rest of a failed stream, till the publisher half-closes, so that
    // the status reply is not lost to a connection reset.
    fn drain(&self, conn: &net::TcpStream) {
        if conn.set_read_timeout(Some(self.ctx.config.request_timeout())).is_ok() {
            match io::copy(&mut &*conn, &mut io::sink()) {
                Ok(n) => debug!("{} drained {} bytes", self.prefix, n),
                Err(err) => debug!("{} drain, {}", self.prefix, err),
            }
        }
    }

    fn subscribe(&self, conn: net::TcpStream, token: TopicToken) -> Result<()> {
        let TopicToken { name, last_id } = token;
        let registry = &self.ctx.registry;

        let topic = match registry.get(&name) {
            Some(topic) => topic,
            None => {
                warn!("{} subscribe to missing topic {}", self.prefix, name);
                return reply(&conn, &false);
            }
        };
        let consumer = match registry.register_consumer(&name, conn.try_clone()?) {
            Ok(consumer) => consumer,
            Err(_) => return reply(&conn, &false),
        };

        let (fanout, transmitter) = FanOut::new(&self.prefix);
        let (sub_id, backfill) = match topic.subscribe_since(last_id, Arc::new(fanout)) {
            Ok(val) => val,
            Err(_) => {
                registry.deregister_consumer(&name, consumer);
                return reply(&conn, &false);
            }
        };

        let res = match reply(&conn, &true) {
            Ok(()) => {
                let n = backfill.len();
                debug!("{} subscribe {} since:{} backfill:{}", self.prefix, name, last_id, n);
                let push = PushWorker::new(&self.prefix, name.clone(), Protocol::KeepOpen, backfill);
                let outcome = push.run(io::BufWriter::new(&conn));
                match outcome.cause {
                    Some(err) => Err(err),
                    None => {
                        let idle = self.ctx.config.fanout_idle_timeout();
                        transmitter.run(&conn, idle).map(|_| ())
                    }
                }
            }
            Err(err) => Err(err),
        };

        topic.unsubscribe(sub_id);
        registry.deregister_consumer(&name, consumer);
        shutdown(&conn);
        info!("{} subscriber for {} done", self.prefix, name);

        res
    }
}

fn reply<T: Packetize>(conn: &net::TcpStream, val: &T) -> Result<()> {
    let mut w = io::BufWriter::new(conn);
    frame::send(&mut w, val)?;
    frame::flush(&mut w)
}

fn shutdown(conn: &net::TcpStream) {
    conn.shutdown(net::Shutdown::Both).ok();
}
