use log::{debug, info, warn};

use std::sync::{Arc, Mutex, RwLock};
use std::{io, mem, net};

use crate::dao::{to_shared, SharedDao};
use crate::listener::{Endpoint, Listener};
use crate::{discovery, frame};
use crate::{Config, ConnectionInfo, Message, MemoryDao, TopicDao, TopicFileSystem};
use crate::{Error, ErrorKind, Result, TopicName, TopicRegistry};

/// Broker node, listening for clients on one endpoint and for peer brokers on
/// another.
///
/// A node is either the leader of a broker network or, when [Config::leader] is
/// supplied, registers itself with the leader at spawn time. Topics are sharded
/// across all known brokers, refer [discovery].
pub struct Broker {
    /// Broker node's name, from [Config::name].
    pub name: String,
    prefix: String,
    config: Config,
    inner: Inner,
}

enum Inner {
    Init,
    Main(RunLoop),
    Close,
}

struct RunLoop {
    ctx: Arc<Context>,
    client: Listener,
    peer: Listener,
}

/// State shared by listeners and handlers of a broker node.
pub struct Context {
    pub(crate) prefix: String,
    pub(crate) config: Config,
    pub(crate) registry: TopicRegistry,
    /// Client-facing address of this node, as advertised to clients and peers.
    pub(crate) own: ConnectionInfo,
    /// Client-facing address of peers, in the order they joined.
    pub(crate) peers: RwLock<Vec<ConnectionInfo>>,
    /// Connections from peers, and to the leader, held until the node closes.
    pub(crate) peer_conns: Mutex<Vec<net::TcpStream>>,
}

impl Context {
    /// Broker owning topic `name`, refer [discovery::assigned_broker].
    pub fn assigned_broker(&self, name: &TopicName) -> ConnectionInfo {
        let peers = self.peers.read().unwrap_or_else(|err| err.into_inner());
        discovery::assigned_broker(name, self.own, &peers)
    }

    /// Peer list is append only, repeated handshakes from the same peer are
    /// ignored.
    pub fn add_peer(&self, peer: ConnectionInfo, conn: net::TcpStream) {
        {
            let mut peers = self.peers.write().unwrap_or_else(|err| err.into_inner());
            if peer == self.own || peers.contains(&peer) {
                warn!("{} ignoring repeated peer {}", self.prefix, peer);
            } else {
                peers.push(peer);
            }
        }
        self.peer_conns.lock().unwrap_or_else(|err| err.into_inner()).push(conn);
    }

    fn to_peers(&self) -> Vec<ConnectionInfo> {
        self.peers.read().unwrap_or_else(|err| err.into_inner()).clone()
    }

    fn close(&self) {
        self.registry.close();

        let conns = {
            let mut conns = self.peer_conns.lock().unwrap_or_else(|err| err.into_inner());
            mem::take(&mut *conns)
        };
        debug!("{} closing {} peer connections", self.prefix, conns.len());
        for conn in conns.into_iter() {
            conn.shutdown(net::Shutdown::Both).ok();
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        match &self.inner {
            Inner::Init => debug!("{} drop ...", self.prefix),
            Inner::Main(_) => warn!("{} dropped without close_wait ...", self.prefix),
            Inner::Close => info!("{} drop ...", self.prefix),
        }
    }
}

impl Broker {
    /// Create a broker node from configuration. Broker shall be in `Init` state, to
    /// start the node call [Broker::spawn].
    pub fn from_config(config: Config) -> Result<Broker> {
        config.validate()?;

        let val = Broker {
            name: config.name.clone(),
            prefix: config.name.clone(),
            config,
            inner: Inner::Init,
        };

        Ok(val)
    }

    /// Start the node, topics are persisted under [Config::topics_dir] if supplied,
    /// else in memory.
    pub fn spawn(self) -> Result<Broker> {
        let dao = match &self.config.topics_dir {
            Some(dir) => to_shared(TopicFileSystem::new(dir)?),
            None => to_shared(MemoryDao::default()),
        };
        self.spawn_shared(dao)
    }

    /// Start the node, rehydrating topics from `dao` and persisting into it.
    pub fn spawn_with_dao<D>(self, dao: D) -> Result<Broker>
    where
        D: 'static + TopicDao,
    {
        self.spawn_shared(to_shared(dao))
    }

    fn spawn_shared(mut self, dao: SharedDao) -> Result<Broker> {
        if !matches!(&self.inner, Inner::Init) {
            err!(InvalidInput, desc: "broker can be spawned only in init-state ")?;
        }

        let prefix = self.prefix.clone();
        let client = Listener::bind(&prefix, Endpoint::Client, self.config.client_address())?;
        let peer = Listener::bind(&prefix, Endpoint::Peer, self.config.broker_address())?;

        let own = ConnectionInfo::from(net::SocketAddr::new(self.config.host, client.addr.port()));
        let ctx = Arc::new(Context {
            prefix: prefix.clone(),
            config: self.config.clone(),
            registry: TopicRegistry::from_dao(&prefix, dao)?,
            own,
            peers: RwLock::new(Vec::default()),
            peer_conns: Mutex::new(Vec::default()),
        });

        let client = client.spawn(Arc::clone(&ctx))?;
        let peer = match peer.spawn(Arc::clone(&ctx)) {
            Ok(peer) => peer,
            Err(err) => {
                client.close_wait().ok();
                return Err(err);
            }
        };

        if let Some(leader) = self.config.leader {
            if let Err(err) = register_with(&ctx, leader) {
                client.close_wait().ok();
                peer.close_wait().ok();
                ctx.close();
                return Err(err);
            }
        }

        info!(
            "{} spawned client:{} broker:{} advertise:{}",
            prefix, client.addr, peer.addr, own
        );
        self.inner = Inner::Main(RunLoop { ctx, client, peer });

        let val = Broker {
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            config: self.config.clone(),
            inner: mem::replace(&mut self.inner, Inner::Close),
        };
        Ok(val)
    }

    /// Stop listening, shutdown every consumer, publisher, peer and leader
    /// connection, then wait for connection handlers to exit.
    pub fn close_wait(mut self) -> Result<Broker> {
        match mem::replace(&mut self.inner, Inner::Close) {
            Inner::Main(RunLoop { ctx, client, peer }) => {
                let client = client.close_wait();
                let peer = peer.close_wait();
                ctx.close();
                let res1 = client.and_then(|l| l.join_handlers()).map(|_| ());
                let res2 = peer.and_then(|l| l.join_handlers()).map(|_| ());
                info!("{} closed ...", self.prefix);
                res1.and(res2)?;
            }
            Inner::Init | Inner::Close => (),
        }

        let val = Broker {
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            config: self.config.clone(),
            inner: Inner::Close,
        };
        Ok(val)
    }

    /// Client-facing address advertised by this node.
    pub fn client_address(&self) -> Option<ConnectionInfo> {
        match &self.inner {
            Inner::Main(RunLoop { ctx, .. }) => Some(ctx.own),
            _ => None,
        }
    }

    /// Broker-facing address of this node.
    pub fn broker_address(&self) -> Option<net::SocketAddr> {
        match &self.inner {
            Inner::Main(RunLoop { peer, .. }) => Some(peer.addr),
            _ => None,
        }
    }

    /// Client-facing address of known peers, in the order they joined.
    pub fn to_peers(&self) -> Vec<ConnectionInfo> {
        match &self.inner {
            Inner::Main(RunLoop { ctx, .. }) => ctx.to_peers(),
            _ => Vec::default(),
        }
    }

    /// Topic registry of a running node.
    pub fn as_registry(&self) -> Option<&TopicRegistry> {
        match &self.inner {
            Inner::Main(RunLoop { ctx, .. }) => Some(&ctx.registry),
            _ => None,
        }
    }
}

// Register this node's client address with the leader. Connection is held until
// the node is closed.
fn register_with(ctx: &Context, leader: net::SocketAddr) -> Result<()> {
    let conn = err!(IOError, try: net::TcpStream::connect(leader), "leader {}", leader)?;

    let mut w = io::BufWriter::new(&conn);
    frame::send(&mut w, &Message::PeerHandshake(ctx.own))?;
    frame::flush(&mut w)?;
    mem::drop(w);

    info!("{} registered with leader {}", ctx.prefix, leader);
    ctx.peer_conns.lock().unwrap_or_else(|err| err.into_inner()).push(conn);
    Ok(())
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod broker_test;
