use log::{debug, error, info, trace, warn};
use mio::event::Events;

use std::{io, mem, net, sync::Arc};

use crate::broker::Context;
use crate::handler::Handler;
use crate::thread::{pending_requests, QueueStatus, Rx, Thread, Threadable};
use crate::{Error, ErrorKind, Result};

type ThreadRx = Rx<Request, Result<Response>>;

/// Broker nodes listen on two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Publish, subscribe, discover, create and delete requests from clients.
    Client,
    /// Handshake from peer brokers joining the network.
    Peer,
}

/// Accept connections on an endpoint and spawn a [Handler] thread for each of
/// them.
pub struct Listener {
    /// Human readable name for this mio thread.
    pub name: String,
    /// Local address this listener is bound to.
    pub addr: net::SocketAddr,
    endpoint: Endpoint,
    prefix: String,
    inner: Inner,
}

pub enum Inner {
    Init(net::TcpListener),
    // Held by Broker
    Handle(Arc<mio::Waker>, Thread<Listener, Request, Result<Response>>),
    Main(RunLoop),
    Close,
}

pub struct RunLoop {
    /// Mio poller for asynchronous handling, aggregate events from server and
    /// thread-waker.
    poll: mio::Poll,
    /// Non-blocking server socket, accepted connections are handed over to
    /// handlers in blocking mode.
    server: Option<net::TcpListener>,
    /// Same socket as `server`, registered with `poll`.
    _registered: Option<mio::net::TcpListener>,
    ctx: Arc<Context>,
    /// Handler threads for accepted connections, joined by [Listener::join_handlers].
    handlers: Vec<Thread<Handler, (), ()>>,
    /// thread is already closed.
    closed: bool,
}

impl Drop for Listener {
    fn drop(&mut self) {
        let inner = mem::replace(&mut self.inner, Inner::Close);
        match inner {
            Inner::Init(_) => debug!("{} drop ...", self.prefix),
            Inner::Handle(_waker, thrd) => {
                warn!("{} dropped without close_wait, detaching ...", self.prefix);
                thrd.detach();
            }
            Inner::Main(_run_loop) => info!("{} drop ...", self.prefix),
            Inner::Close => trace!("{} drop ...", self.prefix),
        }
    }
}

impl Listener {
    /// Poll register token for waker event, OTP calls made to this thread shall trigger
    /// this event.
    pub const TOKEN_WAKE: mio::Token = mio::Token(1);
    /// Poll register for server TcpStream.
    pub const TOKEN_SERVER: mio::Token = mio::Token(2);

    /// Bind to `addr`, listener shall be in `Init` state. Binding happens before
    /// spawning so that ephemeral ports are known to the caller. To start this
    /// listener thread call [Listener::spawn].
    pub fn bind(prefix: &str, endpoint: Endpoint, addr: net::SocketAddr) -> Result<Listener> {
        let server = err!(IOError, try: net::TcpListener::bind(addr), "bind {}", addr)?;
        let addr = server.local_addr()?;

        let mut val = Listener {
            name: format!("{:?}-listener-init", endpoint).to_lowercase(),
            addr,
            endpoint,
            prefix: String::default(),
            inner: Inner::Init(server),
        };
        val.prefix = val.prefix(prefix);
        Ok(val)
    }

    pub fn spawn(mut self, ctx: Arc<Context>) -> Result<Listener> {
        use mio::{Interest, Waker};

        let server = match mem::replace(&mut self.inner, Inner::Close) {
            Inner::Init(server) => server,
            _ => err!(InvalidInput, desc: "listener can be spawned only in init-state ")?,
        };

        server.set_nonblocking(true)?;
        let mut registered = mio::net::TcpListener::from_std(server.try_clone()?);

        let poll = err!(IOError, try: mio::Poll::new(), "fail creating mio::Poll")?;
        poll.registry().register(&mut registered, Self::TOKEN_SERVER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), Self::TOKEN_WAKE)?);

        let listener = Listener {
            name: format!("{:?}-listener-main", self.endpoint).to_lowercase(),
            addr: self.addr,
            endpoint: self.endpoint,
            prefix: self.prefix.clone(),
            inner: Inner::Main(RunLoop {
                poll,
                server: Some(server),
                _registered: Some(registered),
                ctx,
                handlers: Vec::default(),
                closed: false,
            }),
        };
        let mut thrd = Thread::spawn(&self.prefix, listener);
        thrd.set_waker(Arc::clone(&waker));

        let listener = Listener {
            name: format!("{:?}-listener-handle", self.endpoint).to_lowercase(),
            addr: self.addr,
            endpoint: self.endpoint,
            prefix: self.prefix.clone(),
            inner: Inner::Handle(waker, thrd),
        };

        Ok(listener)
    }
}

pub enum Request {
    Close,
}

pub enum Response {
    Ok,
}

// calls to interface with listener-thread, and shall wake the thread
impl Listener {
    pub fn close_wait(mut self) -> Result<Listener> {
        match mem::replace(&mut self.inner, Inner::Close) {
            Inner::Handle(_waker, thrd) => {
                thrd.request(Request::Close)??;
                Ok(thrd.close_wait())
            }
            _ => err!(InvalidInput, desc: "{} not spawned", self.prefix),
        }
    }

    /// Wait for handler threads spawned by this listener, call this on the value
    /// returned by [Listener::close_wait] after shutting down the connections
    /// served by the handlers.
    pub fn join_handlers(mut self) -> Result<Listener> {
        let handlers = match &mut self.inner {
            Inner::Main(RunLoop { handlers, .. }) => mem::take(handlers),
            _ => err!(InvalidInput, desc: "{} not closed", self.prefix)?,
        };

        let n = handlers.len();
        for handler in handlers.into_iter() {
            handler.close_wait();
        }
        debug!("{} joined {} handlers", self.prefix, n);

        Ok(self)
    }
}

impl Threadable for Listener {
    type Req = Request;
    type Resp = Result<Response>;

    fn main_loop(mut self, rx: ThreadRx) -> Self {
        info!("{} spawn thread addr:{} ...", self.prefix, self.addr);

        let mut events = Events::with_capacity(crate::POLL_EVENTS_SIZE);
        loop {
            match self.as_mut_poll().poll(&mut events, None) {
                Ok(()) => (),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("{} poll failed, {}", self.prefix, err);
                    break;
                }
            }

            match self.mio_events(&rx, &events) {
                // Exit or not.
                Ok(true) => break,
                Ok(false) => (),
                Err(err) => {
                    error!("{} exiting on error {}", self.prefix, err);
                    break;
                }
            };
        }

        self.handle_close();
        info!("{} thread exit ...", self.prefix);

        self
    }
}

impl Listener {
    // return (exit,)
    // IPCFail on local channel communication.
    fn mio_events(&mut self, rx: &ThreadRx, events: &Events) -> Result<bool> {
        let mut count = 0_usize;
        let mut exit = false;

        for event in events.iter() {
            trace!("{} poll-event token:{}", self.prefix, event.token().0);
            count += 1;

            match event.token() {
                Self::TOKEN_WAKE => exit = exit || self.drain_control_chan(rx)?,
                Self::TOKEN_SERVER => self.accept_conns(),
                token => warn!("{} unexpected token {}", self.prefix, token.0),
            }
        }

        debug!("{} polled and got {} events", self.prefix, count);
        Ok(exit)
    }

    // Return (exit,)
    // IPCFail on local channel communication.
    fn drain_control_chan(&mut self, rx: &ThreadRx) -> Result<bool> {
        use crate::CONTROL_CHAN_SIZE;

        let mut status = pending_requests(&self.prefix, rx, CONTROL_CHAN_SIZE);
        let mut exit = matches!(status, QueueStatus::Disconnected(_));

        for req in status.take_values().into_iter() {
            match req {
                (Request::Close, Some(tx)) => {
                    exit = true;
                    err!(IPCFail, try: tx.send(Ok(self.handle_close())))?
                }
                (Request::Close, None) => {
                    exit = true;
                    self.handle_close();
                }
            }
        }

        Ok(exit)
    }

    // Accept till the server would block.
    fn accept_conns(&mut self) {
        let RunLoop { server, ctx, handlers, closed, .. } = match &mut self.inner {
            Inner::Main(run_loop) => run_loop,
            _ => return,
        };
        let server = match server {
            Some(server) if !*closed => server,
            _ => return,
        };

        // reap handlers that are done.
        let (done, live): (Vec<_>, Vec<_>) =
            mem::take(handlers).into_iter().partition(|h| h.is_finished());
        *handlers = live;
        for handler in done.into_iter() {
            handler.close_wait();
        }

        loop {
            match server.accept() {
                Ok((conn, addr)) => {
                    if let Err(err) = conn.set_nonblocking(false) {
                        error!("{} blocking mode for {}, {}", self.prefix, addr, err);
                        continue;
                    }
                    // for every successful accept launch a handler thread.
                    let prefix = format!("{}:{}", self.prefix, addr);
                    let handler = Handler::new(&prefix, self.endpoint, Arc::clone(ctx), conn);
                    handlers.push(Thread::spawn_sync(&prefix, 1, handler));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => {
                    error!("{} connection accept error, {}", self.prefix, err);
                    break;
                }
            }
        }
    }

    fn handle_close(&mut self) -> Response {
        let RunLoop { server, _registered, closed, .. } = match &mut self.inner {
            Inner::Main(run_loop) => run_loop,
            _ => return Response::Ok,
        };

        if !*closed {
            mem::drop(_registered.take());
            mem::drop(server.take());

            info!("{} closed ...", self.prefix);
            *closed = true;
        }
        Response::Ok
    }
}

impl Listener {
    fn prefix(&self, prefix: &str) -> String {
        format!("{}:{}:{}", prefix, self.name, self.addr)
    }

    fn as_mut_poll(&mut self) -> &mut mio::Poll {
        match &mut self.inner {
            Inner::Main(RunLoop { poll, .. }) => poll,
            _ => unreachable!(),
        }
    }
}
