//! Module `thread` implement a generic multi-threading pattern.
//!
//! It is inspired from gen-server model from Erlang, where by, every thread is
//! expected to hold onto its own state, and handle all inter-thread communication
//! via channels and message queues.

use log::warn;

use std::sync::{mpsc, Arc};
use std::{mem, thread};

use crate::{Error, ErrorKind, Result};

/// Status of a non-blocking drain on a channel, along with the values received.
pub enum QueueStatus<T> {
    Ok(Vec<T>),
    Block(Vec<T>),
    Disconnected(Vec<T>),
}

impl<T> QueueStatus<T> {
    pub fn take_values(&mut self) -> Vec<T> {
        let val = match self {
            QueueStatus::Ok(val) => val,
            QueueStatus::Block(val) => val,
            QueueStatus::Disconnected(val) => val,
        };
        mem::take(val)
    }
}

pub type QueueReq<Q, R> = QueueStatus<(Q, Option<mpsc::Sender<R>>)>;

/// Trait can be used to spawn a type's instance as a thread.
///
/// Threads don't share state with rest of the system, other threads can
/// communicate using the channels carrying types `Req` for requests and `Resp` for
/// response.
pub trait Threadable: Sized {
    /// Request type that the implementing type can handle.
    type Req;
    /// Response type that the implementing type shall return.
    type Resp;

    /// Entry point for the thread.
    fn main_loop(self, rx: Rx<Self::Req, Self::Resp>) -> Self;
}

/// IPC type, that enumerates as either [mpsc::Sender] or, [mpsc::SyncSender] channel.
pub enum Tx<Q, R = ()> {
    N(mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>, Option<Arc<mio::Waker>>),
    S(mpsc::SyncSender<(Q, Option<mpsc::Sender<R>>)>, Option<Arc<mio::Waker>>),
}

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        match self {
            Tx::N(tx, waker) => Tx::N(tx.clone(), waker.as_ref().map(Arc::clone)),
            Tx::S(tx, waker) => Tx::S(tx.clone(), waker.as_ref().map(Arc::clone)),
        }
    }
}

impl<Q, R> Tx<Q, R> {
    /// Send a request message to thread and wait for a response.
    pub fn request(&self, request: Q) -> Result<R>
    where
        Q: 'static + Send,
        R: 'static + Send,
    {
        let (stx, srx) = mpsc::channel();
        let waker = match self {
            Tx::N(tx, waker) => {
                err!(IPCFail, try: tx.send((request, Some(stx))))?;
                waker
            }
            Tx::S(tx, waker) => {
                err!(IPCFail, try: tx.send((request, Some(stx))))?;
                waker
            }
        };
        if let Some(waker) = waker {
            err!(IOError, try: waker.wake())?;
        }

        err!(IPCFail, try: srx.recv())
    }
}

/// IPC-Type alias for parametrised [mpsc::Receiver]. Shall be passed to the
/// thread's main loop.
pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;

/// Thread type, providing gen-server pattern to do multi-threading.
///
/// Parametrized over
/// * **Q**: Request type.
/// * **R**: Optional, response type.
///
/// NOTE: When a thread value is dropped, it is made sure that there are no dangling
/// thread routines. Either call `close_wait()` to join with the thread, or call
/// `detach()` to let the thread run to completion on its own.
pub struct Thread<T, Q, R = ()>
where
    T: 'static + Send + Threadable<Req = Q, Resp = R>,
    Q: 'static + Send,
    R: 'static + Send,
{
    name: String,
    handle: Option<thread::JoinHandle<T>>,
    tx: Option<Tx<Q, R>>,
}

impl<T, Q, R> Drop for Thread<T, Q, R>
where
    T: 'static + Send + Threadable<Req = Q, Resp = R>,
    Q: 'static + Send,
    R: 'static + Send,
{
    fn drop(&mut self) {
        if self.handle.is_some() || self.tx.is_some() {
            warn!("thread {:?} dropped without close_wait() or detach()", self.name);
        }
    }
}

impl<T, Q, R> Thread<T, Q, R>
where
    T: 'static + Send + Threadable<Req = Q, Resp = R>,
    Q: 'static + Send,
    R: 'static + Send,
{
    /// Create a new Thread instance, using asynchronous channel with infinite buffer.
    ///
    /// `T` Threads context, when thread is spawned take ownership and calls `main_loop`
    pub fn spawn(name: &str, thrd: T) -> Thread<T, Q, R> {
        let (tx, rx) = mpsc::channel();
        Thread {
            name: name.to_string(),
            handle: Some(thread::spawn(move || thrd.main_loop(rx))),
            tx: Some(Tx::N(tx, None)),
        }
    }

    /// Create a new Thread instance, using synchronous channel with finite buffer.
    pub fn spawn_sync(name: &str, chan_size: usize, thrd: T) -> Thread<T, Q, R> {
        let (tx, rx) = mpsc::sync_channel(chan_size);

        Thread {
            name: name.to_string(),
            handle: Some(thread::spawn(move || thrd.main_loop(rx))),
            tx: Some(Tx::S(tx, None)),
        }
    }

    /// Set a waker on this thread, so that for every request the thread is woken up.
    pub fn set_waker(&mut self, waker: Arc<mio::Waker>) {
        self.tx = match self.tx.take() {
            Some(Tx::N(tx, _)) => Some(Tx::N(tx, Some(waker))),
            Some(Tx::S(tx, _)) => Some(Tx::S(tx, Some(waker))),
            None => None,
        };
    }

    /// Send a request message to thread and wait for a response.
    pub fn request(&self, request: Q) -> Result<R> {
        match &self.tx {
            Some(tx) => tx.request(request),
            None => err!(IPCFail, desc: "thread {:?} is closed", self.name),
        }
    }

    /// Return whether the thread's main loop has returned.
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Must way to exit/shutdown the thread. Note that all [Tx] clones of this
    /// thread must also be dropped for this call to return.
    pub fn close_wait(mut self) -> T {
        use std::panic;

        mem::drop(self.tx.take());

        match self.handle.take().map(|handle| handle.join()) {
            Some(Ok(thread_val)) => thread_val,
            Some(Err(err)) => panic::resume_unwind(err),
            None => unreachable!(),
        }
    }

    /// If thread does not need to join back with its parent, then parent thread can
    /// call detach() instead of close_wait().
    pub fn detach(mut self) {
        mem::drop(self.tx.take());
        mem::drop(self.handle.take());
    }
}

/// Uses non-blocking `try_recv`, drain at most `max` requests.
pub fn pending_requests<Q, R>(prefix: &str, rx: &Rx<Q, R>, max: usize) -> QueueReq<Q, R> {
    let mut reqs = Vec::with_capacity(max);
    loop {
        match rx.try_recv() {
            Ok(req) if reqs.len() < max => reqs.push(req),
            Ok(req) => {
                reqs.push(req);
                break QueueReq::Ok(reqs);
            }
            Err(mpsc::TryRecvError::Empty) => break QueueReq::Block(reqs),
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!("{} req-channel disconnected ...", prefix);
                break QueueReq::Disconnected(reqs);
            }
        }
    }
}
