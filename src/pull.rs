use log::{debug, error, info, warn};

use std::{io, net};

use crate::frame::{self, StreamItem};
use crate::push::{Callback, Outcome, Protocol};
use crate::thread::{Rx, Threadable};
use crate::{Error, ErrorKind, Result};
use crate::{PostSink, MAX_FRAME_SIZE};

/// Read a post stream, refer [Protocol], and apply it to a [PostSink].
///
/// Bounded streams complete after `count` posts. A stream that ends at a post
/// boundary, because the peer closed or reset the connection, is treated as
/// success with `Disconnected` as the cause. This is the normal way for an open
/// ended stream to finish. Stream ending in the middle of a post, malformed frames
/// and errors from the sink are treated as failure.
///
/// Partially applied posts are not rolled back.
pub struct PullWorker<S: PostSink> {
    prefix: String,
    sink: S,
    max_frame_size: u32,
    callback: Option<Callback>,
    // used when spawned as a thread.
    conn: Option<net::TcpStream>,
    outcome: Option<Outcome>,
}

impl<S> Threadable for PullWorker<S>
where
    S: 'static + Send + PostSink,
{
    type Req = ();
    type Resp = ();

    fn main_loop(mut self, _rx: Rx<(), ()>) -> Self {
        match self.conn.take() {
            Some(conn) => {
                let outcome = self.run(conn);
                self.outcome = Some(outcome);
            }
            None => error!("{} spawned without a connection", self.prefix),
        }
        self
    }
}

impl<S: PostSink> PullWorker<S> {
    pub fn new(prefix: &str, sink: S) -> PullWorker<S> {
        PullWorker {
            prefix: format!("{}:pull:{}", prefix, sink.name()),
            sink,
            max_frame_size: MAX_FRAME_SIZE,
            callback: None,
            conn: None,
            outcome: None,
        }
    }

    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn set_callback(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    /// Connection to pull from, when this worker is spawned as a [crate::Thread].
    pub fn set_connection(&mut self, conn: net::TcpStream) {
        self.conn = Some(conn);
    }

    pub fn as_sink(&self) -> &S {
        &self.sink
    }

    /// Outcome of the pull, available after the thread is joined.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// Pull from `conn` until the stream completes or fails. Errors are not
    /// returned but reported in the outcome, which is also handed over to callback
    /// if any.
    pub fn run<R: io::Read>(&mut self, conn: R) -> Outcome {
        let mut conn = io::BufReader::new(conn);
        let mut count = 0;

        let (success, cause) = match self.pull(&mut conn, &mut count) {
            Ok(cause) => (true, cause),
            Err(err) => (false, Some(err)),
        };
        let outcome = Outcome { topic: self.sink.name().clone(), posts: count, success, cause };
        match (outcome.success, outcome.is_peer_closed()) {
            (true, true) => info!("{} peer closed {}", self.prefix, outcome),
            (true, false) => info!("{} done {}", self.prefix, outcome),
            (false, _) => warn!("{} fail {}", self.prefix, outcome),
        }

        if let Some(callback) = self.callback.take() {
            callback(&outcome);
        }
        outcome
    }

    // Return the disconnect error, if stream ended by peer closing the connection.
    fn pull<R: io::Read>(&self, conn: &mut R, count: &mut usize) -> Result<Option<Error>> {
        let max = self.max_frame_size;

        let limit = match frame::recv::<_, i32>(conn, max) {
            Ok(Protocol::KEEP_OPEN_COUNT) => None,
            Ok(n) if n >= 0 => Some(usize::try_from(n)?),
            Ok(n) => err!(MalformedFrame, desc: "{} stream count {}", self.prefix, n)?,
            Err(err) if err.kind() == ErrorKind::Disconnected => return Ok(Some(err)),
            Err(err) => return Err(err),
        };
        debug!("{} stream limit:{:?}", self.prefix, limit);

        loop {
            if Some(*count) == limit {
                break Ok(None);
            }

            let id = match frame::recv::<_, StreamItem>(conn, max) {
                Ok(StreamItem::PostInfo(info)) => {
                    let id = info.id;
                    self.sink.post_info(info)?;
                    id
                }
                Ok(StreamItem::Packet(p)) => err!(
                    ProtocolError,
                    desc: "{} packet {} before post-info", self.prefix, p.post_id
                )?,
                Err(err) if err.kind() == ErrorKind::Disconnected => break Ok(Some(err)),
                Err(err) => break Err(err),
            };

            loop {
                match frame::recv::<_, StreamItem>(conn, max)? {
                    StreamItem::Packet(p) if p.post_id == id => {
                        let is_final = p.is_final;
                        self.sink.packet(p)?;
                        if is_final {
                            break;
                        }
                    }
                    StreamItem::Packet(p) => err!(
                        ProtocolError,
                        desc: "{} packet {} within post {}", self.prefix, p.post_id, id
                    )?,
                    StreamItem::PostInfo(info) => err!(
                        ProtocolError,
                        desc: "{} post-info {} within post {}", self.prefix, info.id, id
                    )?,
                }
            }
            *count += 1;
        }
    }
}

#[cfg(test)]
#[path = "pull_test.rs"]
mod pull_test;
