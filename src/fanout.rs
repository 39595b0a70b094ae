//! Module `fanout` implement per subscriber delivery of posts.
//!
//! Packets from several in-flight posts can interleave on a topic, while a
//! subscriber expects each post as its [PostInfo] immediately followed by all of
//! its packets. [FanOut] sits between the topic and a subscriber's connection and
//! reorders notifications so that posts are delivered one after the other, in the
//! order their post-info arrived at the topic:
//!
//! ```text
//! topic:       I1 I2 p2a* p1a p1b*
//! subscriber:  I1 p1a p1b* I2 p2a*        (* final packet)
//! ```
//!
//! Reordering happens synchronously within the topic's notification, reordered
//! items are queued to a [Transmitter] which writes them to the connection.

use log::{debug, info};

use std::collections::{BTreeMap, VecDeque};
use std::sync::{mpsc, Mutex, MutexGuard};
use std::{io, net, time};

use crate::frame::{self, StreamItem};
use crate::{Error, ErrorKind, Result};
use crate::{Packet, PostID, PostInfo, Subscriber, TopicName};

/// Subscriber that reorders posts for a single connection, refer module
/// documentation for details.
pub struct FanOut {
    prefix: String,
    state: Mutex<Reorder>,
}

struct Reorder {
    // post currently streaming to subscriber.
    current: Option<PostID>,
    // post-infos waiting for their turn, in arrival order.
    pending: VecDeque<PostInfo>,
    // early packets of pending posts.
    buffers: BTreeMap<PostID, Vec<Packet>>,
    tx: mpsc::Sender<StreamItem>,
}

impl Subscriber for FanOut {
    fn on_post_info(&self, _topic: &TopicName, info: &PostInfo) -> Result<()> {
        let mut state = self.lock();
        match state.current {
            None => {
                state.current = Some(info.id);
                state.emit(StreamItem::PostInfo(info.clone()))
            }
            Some(_) => {
                state.pending.push_back(info.clone());
                state.buffers.insert(info.id, Vec::default());
                Ok(())
            }
        }
    }

    fn on_packet(&self, _topic: &TopicName, packet: &Packet) -> Result<()> {
        let mut state = self.lock();
        match state.current {
            Some(id) if id == packet.post_id => {
                state.emit(StreamItem::Packet(packet.clone()))?;
                match packet.is_final {
                    true => state.advance(),
                    false => Ok(()),
                }
            }
            _ => match state.buffers.get_mut(&packet.post_id) {
                Some(buffer) => {
                    buffer.push(packet.clone());
                    Ok(())
                }
                None => err!(
                    ProtocolError,
                    desc: "{} packet for unknown post {}", self.prefix, packet.post_id
                ),
            },
        }
    }
}

impl FanOut {
    /// Create a fan-out subscriber and its transmitter. Subscribe the returned
    /// fan-out with the topic and run the transmitter on subscriber's connection.
    pub fn new(prefix: &str) -> (FanOut, Transmitter) {
        let (tx, rx) = mpsc::channel();
        let state = Reorder {
            current: None,
            pending: VecDeque::default(),
            buffers: BTreeMap::default(),
            tx,
        };

        let fanout = FanOut { prefix: format!("{}:fanout", prefix), state: Mutex::new(state) };
        let transmitter = Transmitter { prefix: format!("{}:transmit", prefix), rx };
        (fanout, transmitter)
    }

    /// Post currently streaming to subscriber, if any.
    pub fn to_current(&self) -> Option<PostID> {
        self.lock().current
    }

    /// Number of posts waiting for their turn.
    pub fn num_pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<Reorder> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Reorder {
    fn emit(&mut self, item: StreamItem) -> Result<()> {
        err!(Disconnected, try: self.tx.send(item), "fan-out transmitter is gone")
    }

    // Current post is complete, move to the next pending post. Chained posts whose
    // packets have all arrived are emitted right away.
    fn advance(&mut self) -> Result<()> {
        loop {
            let info = match self.pending.pop_front() {
                Some(info) => info,
                None => {
                    self.current = None;
                    break Ok(());
                }
            };

            let id = info.id;
            self.current = Some(id);
            self.emit(StreamItem::PostInfo(info))?;

            let buffer = self.buffers.remove(&id).unwrap_or_default();
            let complete = buffer.last().map(|p| p.is_final).unwrap_or(false);
            for packet in buffer.into_iter() {
                self.emit(StreamItem::Packet(packet))?;
            }

            if !complete {
                break Ok(());
            }
        }
    }
}

/// Drains items queued by [FanOut] to the subscriber's connection.
pub struct Transmitter {
    prefix: String,
    rx: mpsc::Receiver<StreamItem>,
}

impl Transmitter {
    const IDLE_CHECK_TIMEOUT: time::Duration = time::Duration::from_millis(1);

    /// Write queued items to `conn` in queue order, until the connection fails or
    /// the fan-out is dropped. When nothing is queued for `idle`, check whether
    /// the connection is still open. Return number of items sent.
    pub fn run(self, conn: &net::TcpStream, idle: time::Duration) -> Result<usize> {
        let mut w = io::BufWriter::new(conn);
        let mut count = 0;

        info!("{} start idle:{:?}", self.prefix, idle);
        loop {
            match self.rx.recv_timeout(idle) {
                Ok(item) => {
                    frame::send(&mut w, &item)?;
                    count += 1;
                    // batch everything queued so far under one flush.
                    while let Ok(item) = self.rx.try_recv() {
                        frame::send(&mut w, &item)?;
                        count += 1;
                    }
                    frame::flush(&mut w)?;
                }
                Err(mpsc::RecvTimeoutError::Timeout) if is_closed(conn) => {
                    err!(Disconnected, desc: "{} subscriber closed after {}", self.prefix, count)?
                }
                Err(mpsc::RecvTimeoutError::Timeout) => (),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    debug!("{} fan-out dropped, sent {} items", self.prefix, count);
                    break Ok(count);
                }
            }
        }
    }
}

// Subscribers never write after subscribing, a readable end-of-stream or an error
// means the connection is gone, either closed by the peer or shut down locally.
fn is_closed(conn: &net::TcpStream) -> bool {
    if conn.set_read_timeout(Some(Transmitter::IDLE_CHECK_TIMEOUT)).is_err() {
        return true;
    }

    let mut buf = [0_u8; 1];
    match conn.peek(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod fanout_test;
