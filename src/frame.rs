//! Module `frame` implement length prefixed framing over blocking byte streams.
//!
//! Every frame is a `u32` big-endian length followed by that many bytes of body.
//! Bodies are values implementing [Packetize].

use std::io::{self, Read, Write};

use crate::types::dec_field;
use crate::util::advance;
use crate::{Error, ErrorKind, Result};
use crate::{Packet, Packetize, PostInfo};

/// Single item within a post stream, refer [crate::Protocol] for stream layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    PostInfo(PostInfo),
    Packet(Packet),
}

impl Packetize for StreamItem {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        match dec_field!(u8, stream, 0) {
            (Self::POST_INFO, n) => {
                let (info, n) = dec_field!(PostInfo, stream, n);
                Ok((StreamItem::PostInfo(info), n))
            }
            (Self::PACKET, n) => {
                let (packet, n) = dec_field!(Packet, stream, n);
                Ok((StreamItem::Packet(packet), n))
            }
            (tag, _) => err!(MalformedFrame, desc: "invalid stream-item tag {}", tag),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let (tag, value) = match self {
            StreamItem::PostInfo(info) => (Self::POST_INFO, info.encode()?),
            StreamItem::Packet(packet) => (Self::PACKET, packet.encode()?),
        };

        let mut data = Vec::with_capacity(1 + value.len());
        data.push(tag);
        data.extend_from_slice(&value);
        Ok(data)
    }
}

impl StreamItem {
    const POST_INFO: u8 = 1;
    const PACKET: u8 = 2;
}

/// Write a single frame with `body`.
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len())?;
    write_all(w, &len.to_be_bytes())?;
    write_all(w, body)
}

/// Read a single frame and return its body. End of stream before the first byte
/// of the frame, and connection resets, are returned as `Disconnected`, while end of
/// stream within the frame is returned as `InsufficientBytes`.
pub fn read_frame<R: Read>(r: &mut R, max_size: u32) -> Result<Vec<u8>> {
    let mut hdr = [0_u8; 4];
    match read_full(r, &mut hdr)? {
        0 => err!(Disconnected, desc: "end of stream")?,
        4 => (),
        n => err!(InsufficientBytes, desc: "frame header {}/4", n)?,
    }

    let len = u32::from_be_bytes(hdr);
    if len > max_size {
        err!(MalformedFrame, desc: "frame size {} exceeds {}", len, max_size)?;
    }

    let mut body = vec![0_u8; usize::try_from(len)?];
    match read_full(r, &mut body)? {
        n if n < body.len() => err!(InsufficientBytes, desc: "frame body {}/{}", n, len),
        _ => Ok(body),
    }
}

/// Encode `val` and send it as a single frame.
pub fn send<W: Write, T: Packetize>(w: &mut W, val: &T) -> Result<()> {
    write_frame(w, &val.encode()?)
}

/// Receive a single frame and decode it as `T`, the frame must not carry trailing
/// bytes.
pub fn recv<R: Read, T: Packetize>(r: &mut R, max_size: u32) -> Result<T> {
    let body = read_frame(r, max_size)?;
    match T::decode(&body) {
        Ok((val, n)) if n == body.len() => Ok(val),
        Ok((_, n)) => err!(MalformedFrame, desc: "trailing bytes {}/{}", n, body.len()),
        Err(err) if err.kind() == ErrorKind::InsufficientBytes => {
            err!(MalformedFrame, cause: err, "short frame of {} bytes", body.len())
        }
        Err(err) => Err(err),
    }
}

/// Flush buffered frames to the underlying stream.
pub fn flush<W: Write>(w: &mut W) -> Result<()> {
    match w.flush() {
        Ok(()) => Ok(()),
        Err(err) if is_disconnect(&err) => err!(Disconnected, cause: err, "flush"),
        Err(err) => err!(IOError, cause: err, "flush"),
    }
}

fn write_all<W: Write>(w: &mut W, data: &[u8]) -> Result<()> {
    match w.write_all(data) {
        Ok(()) => Ok(()),
        Err(err) if is_disconnect(&err) => err!(Disconnected, cause: err, "write"),
        Err(err) => err!(IOError, cause: err, "write"),
    }
}

// Read until `buf` is full or end of stream, return the number of bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) if is_disconnect(&err) => err!(Disconnected, cause: err, "read")?,
            Err(err) => err!(IOError, cause: err, "read")?,
        }
    }

    Ok(n)
}

pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    matches!(
        err.kind(),
        ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected | UnexpectedEof
    )
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
