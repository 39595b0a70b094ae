#[cfg(any(feature = "fuzzy", test))]
use arbitrary::{Arbitrary, Error as ArbitraryError, Unstructured};

use std::ops::Deref;
use std::{fmt, net, result};

use crate::util::{self, advance};
use crate::{Error, ErrorKind, Packetize, Result};

/// Type alias for post identifier.
pub type PostID = i64;

/// Sentinel post-id, to fetch all posts in a topic. Also returned as the last
/// completed post-id of an empty topic.
pub const FETCH_ALL_POSTS: PostID = -1;

macro_rules! int_packetize {
    ($($type:ty),+) => {$(
        impl Packetize for $type {
            fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
                const N: usize = std::mem::size_of::<$type>();

                let stream: &[u8] = stream.as_ref();
                match stream.len() {
                    n if n >= N => {
                        let mut bytes = [0_u8; N];
                        bytes.copy_from_slice(&stream[..N]);
                        Ok((<$type>::from_be_bytes(bytes), N))
                    }
                    _ => err!(InsufficientBytes, desc: "{}::decode()", stringify!($type)),
                }
            }

            fn encode(&self) -> Result<Vec<u8>> {
                Ok(self.to_be_bytes().to_vec())
            }
        }
    )+};
}

int_packetize!(u8, u16, u32, i32, i64);

impl Packetize for bool {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let (val, n) = u8::decode(stream)?;
        Ok((util::u8_to_bool(val, "bool::decode")?, n))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(vec![util::bool_to_u8(*self)])
    }
}

impl Packetize for String {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        let (len, _) = u16::decode(stream)?;
        let len = usize::from(len);
        if len + 2 > stream.len() {
            err!(InsufficientBytes, desc: "String::decode")?;
        }

        match std::str::from_utf8(&stream[2..2 + len]) {
            Ok(s) => Ok((s.to_string(), 2 + len)),
            Err(err) => err!(MalformedFrame, cause: err, "String::decode"),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let len = match u16::try_from(self.len()) {
            Ok(len) => len,
            Err(_) => err!(InvalidInput, desc: "String::encode too large {}", self.len())?,
        };

        let mut data = Vec::with_capacity(2 + self.len());
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(self.as_bytes());
        Ok(data)
    }
}

impl Packetize for Vec<u8> {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        let (len, _) = u32::decode(stream)?;
        let len = usize::try_from(len)?;
        if len + 4 > stream.len() {
            err!(InsufficientBytes, desc: "Vec<u8>::decode")?;
        }

        Ok((stream[4..4 + len].to_vec(), 4 + len))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let len = u32::try_from(self.len())?;

        let mut data = Vec::with_capacity(4 + self.len());
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(self);
        Ok(data)
    }
}

/// Decode a field at offset `$n` of `$stream`, return (value, next-offset).
macro_rules! dec_field {
    ($type:ty, $stream:expr, $n:expr) => {{
        let (val, m) = <$type>::decode(advance($stream, $n)?)?;
        (val, $n + m)
    }};
}
pub(crate) use dec_field;

/// Name of a topic. Names are used as directory names by the file-system store,
/// hence they cannot contain path separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicName(String);

impl Deref for TopicName {
    type Target = String;

    fn deref(&self) -> &String {
        &self.0
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TopicName {
    type Error = Error;

    fn try_from(val: String) -> Result<TopicName> {
        let name = TopicName(val);
        name.validate()?;
        Ok(name)
    }
}

impl TryFrom<&str> for TopicName {
    type Error = Error;

    fn try_from(val: &str) -> Result<TopicName> {
        TopicName::try_from(val.to_string())
    }
}

impl Packetize for TopicName {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let (val, n) = String::decode(stream)?;
        match TopicName::try_from(val) {
            Ok(name) => Ok((name, n)),
            Err(err) => err!(MalformedFrame, cause: err, "TopicName::decode"),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.0.encode()
    }
}

impl TopicName {
    pub const MAX_LEN: usize = 255;

    pub fn validate(&self) -> Result<()> {
        let name = self.0.as_str();
        if name.is_empty() || name.len() > Self::MAX_LEN {
            err!(InvalidInput, desc: "topic-name length {}", name.len())
        } else if name == "." || name == ".." {
            err!(InvalidInput, desc: "topic-name {:?}", name)
        } else if name.chars().any(|ch| matches!(ch, '/' | '\\' | '\0')) {
            err!(InvalidInput, desc: "topic-name {:?} has path characters", name)
        } else {
            Ok(())
        }
    }

    /// Hash of this topic, a pure function of the name, used for sharding topics
    /// across brokers.
    pub fn hash32(&self) -> i32 {
        util::hash32(&self.0) as i32
    }
}

/// Meta-data header for a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInfo {
    /// Unique identifier for this post.
    pub id: PostID,
    /// Identity of the poster, shall be made of word characters.
    pub poster: String,
    /// Payload type, typically a file-extension like `txt` or `png`.
    pub extension: String,
}

impl Packetize for PostInfo {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        let (id, n) = dec_field!(i64, stream, 0);
        let (poster, n) = dec_field!(String, stream, n);
        let (extension, n) = dec_field!(String, stream, n);

        Ok((PostInfo { id, poster, extension }, n))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut data = self.id.encode()?;
        data.extend_from_slice(&self.poster.encode()?);
        data.extend_from_slice(&self.extension.encode()?);
        Ok(data)
    }
}

impl PostInfo {
    /// Create a new post-info with a freshly generated id.
    pub fn new(poster: &str, extension: &str) -> PostInfo {
        PostInfo {
            id: new_post_id(),
            poster: poster.to_string(),
            extension: extension.to_string(),
        }
    }
}

/// Chunk of a post's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Id of the post that this packet belongs to.
    pub post_id: PostID,
    /// Last packet of the post.
    pub is_final: bool,
    pub payload: Vec<u8>,
}

impl Packetize for Packet {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        let (post_id, n) = dec_field!(i64, stream, 0);
        let (is_final, n) = dec_field!(bool, stream, n);
        let (payload, n) = dec_field!(Vec<u8>, stream, n);

        Ok((Packet { post_id, is_final, payload }, n))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut data = self.post_id.encode()?;
        data.extend_from_slice(&self.is_final.encode()?);
        data.extend_from_slice(&self.payload.encode()?);
        Ok(data)
    }
}

/// A complete post, meta-data and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub info: PostInfo,
    pub data: Vec<u8>,
}

#[cfg(any(feature = "fuzzy", test))]
impl<'a> Arbitrary<'a> for Post {
    fn arbitrary(uns: &mut Unstructured<'a>) -> result::Result<Self, ArbitraryError> {
        let posters = ["alice", "bob", "carol_2"];
        let extensions = ["txt", "png", "jpeg", "~"];

        let info = PostInfo {
            id: uns.int_in_range(0..=i64::MAX)?,
            poster: uns.choose(&posters)?.to_string(),
            extension: uns.choose(&extensions)?.to_string(),
        };
        let len = uns.int_in_range(0..=4096_usize)?;
        let data = (0..len).map(|i| (i % 251) as u8).collect();

        Ok(Post { info, data })
    }
}

impl Post {
    pub fn new(info: PostInfo, data: Vec<u8>) -> Post {
        Post { info, data }
    }

    /// Split payload into packets of `size` bytes or less. Last packet is marked
    /// as final, an empty payload is sent as a single empty final packet.
    pub fn to_packets(&self, size: usize) -> Vec<Packet> {
        let size = size.max(1);
        let mut packets: Vec<Packet> = self
            .data
            .chunks(size)
            .map(|chunk| Packet {
                post_id: self.info.id,
                is_final: false,
                payload: chunk.to_vec(),
            })
            .collect();

        match packets.last_mut() {
            Some(packet) => packet.is_final = true,
            None => packets.push(Packet {
                post_id: self.info.id,
                is_final: true,
                payload: Vec::default(),
            }),
        }

        packets
    }

    /// Reassemble a post from its packets. Packets must all belong to `info` and
    /// only the last one should be final.
    pub fn from_packets(info: PostInfo, packets: &[Packet]) -> Result<Post> {
        let mut data = Vec::default();
        for (i, packet) in packets.iter().enumerate() {
            if packet.post_id != info.id {
                err!(
                    ProtocolError,
                    desc: "packet for post {} in post {}", packet.post_id, info.id
                )?;
            }
            if packet.is_final != (i == packets.len() - 1) {
                err!(ProtocolError, desc: "final packet at {}/{}", i, packets.len())?;
            }
            data.extend_from_slice(&packet.payload);
        }

        match packets.last() {
            Some(_) => Ok(Post { info, data }),
            None => err!(ProtocolError, desc: "post {} without packets", info.id),
        }
    }
}

/// Cursor presented by a consumer when subscribing to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicToken {
    pub name: TopicName,
    /// Last post consumer already has, [FETCH_ALL_POSTS] to fetch everything.
    pub last_id: PostID,
}

impl Packetize for TopicToken {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let stream: &[u8] = stream.as_ref();

        let (name, n) = dec_field!(TopicName, stream, 0);
        let (last_id, n) = dec_field!(i64, stream, n);

        Ok((TopicToken { name, last_id }, n))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut data = self.name.encode()?;
        data.extend_from_slice(&self.last_id.encode()?);
        Ok(data)
    }
}

/// Network address of a broker's client-facing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub addr: net::SocketAddr,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.addr)
    }
}

impl From<net::SocketAddr> for ConnectionInfo {
    fn from(addr: net::SocketAddr) -> ConnectionInfo {
        ConnectionInfo { addr }
    }
}

impl Packetize for ConnectionInfo {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        let (addr, n) = String::decode(stream)?;
        match addr.parse::<net::SocketAddr>() {
            Ok(addr) => Ok((ConnectionInfo { addr }, n)),
            Err(err) => err!(MalformedFrame, cause: err, "ConnectionInfo::decode {}", addr),
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.addr.to_string().encode()
    }
}

/// Generate a post-id from a v4 uuid, folded into a non-negative i64.
pub fn new_post_id() -> PostID {
    let uuid = uuid::Uuid::new_v4().as_u128();
    let id = (uuid as u64) ^ ((uuid >> 64) as u64);
    (id & (i64::MAX as u64)) as i64
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
