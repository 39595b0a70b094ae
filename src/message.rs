use crate::types::dec_field;
use crate::util::advance;
use crate::{ConnectionInfo, Packetize, TopicName, TopicToken};
use crate::{Error, ErrorKind, Result};

/// Request sent to a broker, one per connection.
///
/// Client-facing endpoint accepts every variant except `PeerHandshake`, broker
/// facing endpoint accepts only `PeerHandshake`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Publish a bounded stream of posts to topic. Broker replies `bool`.
    PublishData(TopicName),
    /// Subscribe to topic from the token's last post. Broker replies `bool` and
    /// keeps streaming posts until the connection is closed.
    SubscribeConsumer(TopicToken),
    /// Ask for the broker owning topic. Broker replies [ConnectionInfo].
    DiscoverBroker(TopicName),
    /// Broker replies `bool`.
    CreateTopic(TopicName),
    /// Broker replies `bool`.
    DeleteTopic(TopicName),
    /// A peer broker registers its client-facing address.
    PeerHandshake(ConnectionInfo),
}

impl Packetize for Message {
    fn decode<T: AsRef<[u8]>>(stream: T) -> Result<(Self, usize)> {
        use Message::*;

        let stream: &[u8] = stream.as_ref();

        let (tag, n) = dec_field!(u8, stream, 0);
        let (msg, n) = match tag {
            Self::PUBLISH_DATA => {
                let (name, n) = dec_field!(TopicName, stream, n);
                (PublishData(name), n)
            }
            Self::SUBSCRIBE_CONSUMER => {
                let (token, n) = dec_field!(TopicToken, stream, n);
                (SubscribeConsumer(token), n)
            }
            Self::DISCOVER_BROKER => {
                let (name, n) = dec_field!(TopicName, stream, n);
                (DiscoverBroker(name), n)
            }
            Self::CREATE_TOPIC => {
                let (name, n) = dec_field!(TopicName, stream, n);
                (CreateTopic(name), n)
            }
            Self::DELETE_TOPIC => {
                let (name, n) = dec_field!(TopicName, stream, n);
                (DeleteTopic(name), n)
            }
            Self::PEER_HANDSHAKE => {
                let (info, n) = dec_field!(ConnectionInfo, stream, n);
                (PeerHandshake(info), n)
            }
            tag => err!(MalformedFrame, desc: "invalid message tag {}", tag)?,
        };

        Ok((msg, n))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        use Message::*;

        let (tag, value) = match self {
            PublishData(name) => (Self::PUBLISH_DATA, name.encode()?),
            SubscribeConsumer(token) => (Self::SUBSCRIBE_CONSUMER, token.encode()?),
            DiscoverBroker(name) => (Self::DISCOVER_BROKER, name.encode()?),
            CreateTopic(name) => (Self::CREATE_TOPIC, name.encode()?),
            DeleteTopic(name) => (Self::DELETE_TOPIC, name.encode()?),
            PeerHandshake(info) => (Self::PEER_HANDSHAKE, info.encode()?),
        };

        let mut data = Vec::with_capacity(1 + value.len());
        data.push(tag);
        data.extend_from_slice(&value);
        Ok(data)
    }
}

impl Message {
    const PUBLISH_DATA: u8 = 1;
    const SUBSCRIBE_CONSUMER: u8 = 2;
    const DISCOVER_BROKER: u8 = 3;
    const CREATE_TOPIC: u8 = 4;
    const DELETE_TOPIC: u8 = 5;
    const PEER_HANDSHAKE: u8 = 6;

    /// Topic this message refers to, if any.
    pub fn to_topic_name(&self) -> Option<&TopicName> {
        use Message::*;

        match self {
            PublishData(name) | DiscoverBroker(name) => Some(name),
            CreateTopic(name) | DeleteTopic(name) => Some(name),
            SubscribeConsumer(token) => Some(&token.name),
            PeerHandshake(_) => None,
        }
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;
