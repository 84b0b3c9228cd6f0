//! Wire framing shared by the TCP transports
//!
//! Every frame travels inside a length-delimited envelope (4-byte big-endian
//! length header). The envelope body starts with a one-byte tag:
//!
//! | tag | frame | body |
//! |-----|-------|------|
//! | 0 | message without topic | payload |
//! | 1 | message with topic | u16 topic length, topic, payload |
//! | 2 | subscribe | topic |
//! | 3 | unsubscribe | topic |
//! | 4 | close | empty |
//! | 5 | connect | client id |
//! | 6 | acknowledgement | ack code (0 connack, 1 suback, 2 pingresp), topic |
//! | 7 | ping request | empty |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Maximum frame size (10MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

const TAG_MESSAGE: u8 = 0;
const TAG_TOPIC_MESSAGE: u8 = 1;
const TAG_SUBSCRIBE: u8 = 2;
const TAG_UNSUBSCRIBE: u8 = 3;
const TAG_CLOSE: u8 = 4;
const TAG_CONNECT: u8 = 5;
const TAG_ACK: u8 = 6;
const TAG_PING_REQ: u8 = 7;

/// Acknowledgements a broker service sends back to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    ConnAck,
    SubAck,
    PingResp,
}

impl AckKind {
    /// Name used in `MessageContext::ack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckKind::ConnAck => "connack",
            AckKind::SubAck => "suback",
            AckKind::PingResp => "pingresp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connack" => Some(AckKind::ConnAck),
            "suback" => Some(AckKind::SubAck),
            "pingresp" => Some(AckKind::PingResp),
            _ => None,
        }
    }

    fn code(&self) -> u8 {
        match self {
            AckKind::ConnAck => 0,
            AckKind::SubAck => 1,
            AckKind::PingResp => 2,
        }
    }

    fn from_code(code: u8) -> io::Result<Self> {
        match code {
            0 => Ok(AckKind::ConnAck),
            1 => Ok(AckKind::SubAck),
            2 => Ok(AckKind::PingResp),
            other => Err(invalid_data(format!("unknown ack code {}", other))),
        }
    }
}

/// One unit of transport traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message {
        topic: Option<String>,
        payload: Bytes,
    },
    Subscribe(String),
    Unsubscribe(String),
    /// Sender is about to close the connection
    Close,
    /// Broker handshake carrying the client id
    Connect(String),
    Ack {
        kind: AckKind,
        topic: Option<String>,
    },
    PingReq,
}

impl Frame {
    pub fn message(topic: Option<String>, payload: Bytes) -> Self {
        Frame::Message { topic, payload }
    }

    fn encode_body(self, dst: &mut BytesMut) -> io::Result<()> {
        match self {
            Frame::Message {
                topic: None,
                payload,
            } => {
                dst.reserve(1 + payload.len());
                dst.put_u8(TAG_MESSAGE);
                dst.extend_from_slice(&payload);
            }
            Frame::Message {
                topic: Some(topic),
                payload,
            } => {
                let len = u16::try_from(topic.len())
                    .map_err(|_| invalid_data(format!("topic too long ({} bytes)", topic.len())))?;
                dst.reserve(3 + topic.len() + payload.len());
                dst.put_u8(TAG_TOPIC_MESSAGE);
                dst.put_u16(len);
                dst.extend_from_slice(topic.as_bytes());
                dst.extend_from_slice(&payload);
            }
            Frame::Subscribe(topic) => {
                dst.put_u8(TAG_SUBSCRIBE);
                dst.extend_from_slice(topic.as_bytes());
            }
            Frame::Unsubscribe(topic) => {
                dst.put_u8(TAG_UNSUBSCRIBE);
                dst.extend_from_slice(topic.as_bytes());
            }
            Frame::Close => dst.put_u8(TAG_CLOSE),
            Frame::Connect(client_id) => {
                dst.put_u8(TAG_CONNECT);
                dst.extend_from_slice(client_id.as_bytes());
            }
            Frame::Ack { kind, topic } => {
                dst.put_u8(TAG_ACK);
                dst.put_u8(kind.code());
                if let Some(topic) = topic {
                    dst.extend_from_slice(topic.as_bytes());
                }
            }
            Frame::PingReq => dst.put_u8(TAG_PING_REQ),
        }
        Ok(())
    }

    fn decode_body(mut body: Bytes) -> io::Result<Self> {
        if body.is_empty() {
            return Err(invalid_data("empty frame".to_string()));
        }

        match body.get_u8() {
            TAG_MESSAGE => Ok(Frame::message(None, body)),
            TAG_TOPIC_MESSAGE => {
                if body.len() < 2 {
                    return Err(invalid_data("truncated topic header".to_string()));
                }
                let len = body.get_u16() as usize;
                if body.len() < len {
                    return Err(invalid_data("truncated topic".to_string()));
                }
                let topic = utf8(body.split_to(len))?;
                Ok(Frame::message(Some(topic), body))
            }
            TAG_SUBSCRIBE => Ok(Frame::Subscribe(utf8(body)?)),
            TAG_UNSUBSCRIBE => Ok(Frame::Unsubscribe(utf8(body)?)),
            TAG_CLOSE => Ok(Frame::Close),
            TAG_CONNECT => Ok(Frame::Connect(utf8(body)?)),
            TAG_ACK => {
                if body.is_empty() {
                    return Err(invalid_data("truncated ack".to_string()));
                }
                let kind = AckKind::from_code(body.get_u8())?;
                let topic = if body.is_empty() {
                    None
                } else {
                    Some(utf8(body)?)
                };
                Ok(Frame::Ack { kind, topic })
            }
            TAG_PING_REQ => Ok(Frame::PingReq),
            tag => Err(invalid_data(format!("unknown frame tag {}", tag))),
        }
    }
}

fn utf8(bytes: Bytes) -> io::Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| invalid_data(format!("topic is not UTF-8: {}", e)))
}

fn invalid_data(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

/// Whether a subscription receives messages published on `topic`.
///
/// Subscriptions are prefixes; the empty subscription receives everything.
pub fn topic_matches(subscription: &str, topic: &str) -> bool {
    topic.starts_with(subscription)
}

/// Length-delimited [`Frame`] codec.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_SIZE)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        match self.inner.decode(src)? {
            Some(body) => Frame::decode_body(body.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        let mut body = BytesMut::new();
        frame.encode_body(&mut body)?;
        self.inner.encode(body.freeze(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_message_layout() {
        let buf = encode(Frame::message(None, Bytes::from_static(b"hello")));
        assert_eq!(&buf[..], b"\x00\x00\x00\x06\x00hello");

        let buf = encode(Frame::message(Some("t".into()), Bytes::from_static(b"x")));
        assert_eq!(&buf[..], b"\x00\x00\x00\x05\x01\x00\x01tx");
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let full = encode(Frame::Subscribe("sensors/".into()));
        let mut codec = FrameCodec::new();

        let mut partial = BytesMut::from(&full[..5]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full[5..]);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(Frame::Subscribe("sensors/".into()))
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn test_several_frames_in_one_buffer() {
        let mut buf = encode(Frame::message(Some("a/b".into()), Bytes::from_static(b"1")));
        buf.extend_from_slice(&encode(Frame::Close));

        let mut codec = FrameCodec::new();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::message(Some("a/b".into()), Bytes::from_static(b"1")))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Close));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_rejects_garbage() {
        let mut codec = FrameCodec::new();

        let mut unknown = BytesMut::from(&b"\x00\x00\x00\x01\x09"[..]);
        assert!(codec.decode(&mut unknown).is_err());

        let mut truncated = BytesMut::from(&b"\x00\x00\x00\x03\x01\x00\x05"[..]);
        assert!(codec.decode(&mut truncated).is_err());
    }

    #[tokio::test]
    async fn test_framed_read_across_split_writes() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let frame = encode(Frame::message(Some("a".into()), Bytes::from_static(b"payload")));
        let mock = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..])
            .read(&encode(Frame::Close))
            .build();

        let mut frames = FramedRead::new(mock, FrameCodec::new());
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            Frame::message(Some("a".into()), Bytes::from_static(b"payload"))
        );
        assert_eq!(frames.next().await.unwrap().unwrap(), Frame::Close);
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn test_broker_frames() {
        let buf = encode(Frame::Ack {
            kind: AckKind::SubAck,
            topic: Some("a/".into()),
        });
        assert_eq!(&buf[..], b"\x00\x00\x00\x04\x06\x01a/");

        let mut buf = encode(Frame::Connect("sensor-7".into()));
        buf.extend_from_slice(&encode(Frame::Ack {
            kind: AckKind::PingResp,
            topic: None,
        }));
        buf.extend_from_slice(&encode(Frame::PingReq));

        let mut codec = FrameCodec::new();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Connect("sensor-7".into()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Ack {
                kind: AckKind::PingResp,
                topic: None
            })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::PingReq));

        let mut bad_code = BytesMut::from(&b"\x00\x00\x00\x02\x06\x09"[..]);
        assert!(codec.decode(&mut bad_code).is_err());
    }

    #[test]
    fn test_ack_names() {
        for kind in [AckKind::ConnAck, AckKind::SubAck, AckKind::PingResp] {
            assert_eq!(AckKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(AckKind::from_name("puback"), None);
    }

    #[test]
    fn test_topic_prefix_matching() {
        assert!(topic_matches("", "anything"));
        assert!(topic_matches("sensors/", "sensors/temp"));
        assert!(topic_matches("sensors/temp", "sensors/temp"));
        assert!(!topic_matches("sensors/temp", "sensors/"));
        assert!(!topic_matches("alarms", "sensors/temp"));
    }
}
