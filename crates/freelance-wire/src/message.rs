//! Multipart messages and their framing.
//!
//! Each message on the wire is prefixed with a 4-byte big-endian length
//! header. The body is a sequence of frames, each prefixed with its own
//! 4-byte big-endian length.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single message body size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

const FRAME_HEADER_LEN: usize = 4;

/// An ordered multipart message.
///
/// Frames are pushed and popped at either end, which is how routing
/// envelopes (identities, control words) are attached and stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: VecDeque<Bytes>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a message from anything convertible into frames.
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push_front(&mut self, frame: impl Into<Bytes>) {
        self.frames.push_front(frame.into());
    }

    pub fn push_back(&mut self, frame: impl Into<Bytes>) {
        self.frames.push_back(frame.into());
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    /// Pop the first frame as a (lossily decoded) UTF-8 string.
    pub fn pop_front_str(&mut self) -> Option<String> {
        self.pop_front()
            .map(|frame| String::from_utf8_lossy(&frame).into_owned())
    }

    pub fn front(&self) -> Option<&Bytes> {
        self.frames.front()
    }

    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }

    /// Total number of payload bytes across all frames.
    pub fn content_size(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames.into()
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FromIterator<Bytes> for Message {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = std::collections::vec_deque::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// One line per frame: `[len] text`, or hex when the frame is not UTF-8.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match std::str::from_utf8(frame) {
                Ok(text) => write!(f, "[{:03}] {}", frame.len(), text)?,
                Err(_) => write!(f, "[{:03}] {}", frame.len(), hex::encode(frame))?,
            }
        }
        Ok(())
    }
}

/// Encode a message to bytes (4-byte big-endian length + frames).
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    let body_len: usize = msg.iter().map(|f| FRAME_HEADER_LEN + f.len()).sum();
    if body_len > MAX_MESSAGE_SIZE as usize {
        return Err(WireError::MessageTooLarge {
            size: body_len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut bytes = BytesMut::with_capacity(FRAME_HEADER_LEN + body_len);
    bytes.put_u32(body_len as u32);
    for frame in msg.iter() {
        bytes.put_u32(frame.len() as u32);
        bytes.put_slice(frame);
    }
    Ok(bytes.to_vec())
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Split a message body into its frames.
pub fn decode_message(mut body: Bytes) -> Result<Message, WireError> {
    let mut msg = Message::new();
    while body.has_remaining() {
        if body.remaining() < FRAME_HEADER_LEN {
            return Err(WireError::MalformedFrame(format!(
                "{} trailing bytes cannot hold a frame header",
                body.remaining()
            )));
        }
        let len = body.get_u32() as usize;
        if body.remaining() < len {
            return Err(WireError::MalformedFrame(format!(
                "frame declares {len} bytes but only {} remain",
                body.remaining()
            )));
        }
        msg.push_back(body.split_to(len));
    }
    Ok(msg)
}

/// Write a framed message to a stream.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message from a stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    decode_message(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let msg = Message::from_frames(["PING", ""]);
        let bytes = encode_message(&msg).unwrap();
        // body = (4 + 4) + (4 + 0)
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len, 12);
        assert_eq!(len as usize, bytes.len() - 4);
        assert_eq!(&bytes[4..8], &4u32.to_be_bytes());
        assert_eq!(&bytes[8..12], b"PING");
        assert_eq!(&bytes[12..16], &0u32.to_be_bytes());
    }

    #[test]
    fn test_decode_keeps_empty_frames() {
        let msg = Message::from_frames(["identity", "", "payload"]);
        let bytes = encode_message(&msg).unwrap();
        let decoded = decode_message(Bytes::copy_from_slice(&bytes[4..])).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded.get(1).unwrap().is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_truncated_frame() {
        let mut body = BytesMut::new();
        body.put_u32(10);
        body.put_slice(b"short");
        let err = decode_message(body.freeze()).unwrap_err();
        assert!(matches!(err, WireError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_trailing_garbage() {
        let err = decode_message(Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(matches!(err, WireError::MalformedFrame(_)));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let big = Bytes::from(vec![0u8; MAX_MESSAGE_SIZE as usize]);
        let msg = Message::from(vec![big]);
        let err = encode_message(&msg).unwrap_err();
        assert!(matches!(err, WireError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_push_pop_envelope() {
        let mut msg = Message::from_frames(["body"]);
        msg.push_front("7");
        msg.push_front("tcp://localhost:5555");
        assert_eq!(msg.pop_front_str().as_deref(), Some("tcp://localhost:5555"));
        assert_eq!(msg.pop_front_str().as_deref(), Some("7"));
        assert_eq!(msg.content_size(), 4);
        assert_eq!(msg.into_frames(), vec![Bytes::from_static(b"body")]);
    }

    #[test]
    fn test_display_shows_binary_as_hex() {
        let msg = Message::from(vec![
            Bytes::from_static(b"OK"),
            Bytes::from_static(&[0xff, 0x00]),
        ]);
        assert_eq!(msg.to_string(), "[002] OK\n[002] ff00");
    }

    #[tokio::test]
    async fn test_stream_framing() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = Message::from_frames(["REQUEST", "1", "hello"]);
        write_message(&mut client, &msg).await.unwrap();
        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, msg);

        drop(client);
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }
}
