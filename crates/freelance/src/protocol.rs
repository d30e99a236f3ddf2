//! Control words shared by the client and server agents.

use bytes::Bytes;

/// Heartbeat request, client to server.
pub const PING: &[u8] = b"PING";

/// Heartbeat acknowledgement, server to client.
pub const PONG: &[u8] = b"PONG";

/// Sequence numbers travel as ASCII decimal.
pub(crate) fn encode_sequence(sequence: u64) -> Bytes {
    Bytes::from(sequence.to_string())
}

pub(crate) fn parse_sequence(frame: &[u8]) -> Option<u64> {
    std::str::from_utf8(frame).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_frames() {
        assert_eq!(encode_sequence(42).as_ref(), b"42");
        assert_eq!(parse_sequence(b"42"), Some(42));
        assert_eq!(parse_sequence(PONG), None);
        assert_eq!(parse_sequence(b"-1"), None);
        assert_eq!(parse_sequence(&[0xff]), None);
    }
}
