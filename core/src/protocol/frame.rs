//! Wire framing for the multiplexed tunnel: a fixed 10-byte header followed
//! by a payload, carried over the encrypted record layer established by the
//! handshake in [`crate::crypto`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

pub const HEADER_LEN: usize = 10;

/// Largest payload this implementation will frame in one `Frame`. Larger
/// writes are chunked by the caller; this bounds the size of the
/// length-prefixed allocation on decode.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    StreamOpen = 1,
    StreamData = 2,
    StreamClose = 3,
    StreamError = 4,
    Ping = 5,
    Pong = 6,
    AuthRequest = 7,
    AuthResponse = 8,
    ConfigRequest = 9,
    ConfigResponse = 10,
}

impl MsgType {
    fn from_u8(v: u8) -> Result<Self, Error> {
        Ok(match v {
            1 => Self::StreamOpen,
            2 => Self::StreamData,
            3 => Self::StreamClose,
            4 => Self::StreamError,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::AuthRequest,
            8 => Self::AuthResponse,
            9 => Self::ConfigRequest,
            10 => Self::ConfigResponse,
            other => return Err(Error::ConfigDecode(format!("unknown msg_type {other}"))),
        })
    }
}

/// Stream ids are minted by whichever side initiates a `StreamOpen`; `0` is
/// reserved for control-plane frames that aren't tied to a data stream
/// (auth/config exchange, ping/pong).
pub const CONTROL_STREAM_ID: u32 = 0;

#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_id: u32,
    pub msg_type: MsgType,
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn control(msg_type: MsgType, payload: Bytes) -> Self {
        Self {
            stream_id: CONTROL_STREAM_ID,
            msg_type,
            flags: 0,
            payload,
        }
    }

    pub fn data(stream_id: u32, msg_type: MsgType, payload: Bytes) -> Self {
        Self {
            stream_id,
            msg_type,
            flags: 0,
            payload,
        }
    }

    /// Encode the 10-byte header + payload into a single contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32(self.stream_id);
        buf.put_u8(self.msg_type as u8);
        buf.put_u8(self.flags);
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a single frame from `buf`, advancing it past the consumed
    /// bytes. Returns `Ok(None)` if `buf` does not yet contain a complete
    /// frame (caller should read more and retry).
    pub fn try_decode(buf: &mut BytesMut) -> Result<Option<Self>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &buf[..HEADER_LEN];
        let stream_id = header.get_u32();
        let msg_type_raw = header.get_u8();
        let flags = header.get_u8();
        let payload_len = header.get_u32();

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::ConfigDecode(format!(
                "frame payload_len {payload_len} exceeds max {MAX_PAYLOAD_LEN}"
            )));
        }
        let total_len = HEADER_LEN + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let msg_type = MsgType::from_u8(msg_type_raw)?;
        buf.advance(HEADER_LEN);
        let payload = buf.split_to(payload_len as usize).freeze();

        Ok(Some(Self {
            stream_id,
            msg_type,
            flags,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let frame = Frame::data(42, MsgType::StreamData, Bytes::from_static(b"hello"));
        let encoded = frame.encode();
        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = Frame::try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.msg_type, MsgType::StreamData);
        assert_eq!(&decoded.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn try_decode_waits_for_full_frame() {
        let frame = Frame::data(1, MsgType::Ping, Bytes::from_static(b"ab"));
        let encoded = frame.encode();
        let mut partial = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Frame::try_decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn try_decode_handles_back_to_back_frames() {
        let a = Frame::control(MsgType::Ping, Bytes::new());
        let b = Frame::control(MsgType::Pong, Bytes::new());
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a.encode());
        buf.extend_from_slice(&b.encode());

        let first = Frame::try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.msg_type, MsgType::Ping);
        let second = Frame::try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.msg_type, MsgType::Pong);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_payload_len() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(MsgType::StreamData as u8);
        buf.put_u8(0);
        buf.put_u32(MAX_PAYLOAD_LEN + 1);
        assert!(Frame::try_decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_unknown_msg_type() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(99);
        buf.put_u8(0);
        buf.put_u32(0);
        assert!(Frame::try_decode(&mut buf).is_err());
    }
}
