//! Wire protocol: handshake messages, the multiplexed frame format, and the
//! JSON control payloads carried inside it.

pub mod control;
pub mod frame;
pub mod handshake;

pub use control::{
    AuthRequest, AuthResponse, ConfigRequest, ConfigResponse, RemoteAck, StreamError,
    StreamOpenRequest,
};
pub use frame::{Frame, MsgType, CONTROL_STREAM_ID, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use handshake::{ClientHello, ServerHello, NONCE_LEN, SIGNATURE_LEN};
