//! Plaintext handshake messages exchanged before the secure record layer
//! (see [`crate::crypto`]) exists. Unlike the control messages in
//! [`super::control`], these are fixed-size binary structs rather than JSON:
//! there is no cipher yet to protect a self-describing encoding, so the
//! wire shape is as small and unambiguous as possible.

use crate::error::Error;

pub const NONCE_LEN: usize = 16;

pub const SIGNATURE_LEN: usize = 64;

/// `identity_pub || ephemeral_pub || nonce || signature`, sent by the server
/// first. `signature` is the identity key's ed25519 signature over
/// `ephemeral_pub || nonce` (see [`Self::signed_message`]) — it binds this
/// particular ephemeral key to the durable identity so a relay that merely
/// forwards the genuine `identity_pub` can't substitute its own ephemeral
/// key and still pass the client's signature check.
#[derive(Debug, Clone)]
pub struct ServerHello {
    pub identity_pub: [u8; 32],
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

impl ServerHello {
    pub const LEN: usize = 32 + 32 + NONCE_LEN + SIGNATURE_LEN;

    /// The bytes the server signs and the client verifies: everything in
    /// the hello except the identity key and the signature itself.
    pub fn signed_message(ephemeral_pub: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + NONCE_LEN);
        buf.extend_from_slice(ephemeral_pub);
        buf.extend_from_slice(nonce);
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.identity_pub);
        buf.extend_from_slice(&self.ephemeral_pub);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::LEN {
            return Err(Error::HandshakeRejected(format!(
                "server hello: expected {} bytes, got {}",
                Self::LEN,
                buf.len()
            )));
        }
        let mut identity_pub = [0u8; 32];
        let mut ephemeral_pub = [0u8; 32];
        let mut nonce = [0u8; NONCE_LEN];
        let mut signature = [0u8; SIGNATURE_LEN];
        identity_pub.copy_from_slice(&buf[0..32]);
        ephemeral_pub.copy_from_slice(&buf[32..64]);
        nonce.copy_from_slice(&buf[64..64 + NONCE_LEN]);
        signature.copy_from_slice(&buf[64 + NONCE_LEN..Self::LEN]);
        Ok(Self {
            identity_pub,
            ephemeral_pub,
            nonce,
            signature,
        })
    }
}

/// `ephemeral_pub || nonce`, sent by the client in reply.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
}

impl ClientHello {
    pub const LEN: usize = 32 + NONCE_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.ephemeral_pub);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::LEN {
            return Err(Error::HandshakeRejected(format!(
                "client hello: expected {} bytes, got {}",
                Self::LEN,
                buf.len()
            )));
        }
        let mut ephemeral_pub = [0u8; 32];
        let mut nonce = [0u8; NONCE_LEN];
        ephemeral_pub.copy_from_slice(&buf[0..32]);
        nonce.copy_from_slice(&buf[32..32 + NONCE_LEN]);
        Ok(Self {
            ephemeral_pub,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_hello_round_trips() {
        let hello = ServerHello {
            identity_pub: [1u8; 32],
            ephemeral_pub: [2u8; 32],
            nonce: [3u8; NONCE_LEN],
            signature: [4u8; SIGNATURE_LEN],
        };
        let encoded = hello.encode();
        let decoded = ServerHello::decode(&encoded).unwrap();
        assert_eq!(decoded.identity_pub, hello.identity_pub);
        assert_eq!(decoded.ephemeral_pub, hello.ephemeral_pub);
        assert_eq!(decoded.nonce, hello.nonce);
        assert_eq!(decoded.signature, hello.signature);
    }

    #[test]
    fn client_hello_rejects_wrong_length() {
        assert!(ClientHello::decode(&[0u8; 10]).is_err());
    }
}
