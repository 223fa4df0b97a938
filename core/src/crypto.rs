//! Secure channel: the durable ed25519 identity, the per-connection X25519
//! ECDH handshake, HKDF-SHA256 key derivation, and the ChaCha20Poly1305
//! record layer that seals every frame once the handshake completes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::Error;
use crate::protocol::handshake::NONCE_LEN;

const RECORD_NONCE_LEN: usize = 12;

/// Base64-encoded SHA-256 digest of a server's durable ed25519 public key —
/// the value an operator pins with `--fingerprint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_identity_pub(identity_pub: &[u8; 32]) -> Self {
        let digest = Sha256::digest(identity_pub);
        Self(BASE64.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The server's durable signing identity. Persisted as a 32-byte seed file
/// so restarts keep the same fingerprint; generated on first run if the
/// keyfile is absent, mirroring the teacher's self-signed-cert bootstrap.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_identity_pub(&self.public_bytes())
    }

    /// Sign `message` with the durable identity key. Used to bind a
    /// per-connection ephemeral key to this identity in `ServerHello`, so a
    /// relay that merely forwards the genuine `identity_pub` can't splice in
    /// its own ephemeral key and still pass verification.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Load the seed at `path`, or generate and persist a fresh one if the
    /// file does not exist yet. The file holds exactly 32 raw bytes.
    pub async fn load_or_generate(path: &Path) -> Result<Self, Error> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                if bytes.len() != 32 {
                    return Err(Error::ConfigFileError(format!(
                        "keyfile {} must contain exactly 32 bytes, found {}",
                        path.display(),
                        bytes.len()
                    )));
                }
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                Ok(Self::from_seed(seed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate();
                tokio::fs::write(path, identity.signing_key.to_bytes())
                    .await
                    .map_err(|e| {
                        Error::ConfigFileError(format!("writing keyfile {}: {e}", path.display()))
                    })?;
                Ok(identity)
            }
            Err(e) => Err(Error::ConfigFileError(format!(
                "reading keyfile {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Verify a signature made by `Identity::sign` against the claimed
/// `identity_pub`. Rejects a `ServerHello` whose `ephemeral_pub`/`nonce`
/// weren't actually signed by the holder of that identity's private key —
/// the step that makes `--fingerprint` pinning an actual MITM defense rather
/// than trust-on-forwarded-public-key.
pub fn verify_signature(
    identity_pub: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), Error> {
    let verifying_key = VerifyingKey::from_bytes(identity_pub)
        .map_err(|e| Error::HandshakeRejected(format!("invalid identity key: {e}")))?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::HandshakeRejected("server hello signature verification failed".to_string()))
}

/// A fresh, single-use ECDH keypair minted for one handshake.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer = PublicKey::from(*peer_public);
        *self.secret.diffie_hellman(&peer).as_bytes()
    }
}

pub fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// The two directional keys derived from one handshake's shared secret.
pub struct SessionKeys {
    pub client_to_server: [u8; 32],
    pub server_to_client: [u8; 32],
}

/// `HKDF-SHA256(shared, salt = server_nonce || client_nonce)`, expanded into
/// two independent 32-byte keys, one per direction.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    server_nonce: &[u8; NONCE_LEN],
    client_nonce: &[u8; NONCE_LEN],
) -> Result<SessionKeys, Error> {
    let mut salt = Vec::with_capacity(NONCE_LEN * 2);
    salt.extend_from_slice(server_nonce);
    salt.extend_from_slice(client_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut client_to_server = [0u8; 32];
    let mut server_to_client = [0u8; 32];
    hk.expand(b"tunnel c2s", &mut client_to_server)
        .map_err(|_| Error::HandshakeRejected("key derivation failed".to_string()))?;
    hk.expand(b"tunnel s2c", &mut server_to_client)
        .map_err(|_| Error::HandshakeRejected("key derivation failed".to_string()))?;

    Ok(SessionKeys {
        client_to_server,
        server_to_client,
    })
}

/// One direction of the post-handshake AEAD record layer. The nonce counter
/// increases monotonically per record; the peer's matching `RecordCipher`
/// must see the same sequence in the same order, so out-of-order or replayed
/// ciphertext fails to decrypt by construction.
pub struct RecordCipher {
    cipher: ChaCha20Poly1305,
    counter: AtomicU64,
}

impl RecordCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            counter: AtomicU64::new(0),
        }
    }

    fn next_nonce(&self) -> [u8; RECORD_NONCE_LEN] {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut nonce = [0u8; RECORD_NONCE_LEN];
        nonce[4..].copy_from_slice(&n.to_be_bytes());
        nonce
    }

    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce_bytes = self.next_nonce();
        self.cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .expect("chacha20poly1305 encryption is infallible for valid key/nonce sizes")
    }

    /// Decrypt the next record in sequence, advancing this cipher's own
    /// counter. A `RecordCipher` is only ever used in one direction by one
    /// role (the sender calls `seal`, the receiver calls `open_next`), so
    /// reusing the same counter field for whichever operation applies is
    /// safe and keeps the two roles symmetric.
    pub fn open_next(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.open_at(n, ciphertext)
    }

    /// Decrypt using an explicit sequence number, for callers (tests, or a
    /// dispatcher resynchronizing after a detected gap) that track the
    /// expected counter themselves.
    pub fn open_at(&self, sequence: u64, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce = [0u8; RECORD_NONCE_LEN];
        nonce[4..].copy_from_slice(&sequence.to_be_bytes());
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::HandshakeRejected("record decryption failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_key() {
        let identity = Identity::from_seed([7u8; 32]);
        let a = identity.fingerprint();
        let b = Fingerprint::of_identity_pub(&identity.public_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn signature_verifies_against_the_signing_identity() {
        let identity = Identity::generate();
        let message = b"ephemeral-pub || nonce";
        let signature = identity.sign(message);
        assert!(verify_signature(&identity.public_bytes(), message, &signature).is_ok());
    }

    #[test]
    fn signature_rejects_mismatched_identity_or_message() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let message = b"ephemeral-pub || nonce";
        let signature = identity.sign(message);
        assert!(verify_signature(&other.public_bytes(), message, &signature).is_err());
        assert!(verify_signature(&identity.public_bytes(), b"tampered", &signature).is_err());
    }

    #[test]
    fn ecdh_agrees_on_shared_secret() {
        let server = EphemeralKeyPair::generate();
        let client = EphemeralKeyPair::generate();
        let server_pub = server.public_bytes();
        let client_pub = client.public_bytes();

        let server_shared = server.diffie_hellman(&client_pub);
        let client_shared = client.diffie_hellman(&server_pub);
        assert_eq!(server_shared, client_shared);
    }

    #[test]
    fn derive_session_keys_are_distinct_per_direction() {
        let shared = [9u8; 32];
        let keys = derive_session_keys(&shared, &[1u8; NONCE_LEN], &[2u8; NONCE_LEN]).unwrap();
        assert_ne!(keys.client_to_server, keys.server_to_client);
    }

    #[test]
    fn record_cipher_round_trips_in_sequence() {
        let cipher = RecordCipher::new([5u8; 32]);
        let ct0 = cipher.seal(b"hello");
        let ct1 = cipher.seal(b"world");
        assert_eq!(cipher.open_at(0, &ct0).unwrap(), b"hello");
        assert_eq!(cipher.open_at(1, &ct1).unwrap(), b"world");
    }

    #[test]
    fn record_cipher_open_next_tracks_its_own_counter() {
        let sender = RecordCipher::new([5u8; 32]);
        let receiver = RecordCipher::new([5u8; 32]);
        let ct0 = sender.seal(b"one");
        let ct1 = sender.seal(b"two");
        assert_eq!(receiver.open_next(&ct0).unwrap(), b"one");
        assert_eq!(receiver.open_next(&ct1).unwrap(), b"two");
    }

    #[test]
    fn record_cipher_rejects_wrong_sequence() {
        let cipher = RecordCipher::new([5u8; 32]);
        let ct0 = cipher.seal(b"hello");
        assert!(cipher.open_at(1, &ct0).is_err());
    }

    #[tokio::test]
    async fn identity_load_or_generate_persists_seed() {
        let dir = std::env::temp_dir().join(format!(
            "tunnel-core-keyfile-test-{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("identity.key");

        let first = Identity::load_or_generate(&path).await.unwrap();
        let second = Identity::load_or_generate(&path).await.unwrap();
        assert_eq!(first.public_bytes(), second.public_bytes());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
