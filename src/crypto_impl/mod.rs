//! Default implementations of the capability traits in [`crate::crypto`]:
//! a DH-KEM over X25519, SHAKE-256 as the XOF, ChaCha20-Poly1305 as the
//! AEAD, and Ed25519 signatures as the identity proof.

use chacha20poly1305::aead::Payload;
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::crypto::*;

/// DH-KEM over X25519: the ciphertext is a fresh ephemeral public key and
/// the shared secret is the raw Diffie-Hellman output.
pub struct X25519Kem;

impl Kem for X25519Kem {
    type PublicKey = PublicKey;
    type SecretKey = StaticSecret;

    const PUBLIC_KEY_SIZE: usize = 32;
    const CIPHERTEXT_SIZE: usize = 32;

    fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> (Self::SecretKey, Self::PublicKey) {
        let secret_key = StaticSecret::random_from_rng(&mut *rng);
        let public_key = PublicKey::from(&secret_key);
        (secret_key, public_key)
    }

    fn public_key_bytes(public_key: &Self::PublicKey) -> Vec<u8> {
        public_key.as_bytes().to_vec()
    }

    fn public_key_from_bytes(raw: &[u8]) -> Option<Self::PublicKey> {
        let raw: [u8; 32] = raw.try_into().ok()?;
        Some(PublicKey::from(raw))
    }

    fn encapsulate<R: RngCore + CryptoRng>(
        rng: &mut R,
        public_key: &Self::PublicKey,
        shared_secret: &mut [u8; KEM_SHARED_SECRET_SIZE],
    ) -> Option<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
        let ciphertext = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(public_key);
        // A low-order remote key yields the all-zero secret no matter what
        // we contribute; refuse to encapsulate toward one.
        if !shared.was_contributory() {
            return None;
        }
        shared_secret.copy_from_slice(shared.as_bytes());
        Some(ciphertext.as_bytes().to_vec())
    }

    fn decapsulate(
        secret_key: &Self::SecretKey,
        ciphertext: &[u8],
        shared_secret: &mut [u8; KEM_SHARED_SECRET_SIZE],
    ) -> bool {
        let Ok(raw): Result<[u8; 32], _> = ciphertext.try_into() else {
            return false;
        };
        let shared = secret_key.diffie_hellman(&PublicKey::from(raw));
        // Reject low-order ciphertexts rather than deriving keys from an
        // all-zero secret.
        if !shared.was_contributory() {
            return false;
        }
        shared_secret.copy_from_slice(shared.as_bytes());
        true
    }
}

/// SHAKE-256 as the extendable-output function.
#[derive(Clone)]
pub struct Shake256Xof(Shake256);

impl Xof for Shake256Xof {
    fn new() -> Self {
        Self(Shake256::default())
    }

    fn absorb(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn expand(&self, out: &mut [u8]) {
        self.0.clone().finalize_xof().read(out);
    }

    fn reset(&mut self) {
        self.0 = Shake256::default();
    }
}

/// ChaCha20-Poly1305 as the AEAD.
pub struct ChaCha20Poly1305Aead;

impl Aead for ChaCha20Poly1305Aead {
    const OVERHEAD: usize = 16;

    fn seal(
        key: &[u8; AEAD_KEY_SIZE],
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let sealed = chacha20poly1305::aead::Aead::encrypt(
            &cipher,
            Nonce::from_slice(nonce),
            Payload { msg: plaintext, aad },
        )
        .expect("ChaCha20-Poly1305 sealing of an in-memory buffer cannot fail");
        out.extend_from_slice(&sealed);
    }

    fn open(
        key: &[u8; AEAD_KEY_SIZE],
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        out: &mut Vec<u8>,
    ) -> bool {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        match chacha20poly1305::aead::Aead::decrypt(
            &cipher,
            Nonce::from_slice(nonce),
            Payload { msg: ciphertext, aad },
        ) {
            Ok(plaintext) => {
                out.extend_from_slice(&plaintext);
                true
            }
            Err(_) => false,
        }
    }
}

/// Ed25519 identity proofs: `prove` signs the transcript digest with the
/// local long-term key, `verify` checks the peer's signature with its
/// pinned long-term key.
pub struct Ed25519Authenticator {
    signing_key: SigningKey,
    remote_key: VerifyingKey,
}

impl Ed25519Authenticator {
    /// Authenticate with `signing_key` and require the remote peer to prove
    /// possession of the key behind `remote_key`.
    pub fn new(signing_key: SigningKey, remote_key: VerifyingKey) -> Self {
        Self { signing_key, remote_key }
    }

    /// The public half of the local identity key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl Authenticator for Ed25519Authenticator {
    fn prove(&self, target: &[u8; SIG_TARGET_SIZE]) -> Vec<u8> {
        self.signing_key.sign(target).to_bytes().to_vec()
    }

    fn verify(&self, target: &[u8; SIG_TARGET_SIZE], proof: &[u8]) -> bool {
        let Ok(signature) = ed25519_dalek::Signature::from_slice(proof) else {
            return false;
        };
        self.remote_key.verify_strict(target, &signature).is_ok()
    }
}

/// The default suite.
pub struct DefaultSuite;

impl CipherSuite for DefaultSuite {
    type Rng = rand_core::OsRng;
    type Kem = X25519Kem;
    type Xof = Shake256Xof;
    type Aead = ChaCha20Poly1305Aead;
    type Authenticator = Ed25519Authenticator;
}

// ChaCha20Poly1305's tag size is fixed by the aead crate; keep our constant
// honest against it.
const _: () = {
    use chacha20poly1305::aead::generic_array::typenum::Unsigned;
    assert!(<ChaCha20Poly1305 as AeadCore>::TagSize::USIZE == ChaCha20Poly1305Aead::OVERHEAD);
};

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn kem_round_trip() {
        let (secret_key, public_key) = X25519Kem::generate(&mut OsRng);
        let mut sent = [0u8; KEM_SHARED_SECRET_SIZE];
        let ciphertext = X25519Kem::encapsulate(&mut OsRng, &public_key, &mut sent).unwrap();
        assert_eq!(ciphertext.len(), X25519Kem::CIPHERTEXT_SIZE);

        let mut received = [0u8; KEM_SHARED_SECRET_SIZE];
        assert!(X25519Kem::decapsulate(&secret_key, &ciphertext, &mut received));
        assert_eq!(sent, received);
    }

    #[test]
    fn kem_rejects_degenerate_ciphertext() {
        let (secret_key, _) = X25519Kem::generate(&mut OsRng);
        let mut out = [0u8; KEM_SHARED_SECRET_SIZE];
        assert!(!X25519Kem::decapsulate(&secret_key, &[0u8; 32], &mut out));
        assert!(!X25519Kem::decapsulate(&secret_key, &[0u8; 7], &mut out));
    }

    #[test]
    fn kem_refuses_to_encapsulate_toward_low_order_key() {
        // The identity point; DH with it is all-zero for every scalar.
        let low_order = PublicKey::from([0u8; 32]);
        let mut out = [0u8; KEM_SHARED_SECRET_SIZE];
        assert_eq!(X25519Kem::encapsulate(&mut OsRng, &low_order, &mut out), None);
    }

    #[test]
    fn aead_round_trip_and_tamper() {
        let key = [3u8; AEAD_KEY_SIZE];
        let nonce = [5u8; AEAD_NONCE_SIZE];
        let mut sealed = Vec::new();
        ChaCha20Poly1305Aead::seal(&key, &nonce, b"aad", b"payload", &mut sealed);
        assert_eq!(sealed.len(), b"payload".len() + ChaCha20Poly1305Aead::OVERHEAD);

        let mut opened = Vec::new();
        assert!(ChaCha20Poly1305Aead::open(&key, &nonce, b"aad", &sealed, &mut opened));
        assert_eq!(opened, b"payload");

        sealed[0] ^= 1;
        let mut failed = Vec::new();
        assert!(!ChaCha20Poly1305Aead::open(&key, &nonce, b"aad", &sealed, &mut failed));
        assert!(failed.is_empty());
    }

    #[test]
    fn authenticator_binds_target() {
        let alice = SigningKey::generate(&mut OsRng);
        let bob = SigningKey::generate(&mut OsRng);
        let alice_auth = Ed25519Authenticator::new(alice.clone(), bob.verifying_key());
        let bob_auth = Ed25519Authenticator::new(bob, alice.verifying_key());

        let target = [9u8; SIG_TARGET_SIZE];
        let proof = alice_auth.prove(&target);
        assert!(bob_auth.verify(&target, &proof));
        assert!(!bob_auth.verify(&[8u8; SIG_TARGET_SIZE], &proof));
        assert!(!bob_auth.verify(&target, &proof[..proof.len() - 1]));
    }
}
