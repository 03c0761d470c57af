use rand_core::{CryptoRng, RngCore};

/// The size in bytes of a KEM shared secret.
pub const KEM_SHARED_SECRET_SIZE: usize = 32;
/// The size in bytes of an AEAD key.
pub const AEAD_KEY_SIZE: usize = 32;
/// The size in bytes of an AEAD nonce.
pub const AEAD_NONCE_SIZE: usize = 12;
/// The size in bytes of the transcript digest that authenticator proofs are
/// computed over.
pub const SIG_TARGET_SIZE: usize = 64;

/// A key encapsulation mechanism.
///
/// The handshake performs two independent encapsulations (one toward each
/// peer's ephemeral key), so forward secrecy does not rest on any single
/// invocation of this primitive.
pub trait Kem {
    /// A parsed, validated public key.
    type PublicKey: Clone + Send + Sync;
    /// The matching decapsulation key.
    ///
    /// Implementations must securely delete the key material when dropped.
    type SecretKey: Send;

    /// The exact encoded size of a public key on the wire.
    const PUBLIC_KEY_SIZE: usize;
    /// The exact encoded size of a ciphertext on the wire.
    const CIPHERTEXT_SIZE: usize;

    /// Randomly generate a fresh keypair.
    fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> (Self::SecretKey, Self::PublicKey);

    /// Encode a public key to exactly `PUBLIC_KEY_SIZE` bytes.
    fn public_key_bytes(public_key: &Self::PublicKey) -> Vec<u8>;

    /// Parse a public key from its wire encoding.
    ///
    /// Must return `None` for any input that is not structurally a public
    /// key of this scheme. Implementations whose encoding admits degenerate
    /// keys may accept them here and reject them in `encapsulate` instead.
    fn public_key_from_bytes(raw: &[u8]) -> Option<Self::PublicKey>;

    /// Produce a shared secret and the ciphertext that transports it to the
    /// holder of `public_key`. Returns the ciphertext, exactly
    /// `CIPHERTEXT_SIZE` bytes, or `None` if `public_key` is degenerate and
    /// would not contribute to the shared secret; `shared_secret` must not
    /// be used in that case.
    fn encapsulate<R: RngCore + CryptoRng>(
        rng: &mut R,
        public_key: &Self::PublicKey,
        shared_secret: &mut [u8; KEM_SHARED_SECRET_SIZE],
    ) -> Option<Vec<u8>>;

    /// Recover the shared secret from a ciphertext. Returns false if the
    /// ciphertext is malformed or degenerate, in which case `shared_secret`
    /// must not be used.
    #[must_use]
    fn decapsulate(
        secret_key: &Self::SecretKey,
        ciphertext: &[u8],
        shared_secret: &mut [u8; KEM_SHARED_SECRET_SIZE],
    ) -> bool;
}

/// An extendable-output hash.
///
/// This is the only symmetric digest primitive the protocol consumes: the
/// transcript accumulator and every key derivation are built from it, so no
/// separate MAC or fixed-width hash is needed.
pub trait Xof: Clone + Send {
    /// Create an empty state.
    fn new() -> Self;
    /// Absorb `data`, as if appended to all previous input.
    fn absorb(&mut self, data: &[u8]);
    /// Fill `out` with output derived from everything absorbed so far,
    /// without disturbing the state (further absorbs remain valid).
    fn expand(&self, out: &mut [u8]);
    /// Return the state to empty.
    fn reset(&mut self);
}

/// An authenticated cipher with associated data.
pub trait Aead {
    /// Bytes of overhead `seal` adds to a plaintext.
    const OVERHEAD: usize;

    /// Encrypt and authenticate `plaintext`, appending exactly
    /// `plaintext.len() + OVERHEAD` bytes to `out`.
    fn seal(
        key: &[u8; AEAD_KEY_SIZE],
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
        out: &mut Vec<u8>,
    );

    /// Decrypt and verify `ciphertext`, appending the plaintext to `out` and
    /// returning true only if authentication succeeded. On failure `out` must
    /// be left untouched.
    #[must_use]
    fn open(
        key: &[u8; AEAD_KEY_SIZE],
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        out: &mut Vec<u8>,
    ) -> bool;
}

/// Binds a long-lived identity key to a handshake transcript.
///
/// `prove` is invoked with a digest of the transcript up to the proof's
/// position; `verify` checks the remote peer's proof over the same digest.
/// Both sides of a channel must agree on the proof scheme in use.
pub trait Authenticator: Send + Sync {
    /// Produce a proof of identity over `target`.
    fn prove(&self, target: &[u8; SIG_TARGET_SIZE]) -> Vec<u8>;
    /// Check a remote peer's proof over `target`.
    #[must_use]
    fn verify(&self, target: &[u8; SIG_TARGET_SIZE], proof: &[u8]) -> bool;
}

/// The bundle of primitives a channel is built from.
///
/// Both sides of a channel **must** use the same suite; there is no
/// negotiation step. A default implementation is provided in
/// [`crate::crypto_impl`].
pub trait CipherSuite: Sized + Send + Sync + 'static {
    /// The random number generator used for ephemeral keys and
    /// encapsulation. Must be cryptographically secure.
    type Rng: RngCore + CryptoRng + Send;
    /// The key encapsulation mechanism used twice per handshake.
    type Kem: Kem;
    /// The extendable-output hash used for transcript mixing and all key
    /// derivation.
    type Xof: Xof;
    /// The cipher protecting handshake envelopes and transport payloads.
    type Aead: Aead;
    /// The identity proof scheme.
    type Authenticator: Authenticator;
}
