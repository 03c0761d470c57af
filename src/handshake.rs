//! The 4-message handshake.
//!
//! Counters 0 through 3 carry InitHello, RespHello, InitDone and RespDone.
//! Both peers contribute an ephemeral KEM key and both perform one
//! encapsulation toward the other's, so the resulting transport keys are
//! forward secret even if one of the two encapsulations is later broken.
//! Each side signs the running transcript at its first opportunity, and from
//! RespHello onward every message is wrapped in an AEAD envelope keyed from
//! the transcript, so a peer that cannot follow the key schedule cannot even
//! produce a well-formed message.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::{
    Aead, Authenticator, CipherSuite, Kem, AEAD_KEY_SIZE, KEM_SHARED_SECRET_SIZE, SIG_TARGET_SIZE,
};
use crate::proto::{
    encode_header, parse_header, to_nonce, CHANNEL_BINDING_SIZE, COUNTER_INIT_DONE,
    COUNTER_INIT_HELLO, COUNTER_RESP_DONE, COUNTER_RESP_HELLO, HANDSHAKE_MESSAGE_COUNT,
    HEADER_SIZE, LABEL_AEAD_KEY, LABEL_CHANNEL_BINDING, LABEL_SIG_TARGET, LABEL_SPLIT,
    TIMESTAMP_SIZE,
};
use crate::result::HandshakeError;
use crate::transcript::Transcript;

/// Which side of the handshake this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The peer that opens the exchange with InitHello.
    Initiator,
    /// The peer that answers with RespHello.
    Responder,
}

impl Role {
    /// Whether this role transmits the handshake message at `index`.
    /// The initiator sends the even-numbered messages.
    pub(crate) fn sends_at(self, index: u8) -> bool {
        (index % 2 == 0) == matches!(self, Role::Initiator)
    }

    /// The direction bit this role stamps on its outbound headers.
    pub(crate) fn from_responder(self) -> bool {
        matches!(self, Role::Responder)
    }
}

/// The per-direction AEAD keys a completed handshake splits into.
pub(crate) struct TransportKeys {
    pub outbound: Zeroizing<[u8; AEAD_KEY_SIZE]>,
    pub inbound: Zeroizing<[u8; AEAD_KEY_SIZE]>,
}

/// One side of an in-progress handshake.
///
/// `index` counts handshake messages processed so far, sent and delivered
/// alike; whose turn it is follows from the index parity and our role. The
/// state machine is strictly lock-step, but tolerates a lossy transport: a
/// retransmitted `send` re-emits the identical previous message, and a
/// delivered duplicate of the last inbound message triggers a resend of our
/// last outbound one instead of an error.
pub struct HandshakeState<C: CipherSuite> {
    role: Role,
    index: u8,
    transcript: Transcript<C::Xof>,
    auth: Arc<C::Authenticator>,
    local_eph: Option<<C::Kem as Kem>::SecretKey>,
    remote_eph: Option<<C::Kem as Kem>::PublicKey>,
    last_sent: Option<Vec<u8>>,
    last_received: Option<Vec<u8>>,
    keys: Option<TransportKeys>,
    binding: Option<[u8; CHANNEL_BINDING_SIZE]>,
}

impl<C: CipherSuite> HandshakeState<C> {
    pub fn new(role: Role, auth: Arc<C::Authenticator>) -> Self {
        Self {
            role,
            index: 0,
            transcript: Transcript::new(),
            auth,
            local_eph: None,
            remote_eph: None,
            last_sent: None,
            last_received: None,
            keys: None,
            binding: None,
        }
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn index(&self) -> u8 {
        self.index
    }

    /// Whether all four messages have been processed and transport keys are
    /// available.
    pub fn is_done(&self) -> bool {
        self.keys.is_some()
    }

    /// A value both peers derive identically from the completed transcript.
    /// Suitable for binding outer protocols to this channel. Not secret.
    pub fn channel_binding(&self) -> Option<&[u8; CHANNEL_BINDING_SIZE]> {
        self.binding.as_ref()
    }

    pub(crate) fn transport_keys(&self) -> Option<&TransportKeys> {
        self.keys.as_ref()
    }

    /// The last message we transmitted, if any.
    pub(crate) fn last_sent(&self) -> Option<&[u8]> {
        self.last_sent.as_deref()
    }

    /// Produce the next outbound handshake message.
    ///
    /// If the state machine is waiting on the remote peer (or has finished),
    /// the previous outbound message is re-emitted byte for byte so callers
    /// can retransmit on a timer without tracking protocol position. Fails
    /// with [`HandshakeError::OutOfOrder`] only when nothing has been sent
    /// yet and it is not our turn.
    pub fn send<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<u8>, HandshakeError> {
        if self.index >= HANDSHAKE_MESSAGE_COUNT || !self.role.sends_at(self.index) {
            return self.last_sent.clone().ok_or(HandshakeError::OutOfOrder);
        }
        let msg = match u32::from(self.index) {
            COUNTER_INIT_HELLO => self.send_init_hello(rng),
            COUNTER_RESP_HELLO => self.send_resp_hello(rng)?,
            COUNTER_INIT_DONE => self.send_init_done(rng)?,
            COUNTER_RESP_DONE => self.send_resp_done(),
            _ => return Err(HandshakeError::OutOfOrder),
        };
        self.index += 1;
        if self.index == HANDSHAKE_MESSAGE_COUNT {
            self.finalize();
        }
        self.last_sent = Some(msg.clone());
        Ok(msg)
    }

    /// Process one inbound handshake message.
    ///
    /// A fresh message must carry the counter the state machine expects next
    /// and come from the remote peer's direction. A byte-identical duplicate
    /// of the last message we already processed is answered by returning our
    /// last outbound message (the remote evidently missed it); anything else
    /// stale or premature is [`HandshakeError::OutOfOrder`]. State only
    /// advances if every check passes, so a failed delivery leaves the
    /// machine exactly as it was.
    pub fn deliver(&mut self, msg: &[u8]) -> Result<Option<Vec<u8>>, HandshakeError> {
        let (from_responder, counter) = parse_header(msg).ok_or(HandshakeError::ShortMessage)?;
        let fresh = counter == u32::from(self.index)
            && self.index < HANDSHAKE_MESSAGE_COUNT
            && from_responder == matches!(self.role, Role::Initiator);
        if !fresh {
            return if self.last_received.as_deref() == Some(msg) {
                Ok(self.last_sent.clone())
            } else {
                Err(HandshakeError::OutOfOrder)
            };
        }
        match u32::from(self.index) {
            COUNTER_INIT_HELLO => self.deliver_init_hello(msg)?,
            COUNTER_RESP_HELLO => self.deliver_resp_hello(msg)?,
            COUNTER_INIT_DONE => self.deliver_init_done(msg)?,
            COUNTER_RESP_DONE => self.deliver_resp_done(msg)?,
            _ => return Err(HandshakeError::OutOfOrder),
        }
        self.index += 1;
        if self.index == HANDSHAKE_MESSAGE_COUNT {
            self.finalize();
        }
        self.last_received = Some(msg.to_vec());
        Ok(None)
    }

    /// Reply to a handshake-counter message arriving after completion.
    ///
    /// Returns `Some` only for a byte-identical duplicate of the last
    /// message we processed, meaning the remote peer never saw our answer to
    /// it. Only the responder ever answers here: it re-acks a duplicated
    /// InitDone with its RespDone. The initiator stays silent so two peers
    /// cannot ping-pong final messages forever. A `None` for a duplicate is
    /// a benign drop; a `None` for anything else means the message is junk.
    pub(crate) fn late_message_reply(&self, msg: &[u8]) -> Option<Vec<u8>> {
        if self.last_received.as_deref() == Some(msg) && self.role.sends_at(3) {
            self.last_sent.clone()
        } else {
            None
        }
    }

    /// Whether `msg` duplicates the last inbound message we processed.
    pub(crate) fn is_duplicate(&self, msg: &[u8]) -> bool {
        self.last_received.as_deref() == Some(msg)
    }

    fn sig_target(transcript: &Transcript<C::Xof>) -> [u8; SIG_TARGET_SIZE] {
        let mut target = [0u8; SIG_TARGET_SIZE];
        transcript.derive(LABEL_SIG_TARGET, &mut target);
        target
    }

    fn send_init_hello<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Vec<u8> {
        let (secret, public) = C::Kem::generate(rng);
        let header = encode_header(false, COUNTER_INIT_HELLO);
        let pk = C::Kem::public_key_bytes(&public);
        let ts = timestamp_bytes();
        self.transcript.mix_public(&header);
        self.transcript.mix_public(&pk);
        self.transcript.mix_public(&ts);
        let proof = self.auth.prove(&Self::sig_target(&self.transcript));
        self.transcript.mix_public(&proof);
        self.local_eph = Some(secret);

        let mut msg = Vec::with_capacity(HEADER_SIZE + pk.len() + TIMESTAMP_SIZE + proof.len());
        msg.extend_from_slice(&header);
        msg.extend_from_slice(&pk);
        msg.extend_from_slice(&ts);
        msg.extend_from_slice(&proof);
        msg
    }

    fn deliver_init_hello(&mut self, msg: &[u8]) -> Result<(), HandshakeError> {
        let body = &msg[HEADER_SIZE..];
        let pk_size = <C::Kem as Kem>::PUBLIC_KEY_SIZE;
        if body.len() < pk_size + TIMESTAMP_SIZE {
            return Err(HandshakeError::ShortMessage);
        }
        let (pk_raw, rest) = body.split_at(pk_size);
        let (ts, proof) = rest.split_at(TIMESTAMP_SIZE);
        let remote =
            C::Kem::public_key_from_bytes(pk_raw).ok_or(HandshakeError::Verification)?;

        let mut transcript = self.transcript.clone();
        transcript.mix_public(&msg[..HEADER_SIZE]);
        transcript.mix_public(pk_raw);
        transcript.mix_public(ts);
        if !self.auth.verify(&Self::sig_target(&transcript), proof) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_public(proof);

        self.transcript = transcript;
        self.remote_eph = Some(remote);
        Ok(())
    }

    fn send_resp_hello<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<u8>, HandshakeError> {
        let Some(remote) = self.remote_eph.clone() else {
            return Err(HandshakeError::OutOfOrder);
        };
        let (secret, public) = C::Kem::generate(rng);
        let header = encode_header(true, COUNTER_RESP_HELLO);
        let pk = C::Kem::public_key_bytes(&public);
        let mut shared = Zeroizing::new([0u8; KEM_SHARED_SECRET_SIZE]);
        let Some(ct) = C::Kem::encapsulate(rng, &remote, &mut shared) else {
            return Err(HandshakeError::Verification);
        };

        self.transcript.mix_public(&header);
        self.transcript.mix_public(&pk);
        self.transcript.mix_public(&ct);
        self.transcript.mix_secret(shared.as_ref());
        let proof = self.auth.prove(&Self::sig_target(&self.transcript));
        let key = self.transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(true, COUNTER_RESP_HELLO);
        let mut sealed = Vec::with_capacity(proof.len() + <C::Aead as Aead>::OVERHEAD);
        C::Aead::seal(&key, &nonce, &[], &proof, &mut sealed);
        self.transcript.mix_public(&sealed);
        self.local_eph = Some(secret);

        let mut msg = Vec::with_capacity(HEADER_SIZE + pk.len() + ct.len() + sealed.len());
        msg.extend_from_slice(&header);
        msg.extend_from_slice(&pk);
        msg.extend_from_slice(&ct);
        msg.extend_from_slice(&sealed);
        Ok(msg)
    }

    fn deliver_resp_hello(&mut self, msg: &[u8]) -> Result<(), HandshakeError> {
        let Some(local) = &self.local_eph else {
            return Err(HandshakeError::OutOfOrder);
        };
        let body = &msg[HEADER_SIZE..];
        let pk_size = <C::Kem as Kem>::PUBLIC_KEY_SIZE;
        let ct_size = <C::Kem as Kem>::CIPHERTEXT_SIZE;
        if body.len() < pk_size + ct_size + <C::Aead as Aead>::OVERHEAD {
            return Err(HandshakeError::ShortMessage);
        }
        let (pk_raw, rest) = body.split_at(pk_size);
        let (ct, sealed) = rest.split_at(ct_size);
        let remote =
            C::Kem::public_key_from_bytes(pk_raw).ok_or(HandshakeError::Verification)?;

        let mut transcript = self.transcript.clone();
        transcript.mix_public(&msg[..HEADER_SIZE]);
        transcript.mix_public(pk_raw);
        transcript.mix_public(ct);
        let mut shared = Zeroizing::new([0u8; KEM_SHARED_SECRET_SIZE]);
        if !C::Kem::decapsulate(local, ct, &mut shared) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_secret(shared.as_ref());
        let target = Self::sig_target(&transcript);
        let key = transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(true, COUNTER_RESP_HELLO);
        let mut proof = Vec::with_capacity(sealed.len() - <C::Aead as Aead>::OVERHEAD);
        if !C::Aead::open(&key, &nonce, &[], sealed, &mut proof) {
            return Err(HandshakeError::Verification);
        }
        if !self.auth.verify(&target, &proof) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_public(sealed);

        self.transcript = transcript;
        self.remote_eph = Some(remote);
        Ok(())
    }

    fn send_init_done<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<u8>, HandshakeError> {
        let Some(remote) = self.remote_eph.clone() else {
            return Err(HandshakeError::OutOfOrder);
        };
        let header = encode_header(false, COUNTER_INIT_DONE);
        let mut shared = Zeroizing::new([0u8; KEM_SHARED_SECRET_SIZE]);
        let Some(ct) = C::Kem::encapsulate(rng, &remote, &mut shared) else {
            return Err(HandshakeError::Verification);
        };

        self.transcript.mix_public(&header);
        self.transcript.mix_public(&ct);
        self.transcript.mix_secret(shared.as_ref());
        let proof = self.auth.prove(&Self::sig_target(&self.transcript));
        let key = self.transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(false, COUNTER_INIT_DONE);
        let mut sealed = Vec::with_capacity(proof.len() + <C::Aead as Aead>::OVERHEAD);
        C::Aead::seal(&key, &nonce, &[], &proof, &mut sealed);
        self.transcript.mix_public(&sealed);

        let mut msg = Vec::with_capacity(HEADER_SIZE + ct.len() + sealed.len());
        msg.extend_from_slice(&header);
        msg.extend_from_slice(&ct);
        msg.extend_from_slice(&sealed);
        Ok(msg)
    }

    fn deliver_init_done(&mut self, msg: &[u8]) -> Result<(), HandshakeError> {
        let Some(local) = &self.local_eph else {
            return Err(HandshakeError::OutOfOrder);
        };
        let body = &msg[HEADER_SIZE..];
        let ct_size = <C::Kem as Kem>::CIPHERTEXT_SIZE;
        if body.len() < ct_size + <C::Aead as Aead>::OVERHEAD {
            return Err(HandshakeError::ShortMessage);
        }
        let (ct, sealed) = body.split_at(ct_size);

        let mut transcript = self.transcript.clone();
        transcript.mix_public(&msg[..HEADER_SIZE]);
        transcript.mix_public(ct);
        let mut shared = Zeroizing::new([0u8; KEM_SHARED_SECRET_SIZE]);
        if !C::Kem::decapsulate(local, ct, &mut shared) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_secret(shared.as_ref());
        let target = Self::sig_target(&transcript);
        let key = transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(false, COUNTER_INIT_DONE);
        let mut proof = Vec::with_capacity(sealed.len() - <C::Aead as Aead>::OVERHEAD);
        if !C::Aead::open(&key, &nonce, &[], sealed, &mut proof) {
            return Err(HandshakeError::Verification);
        }
        if !self.auth.verify(&target, &proof) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_public(sealed);

        self.transcript = transcript;
        Ok(())
    }

    fn send_resp_done(&mut self) -> Vec<u8> {
        let header = encode_header(true, COUNTER_RESP_DONE);
        self.transcript.mix_public(&header);
        let key = self.transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(true, COUNTER_RESP_DONE);
        let mut sealed = Vec::with_capacity(<C::Aead as Aead>::OVERHEAD);
        C::Aead::seal(&key, &nonce, &[], &[], &mut sealed);
        self.transcript.mix_public(&sealed);

        let mut msg = Vec::with_capacity(HEADER_SIZE + sealed.len());
        msg.extend_from_slice(&header);
        msg.extend_from_slice(&sealed);
        msg
    }

    fn deliver_resp_done(&mut self, msg: &[u8]) -> Result<(), HandshakeError> {
        let sealed = &msg[HEADER_SIZE..];
        if sealed.len() < <C::Aead as Aead>::OVERHEAD {
            return Err(HandshakeError::ShortMessage);
        }

        let mut transcript = self.transcript.clone();
        transcript.mix_public(&msg[..HEADER_SIZE]);
        let key = transcript.derive_key(LABEL_AEAD_KEY);
        let nonce = to_nonce(true, COUNTER_RESP_DONE);
        let mut opened = Vec::new();
        if !C::Aead::open(&key, &nonce, &[], sealed, &mut opened) {
            return Err(HandshakeError::Verification);
        }
        transcript.mix_public(sealed);

        self.transcript = transcript;
        Ok(())
    }

    /// Derive the channel binding and split the transcript into the two
    /// directional transport keys. Called exactly once, when `index` hits 4.
    fn finalize(&mut self) {
        let mut binding = [0u8; CHANNEL_BINDING_SIZE];
        self.transcript.derive(LABEL_CHANNEL_BINDING, &mut binding);
        self.binding = Some(binding);

        let mut split = Zeroizing::new([0u8; 2 * AEAD_KEY_SIZE]);
        self.transcript.derive(LABEL_SPLIT, split.as_mut());
        let (init_to_resp, resp_to_init) = split.split_at(AEAD_KEY_SIZE);
        let mut outbound = Zeroizing::new([0u8; AEAD_KEY_SIZE]);
        let mut inbound = Zeroizing::new([0u8; AEAD_KEY_SIZE]);
        match self.role {
            Role::Initiator => {
                outbound.copy_from_slice(init_to_resp);
                inbound.copy_from_slice(resp_to_init);
            }
            Role::Responder => {
                outbound.copy_from_slice(resp_to_init);
                inbound.copy_from_slice(init_to_resp);
            }
        }
        self.keys = Some(TransportKeys { outbound, inbound });
        self.local_eph = None;
        self.remote_eph = None;
    }
}

fn timestamp_bytes() -> [u8; TIMESTAMP_SIZE] {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut out = [0u8; TIMESTAMP_SIZE];
    out[..8].copy_from_slice(&now.as_secs().to_be_bytes());
    out[8..].copy_from_slice(&now.subsec_nanos().to_be_bytes());
    out
}
