//! One handshake attempt and, once it completes, the transport it becomes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};

use crate::antireplay::ReplayFilter;
use crate::crypto::{Aead, CipherSuite};
use crate::handshake::{HandshakeState, Role};
use crate::proto::{
    encode_header, parse_header, to_nonce, CHANNEL_BINDING_SIZE, FIRST_TRANSPORT_COUNTER,
    HEADER_SIZE, MAX_SEND_COUNTER,
};
use crate::result::{DeliverError, SendError};

/// The outcome of delivering one datagram to a session.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivered {
    /// Application payload was authenticated and appended to the caller's
    /// output buffer.
    Payload,
    /// A handshake message was consumed, possibly producing a reply that
    /// must be transmitted to the remote peer.
    Handshake(Option<Vec<u8>>),
}

/// A single security association with one remote peer.
///
/// Starts life as a handshake and turns into an AEAD transport when the
/// fourth message is processed. The send counter picks up at 4 right where
/// the handshake counters left off, so no counter value is ever used twice
/// under either directional key.
pub struct Session<C: CipherSuite> {
    handshake: HandshakeState<C>,
    send_counter: AtomicU32,
    replay: ReplayFilter,
}

impl<C: CipherSuite> Session<C> {
    pub(crate) fn new(role: Role, auth: Arc<C::Authenticator>) -> Self {
        Self {
            handshake: HandshakeState::new(role, auth),
            send_counter: AtomicU32::new(FIRST_TRANSPORT_COUNTER),
            replay: ReplayFilter::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.handshake.role()
    }

    /// Whether the handshake has completed and transport keys exist.
    pub fn is_done(&self) -> bool {
        self.handshake.is_done()
    }

    pub fn channel_binding(&self) -> Option<&[u8; CHANNEL_BINDING_SIZE]> {
        self.handshake.channel_binding()
    }

    /// The last handshake message this session transmitted.
    pub(crate) fn handshake_last_sent(&self) -> Option<&[u8]> {
        self.handshake.last_sent()
    }

    /// Produce the next (or re-emit the previous) outbound handshake message.
    pub(crate) fn send_handshake<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<u8>, SendError> {
        Ok(self.handshake.send(rng)?)
    }

    /// Seal one application payload into a transport datagram.
    pub(crate) fn send(&self, payload: &[u8]) -> Result<Vec<u8>, SendError> {
        let keys = self.handshake.transport_keys().ok_or(SendError::HandshakeIncomplete)?;
        let counter = self.next_counter().ok_or(SendError::SessionExhausted)?;
        let from_responder = self.role().from_responder();
        let nonce = to_nonce(from_responder, counter);
        let mut msg =
            Vec::with_capacity(HEADER_SIZE + payload.len() + <C::Aead as Aead>::OVERHEAD);
        msg.extend_from_slice(&encode_header(from_responder, counter));
        C::Aead::seal(&keys.outbound, &nonce, &[], payload, &mut msg);
        Ok(msg)
    }

    /// Claim the next send counter, saturating at the hard maximum so an
    /// exhausted session can never wrap back into reserved counter values.
    fn next_counter(&self) -> Option<u32> {
        let mut counter = self.send_counter.load(Ordering::Relaxed);
        loop {
            if counter >= MAX_SEND_COUNTER {
                return None;
            }
            match self.send_counter.compare_exchange_weak(
                counter,
                counter + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(counter),
                Err(observed) => counter = observed,
            }
        }
    }

    /// Process one inbound datagram.
    ///
    /// Handshake counters are routed to the handshake machine (with the
    /// duplicate tolerance described there); transport counters are checked
    /// against the replay window, opened under the inbound key, and their
    /// payload appended to `out`. The replay window is only committed after
    /// authentication, so a forged counter cannot burn a real one.
    pub(crate) fn deliver<R: RngCore + CryptoRng>(
        &mut self,
        msg: &[u8],
        rng: &mut R,
        out: &mut Vec<u8>,
    ) -> Result<Delivered, DeliverError> {
        let (from_responder, counter) =
            parse_header(msg).ok_or(DeliverError::ShortMessage)?;
        if counter < FIRST_TRANSPORT_COUNTER {
            return self.deliver_handshake(msg, rng);
        }

        let keys = self.handshake.transport_keys().ok_or(DeliverError::EarlyData)?;
        if from_responder != matches!(self.role(), Role::Initiator) {
            // Our own direction; nothing we could decrypt.
            return Err(DeliverError::DecryptFailed);
        }
        if !self.replay.check(counter) {
            return Err(DeliverError::Replayed);
        }
        let nonce = to_nonce(from_responder, counter);
        let mark = out.len();
        if !C::Aead::open(&keys.inbound, &nonce, &[], &msg[HEADER_SIZE..], out) {
            return Err(DeliverError::DecryptFailed);
        }
        if !self.replay.update(counter) {
            // Lost the race against a concurrent duplicate.
            out.truncate(mark);
            return Err(DeliverError::Replayed);
        }
        Ok(Delivered::Payload)
    }

    fn deliver_handshake<R: RngCore + CryptoRng>(
        &mut self,
        msg: &[u8],
        rng: &mut R,
    ) -> Result<Delivered, DeliverError> {
        if self.handshake.is_done() {
            if self.handshake.is_duplicate(msg) {
                return Ok(Delivered::Handshake(self.handshake.late_message_reply(msg)));
            }
            return Err(DeliverError::LateHandshakeMessage);
        }
        if let Some(resend) = self.handshake.deliver(msg)? {
            return Ok(Delivered::Handshake(Some(resend)));
        }
        // Lock-step: if the message we just consumed makes it our turn,
        // answer immediately.
        let reply = if !self.handshake.is_done()
            && self.handshake.role().sends_at(self.handshake.index())
        {
            Some(self.handshake.send(rng)?)
        } else {
            None
        };
        Ok(Delivered::Handshake(reply))
    }

    #[cfg(test)]
    pub(crate) fn set_send_counter(&self, counter: u32) {
        self.send_counter.store(counter, Ordering::Relaxed);
    }
}
