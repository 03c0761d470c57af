//! Rotation of sessions through next / current / previous slots.
//!
//! At most one handshake is in flight (slot 0), at most one session carries
//! traffic (slot 1), and the session it replaced lingers (slot 2) so
//! datagrams still in flight under the old keys are not lost across a rekey.

use std::sync::Arc;
use std::time::Instant;

use crate::application::Settings;
use crate::crypto::{CipherSuite, Kem};
use crate::handshake::Role;
use crate::proto::{parse_header, COUNTER_INIT_HELLO, HEADER_SIZE, TIMESTAMP_SIZE};
use crate::result::{DeliverError, SendError};
use crate::session::{Delivered, Session};

const SLOT_NEXT: usize = 0;
const SLOT_CURRENT: usize = 1;
const SLOT_PREVIOUS: usize = 2;
const SLOT_COUNT: usize = 3;

/// What delivering one datagram to the channel produced.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Application payload was appended to the caller's output buffer.
    pub payload: bool,
    /// A handshake reply that must be transmitted to the remote peer.
    pub reply: Option<Vec<u8>>,
    /// A handshake completed and its session was promoted to current.
    pub promoted: bool,
}

struct SessionEntry<C: CipherSuite> {
    id: u64,
    created_at: Instant,
    last_received_at: Instant,
    session: Session<C>,
}

/// The synchronous core of a channel: three session slots, the shared
/// identity authenticator, and the RNG. All methods take `now` so the
/// timeout logic is driven entirely by the caller's clock.
pub struct ChannelState<C: CipherSuite> {
    slots: [Option<SessionEntry<C>>; SLOT_COUNT],
    auth: Arc<C::Authenticator>,
    settings: Settings,
    rng: C::Rng,
    next_id: u64,
}

impl<C: CipherSuite> ChannelState<C> {
    pub fn new(auth: Arc<C::Authenticator>, rng: C::Rng, settings: Settings) -> Self {
        Self { slots: [None, None, None], auth, settings, rng, next_id: 0 }
    }

    /// The channel binding of the session currently carrying traffic.
    pub fn channel_binding(&self) -> Option<&[u8; crate::proto::CHANNEL_BINDING_SIZE]> {
        self.slots[SLOT_CURRENT].as_ref().and_then(|e| e.session.channel_binding())
    }

    /// Whether a session is ready to carry application data.
    pub fn is_ready(&self) -> bool {
        self.slots[SLOT_CURRENT].is_some()
    }

    fn new_entry(&mut self, role: Role, now: Instant) -> SessionEntry<C> {
        let id = self.next_id;
        self.next_id += 1;
        SessionEntry {
            id,
            created_at: now,
            last_received_at: now,
            session: Session::new(role, Arc::clone(&self.auth)),
        }
    }

    /// Produce the next outbound message of the in-flight handshake,
    /// starting (or restarting) one if necessary.
    ///
    /// A live handshake in the next slot is left alone whatever its role:
    /// its latest message is simply re-emitted, which is the retransmit a
    /// lossy link needs. Only an empty, finished or timed-out slot is
    /// replaced with a fresh initiator attempt.
    pub fn send_handshake(&mut self, now: Instant) -> Result<Vec<u8>, SendError> {
        let live = self.slots[SLOT_NEXT].as_ref().is_some_and(|entry| {
            !entry.session.is_done()
                && now.saturating_duration_since(entry.created_at) < self.settings.handshake_timeout
        });
        if !live {
            let entry = self.new_entry(Role::Initiator, now);
            tracing::debug!(id = entry.id, "starting handshake");
            self.slots[SLOT_NEXT] = Some(entry);
        }
        match &mut self.slots[SLOT_NEXT] {
            Some(entry) => entry.session.send_handshake(&mut self.rng),
            None => Err(SendError::NoReadySession),
        }
    }

    /// Seal one application payload under the current session.
    pub fn send(&mut self, payload: &[u8], now: Instant) -> Result<Vec<u8>, SendError> {
        let Some(entry) = &self.slots[SLOT_CURRENT] else {
            return Err(SendError::NoReadySession);
        };
        if now.saturating_duration_since(entry.created_at) >= self.settings.session_lifetime
            || now.saturating_duration_since(entry.last_received_at)
                >= self.settings.activity_timeout
        {
            return Err(SendError::SessionExpired);
        }
        entry.session.send(payload)
    }

    /// Route one inbound datagram to whichever slot can read it.
    ///
    /// Slots are tried newest first, so a transport datagram under fresh
    /// keys never reaches the session it replaced. A datagram no slot could
    /// read is either the start of a remote-initiated handshake, for which a
    /// responder is installed in the next slot, or junk. When an InitHello
    /// collides with our own live initiator attempt the two hellos are
    /// compared as byte strings and only the smaller side yields, so a
    /// simultaneous open settles on one exchange in a single round instead
    /// of racing retry timers.
    pub fn deliver(
        &mut self,
        msg: &[u8],
        now: Instant,
        out: &mut Vec<u8>,
    ) -> Result<Delivery, DeliverError> {
        let mut last_err = DeliverError::NoMatchingSession;
        let mut hit = None;
        for idx in 0..SLOT_COUNT {
            let Some(entry) = &mut self.slots[idx] else { continue };
            match entry.session.deliver(msg, &mut self.rng, out) {
                Ok(outcome) => {
                    entry.last_received_at = now;
                    hit = Some((idx, outcome));
                    break;
                }
                Err(err) => last_err = err,
            }
        }

        let (idx, outcome) = match hit {
            Some(hit) => hit,
            None if is_init_hello::<C>(msg) && self.yields_to(msg, now) => {
                // A fresh InitHello no slot recognizes starts a remote
                // handshake, replacing whatever attempt was pending.
                let mut entry = self.new_entry(Role::Responder, now);
                tracing::debug!(id = entry.id, "accepting remote handshake");
                let outcome = entry.session.deliver(msg, &mut self.rng, out)?;
                self.slots[SLOT_NEXT] = Some(entry);
                (SLOT_NEXT, outcome)
            }
            None => return Err(last_err),
        };

        let promoted = idx == SLOT_NEXT
            && self.slots[SLOT_NEXT].as_ref().is_some_and(|e| e.session.is_done());
        if promoted {
            self.rotate(now);
        }

        Ok(match outcome {
            Delivered::Payload => Delivery { payload: true, reply: None, promoted },
            Delivered::Handshake(reply) => Delivery { payload: false, reply, promoted },
        })
    }

    /// Whether an inbound InitHello may replace whatever occupies the next
    /// slot. A live responder attempt yields (the remote evidently
    /// restarted); a live initiator attempt yields only to the
    /// lexicographically larger hello. Both peers compare the same two byte
    /// strings, so in a simultaneous open exactly one side becomes the
    /// responder.
    fn yields_to(&self, hello: &[u8], now: Instant) -> bool {
        let Some(entry) = &self.slots[SLOT_NEXT] else {
            return true;
        };
        if entry.session.role() != Role::Initiator
            || entry.session.is_done()
            || now.saturating_duration_since(entry.created_at) >= self.settings.handshake_timeout
        {
            return true;
        }
        match entry.session.handshake_last_sent() {
            Some(ours) => hello > ours,
            None => true,
        }
    }

    fn rotate(&mut self, now: Instant) {
        if let Some(entry) = &mut self.slots[SLOT_NEXT] {
            tracing::debug!(id = entry.id, "session promoted");
            // Session lifetime runs from promotion, not from the first
            // handshake message.
            entry.created_at = now;
        }
        self.slots[SLOT_PREVIOUS] = self.slots[SLOT_CURRENT].take();
        self.slots[SLOT_CURRENT] = self.slots[SLOT_NEXT].take();
    }
}

/// Structural test for an InitHello: counter 0, initiator direction, and at
/// least a public key and timestamp behind the header.
fn is_init_hello<C: CipherSuite>(msg: &[u8]) -> bool {
    match parse_header(msg) {
        Some((false, COUNTER_INIT_HELLO)) => {
            msg.len() >= HEADER_SIZE + <C::Kem as Kem>::PUBLIC_KEY_SIZE + TIMESTAMP_SIZE
        }
        _ => false,
    }
}
