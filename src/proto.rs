use crate::crypto::AEAD_NONCE_SIZE;

/* Wire format constants */

/// Size of the header prepended to every datagram: one big-endian `u32` whose
/// top bit carries the direction and whose low 31 bits carry the counter.
pub const HEADER_SIZE: usize = 4;

pub(crate) const DIRECTION_BIT: u32 = 1 << 31;
pub(crate) const COUNTER_MASK: u32 = DIRECTION_BIT - 1;

/* Handshake message counters */

pub(crate) const COUNTER_INIT_HELLO: u32 = 0;
pub(crate) const COUNTER_RESP_HELLO: u32 = 1;
pub(crate) const COUNTER_INIT_DONE: u32 = 2;
pub(crate) const COUNTER_RESP_DONE: u32 = 3;
pub(crate) const HANDSHAKE_MESSAGE_COUNT: u8 = 4;

/// The first counter value available to transport messages. Counters 0..4 are
/// reserved for the four handshake messages and are never reused by a session.
pub const FIRST_TRANSPORT_COUNTER: u32 = 4;

/// The highest counter a session will send with. Kept well below the 31-bit
/// wire limit so concurrent `fetch_add` racers cannot push a counter past it
/// and wrap into the direction bit.
pub(crate) const MAX_SEND_COUNTER: u32 = COUNTER_MASK - (1 << 16);

/* Receive window constants */

/// Number of receive counters a session remembers. A transport message that
/// arrives more than this far out of order is rejected because the session
/// can no longer tell whether it was replayed.
pub(crate) const REPLAY_WINDOW_SIZE: usize = 64;
/// Maximum number of counter steps a received counter may skip ahead of the
/// window in one jump.
pub(crate) const MAX_COUNTER_SKIP_AHEAD: u64 = 1 << 24;

/* Handshake body constants */

/// Size of the timestamp field of an InitHello: seconds (u64) plus
/// nanoseconds (u32), both big-endian.
pub const TIMESTAMP_SIZE: usize = 12;

/// Size of the channel binding value derived from a completed handshake
/// transcript.
pub const CHANNEL_BINDING_SIZE: usize = 64;

/* Transcript domain separation */

/// Initial transcript value; fixes the protocol and cipher-suite framing.
pub(crate) const PROTOCOL_NAME: &[u8] = b"p2pke/dual-kem-xof/v1";

pub(crate) const MIX_PUBLIC: &[u8] = b"pub";
pub(crate) const MIX_SECRET: &[u8] = b"sec";

pub(crate) const LABEL_AEAD_KEY: &[u8] = b"aead-key";
pub(crate) const LABEL_SIG_TARGET: &[u8] = b"sig-target";
pub(crate) const LABEL_CHANNEL_BINDING: &[u8] = b"chan-bind";
pub(crate) const LABEL_SPLIT: &[u8] = b"split";

/// Build the 4-byte header for a message.
pub(crate) fn encode_header(from_responder: bool, counter: u32) -> [u8; HEADER_SIZE] {
    debug_assert_eq!(counter & DIRECTION_BIT, 0);
    let word = counter | if from_responder { DIRECTION_BIT } else { 0 };
    word.to_be_bytes()
}

/// Split a datagram's header into (direction, counter). Returns `None` if the
/// datagram is too short to carry a header at all.
pub(crate) fn parse_header(datagram: &[u8]) -> Option<(bool, u32)> {
    let header: [u8; HEADER_SIZE] = datagram.get(..HEADER_SIZE)?.try_into().ok()?;
    let word = u32::from_be_bytes(header);
    Some((word & DIRECTION_BIT != 0, word & COUNTER_MASK))
}

/// Build a 96-bit AEAD nonce carrying the header word in its trailing bytes.
///
/// Transport keys are unique per session and direction, so packing the
/// direction and counter here is what makes every (key, nonce) pair distinct.
/// Handshake envelopes reuse this with the fixed counter of their step; their
/// keys are freshly derived per step so no counter is consumed.
pub(crate) fn to_nonce(from_responder: bool, counter: u32) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[AEAD_NONCE_SIZE - HEADER_SIZE..].copy_from_slice(&encode_header(from_responder, counter));
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        for (from_responder, counter) in [(false, 0), (true, 0), (false, 4), (true, COUNTER_MASK)] {
            let header = encode_header(from_responder, counter);
            assert_eq!(parse_header(&header), Some((from_responder, counter)));
        }
    }

    #[test]
    fn short_datagram_has_no_header() {
        assert_eq!(parse_header(&[]), None);
        assert_eq!(parse_header(&[0, 1, 2]), None);
    }

    #[test]
    fn direction_bit_does_not_leak_into_counter() {
        let header = encode_header(true, 7);
        let (from_responder, counter) = parse_header(&header).unwrap();
        assert!(from_responder);
        assert_eq!(counter, 7);
    }

    #[test]
    fn nonces_differ_by_direction_and_counter() {
        assert_ne!(to_nonce(false, 5), to_nonce(true, 5));
        assert_ne!(to_nonce(false, 5), to_nonce(false, 6));
    }
}
