use zeroize::Zeroizing;

use crate::crypto::{Xof, AEAD_KEY_SIZE};
use crate::proto::{MIX_PUBLIC, MIX_SECRET, PROTOCOL_NAME};

const TRANSCRIPT_SIZE: usize = 64;

/// Running digest of everything exchanged during a handshake.
///
/// Every message is mixed in order on both sides, and KEM shared secrets are
/// mixed immediately after the ciphertexts that transport them, so the two
/// peers' accumulators agree exactly when their views of the exchange agree.
/// Secrets flow through the accumulator, hence the zeroizing wrapper.
pub(crate) struct Transcript<X: Xof> {
    sum: Zeroizing<[u8; TRANSCRIPT_SIZE]>,
    _xof: std::marker::PhantomData<fn() -> X>,
}

impl<X: Xof> Clone for Transcript<X> {
    fn clone(&self) -> Self {
        Self { sum: self.sum.clone(), _xof: std::marker::PhantomData }
    }
}

impl<X: Xof> Transcript<X> {
    pub fn new() -> Self {
        let mut sum = Zeroizing::new([0u8; TRANSCRIPT_SIZE]);
        let mut xof = X::new();
        xof.absorb(PROTOCOL_NAME);
        xof.expand(sum.as_mut());
        Self { sum, _xof: std::marker::PhantomData }
    }

    /// Fold `data` into the accumulator under `tag`.
    ///
    /// The accumulator and tag are fixed-size, so prefixing the tag's length
    /// keeps the absorbed byte stream unambiguous.
    fn mix(&mut self, tag: &[u8], data: &[u8]) {
        let mut xof = X::new();
        xof.absorb(self.sum.as_ref());
        xof.absorb(&[tag.len() as u8]);
        xof.absorb(tag);
        xof.absorb(data);
        xof.expand(self.sum.as_mut());
    }

    /// Mix bytes that travelled on the wire.
    pub fn mix_public(&mut self, data: &[u8]) {
        self.mix(MIX_PUBLIC, data);
    }

    /// Mix a KEM shared secret.
    pub fn mix_secret(&mut self, secret: &[u8]) {
        self.mix(MIX_SECRET, secret);
    }

    /// Derive `out.len()` bytes bound to the current accumulator under a
    /// domain-separation label. Does not advance the accumulator.
    pub fn derive(&self, label: &[u8], out: &mut [u8]) {
        let mut xof = X::new();
        xof.absorb(self.sum.as_ref());
        xof.absorb(&[label.len() as u8]);
        xof.absorb(label);
        xof.expand(out);
    }

    /// Derive one AEAD key under `label`.
    pub fn derive_key(&self, label: &[u8]) -> Zeroizing<[u8; AEAD_KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; AEAD_KEY_SIZE]);
        self.derive(label, key.as_mut());
        key
    }
}

#[cfg(all(test, feature = "default-crypto"))]
mod tests {
    use super::*;
    use crate::crypto_impl::Shake256Xof;

    type TestTranscript = Transcript<Shake256Xof>;

    #[test]
    fn identical_mixes_agree() {
        let mut a = TestTranscript::new();
        let mut b = TestTranscript::new();
        a.mix_public(b"hello");
        a.mix_secret(&[7u8; 32]);
        b.mix_public(b"hello");
        b.mix_secret(&[7u8; 32]);

        let mut out_a = [0u8; 64];
        let mut out_b = [0u8; 64];
        a.derive(b"label", &mut out_a);
        b.derive(b"label", &mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn different_data_diverges() {
        let mut a = TestTranscript::new();
        let mut b = TestTranscript::new();
        a.mix_public(b"hello");
        b.mix_public(b"hellp");

        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.derive(b"label", &mut out_a);
        b.derive(b"label", &mut out_b);
        assert_ne!(out_a, out_b);
    }

    #[test]
    fn public_and_secret_mixing_are_domain_separated() {
        let mut a = TestTranscript::new();
        let mut b = TestTranscript::new();
        a.mix_public(&[1u8; 16]);
        b.mix_secret(&[1u8; 16]);

        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.derive(b"label", &mut out_a);
        b.derive(b"label", &mut out_b);
        assert_ne!(out_a, out_b);
    }

    #[test]
    fn labels_are_domain_separated() {
        let mut t = TestTranscript::new();
        t.mix_public(b"message");
        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        t.derive(b"label-a", &mut out_a);
        t.derive(b"label-b", &mut out_b);
        assert_ne!(out_a, out_b);
    }

    #[test]
    fn derive_does_not_advance_the_accumulator() {
        let mut t = TestTranscript::new();
        t.mix_public(b"message");
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        t.derive(b"label", &mut first);
        t.derive(b"label", &mut second);
        assert_eq!(first, second);
    }
}
