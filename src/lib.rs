//! A mutually-authenticated secure channel over unreliable datagrams.
//!
//! Peers hold pre-exchanged long-term identity keys and establish forward
//! secret sessions through a four-message handshake in which each side
//! contributes an ephemeral KEM key and each performs one encapsulation
//! toward the other. Established sessions carry AEAD-protected datagrams
//! with replay protection, rotate through next/current/previous slots so a
//! rekey never drops in-flight traffic, and expire on lifetime, inactivity
//! or counter exhaustion.
//!
//! The crate is generic over its primitives via [`crypto::CipherSuite`];
//! enable the `default-crypto` feature for a suite built on X25519,
//! SHAKE-256, ChaCha20-Poly1305 and Ed25519. The synchronous core
//! ([`ChannelState`]) has no opinions about I/O or time; [`Channel`] wraps
//! it in an async handle that retries handshakes on a timer and parks
//! senders until a session is ready.

mod antireplay;
pub mod application;
mod channel;
mod channel_state;
pub mod crypto;
#[cfg(feature = "default-crypto")]
pub mod crypto_impl;
mod handshake;
pub mod proto;
pub mod result;
mod session;
mod transcript;

pub use application::{Settings, Transport};
pub use channel::Channel;
pub use channel_state::{ChannelState, Delivery};
pub use handshake::{HandshakeState, Role};
pub use session::Session;
