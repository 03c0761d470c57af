use thiserror::Error;

/// An error produced while driving a single handshake state machine.
///
/// These are recoverable: the offending message is discarded and only the
/// handshake slot involved is affected, never the whole channel.
#[derive(Debug, Error, PartialEq, Eq, Clone, Hash)]
pub enum HandshakeError {
    /// The message does not belong at the current protocol position, or a
    /// send was attempted when it is the remote peer's turn. On a lossy,
    /// reordering transport this is an ordinary occurrence and the message
    /// should simply be dropped.
    #[error("handshake message out of order")]
    OutOfOrder,

    /// The message is too short to contain the fields of its step.
    #[error("handshake message truncated")]
    ShortMessage,

    /// An identity proof did not verify against the transcript, an envelope
    /// failed to open, or a KEM ciphertext failed to decapsulate.
    #[error("handshake proof failed verification")]
    Verification,
}

/// An error produced by delivering one inbound datagram.
///
/// Failures here are isolated to the datagram that caused them; the session
/// (and every other in-flight operation) remains usable.
#[derive(Debug, Error, PartialEq, Eq, Clone, Hash)]
pub enum DeliverError {
    /// The datagram is too short to carry a header.
    #[error("datagram truncated")]
    ShortMessage,

    /// The ciphertext failed to authenticate under the session's inbound key.
    #[error("ciphertext failed to authenticate")]
    DecryptFailed,

    /// The counter was already accepted once, or fell behind the replay
    /// window.
    #[error("counter replayed or outside the replay window")]
    Replayed,

    /// A handshake counter arrived on a session whose handshake already
    /// completed and it was not a benign retransmit.
    #[error("late handshake message on an established session")]
    LateHandshakeMessage,

    /// A transport counter arrived before the handshake completed.
    #[error("transport message before handshake completion")]
    EarlyData,

    /// No session slot could read the datagram and it was not an InitHello.
    #[error("no session slot could read this datagram")]
    NoMatchingSession,

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// An error produced by a send path.
///
/// Lifecycle variants are surfaced to the caller so it can trigger or await a
/// fresh handshake; the channel's retry loop does exactly that.
#[derive(Debug, Error, PartialEq, Eq, Clone, Hash)]
pub enum SendError {
    /// There is no ready "current" session. A handshake must complete first.
    #[error("no ready session")]
    NoReadySession,

    /// The current session outlived its lifetime or went inactive for too
    /// long, and must be replaced by a fresh handshake.
    #[error("current session expired")]
    SessionExpired,

    /// The current session used up its counter space and must be replaced.
    #[error("session counter space exhausted")]
    SessionExhausted,

    /// Application data was passed to a session that is still handshaking.
    #[error("handshake incomplete")]
    HandshakeIncomplete,

    /// The channel was closed and will never become ready.
    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}
