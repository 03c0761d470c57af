//! The async façade over [`ChannelState`]: a cloneable handle whose `send`
//! transparently waits for a session, retransmitting handshakes on a timer
//! until one completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::application::{Settings, Transport};
use crate::channel_state::ChannelState;
use crate::crypto::CipherSuite;
use crate::proto::CHANNEL_BINDING_SIZE;
use crate::result::{DeliverError, SendError};

/// A mutually-authenticated datagram channel to one remote peer.
///
/// Cheap to clone; all clones share the same sessions. Outbound datagrams go
/// through the caller-supplied [`Transport`]; inbound ones must be fed to
/// [`Channel::deliver`] by whatever reads the caller's socket.
pub struct Channel<C: CipherSuite, T: Transport> {
    inner: Arc<ChannelInner<C, T>>,
}

impl<C: CipherSuite, T: Transport> Clone for Channel<C, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct ChannelInner<C: CipherSuite, T: Transport> {
    state: Mutex<ChannelState<C>>,
    transport: T,
    settings: Settings,
    /// Bumped whenever a session is promoted; senders parked in `send` wait
    /// on this.
    ready: watch::Sender<u64>,
    retry: Mutex<RetryState>,
    closed: AtomicBool,
}

struct RetryState {
    waiters: usize,
    task: Option<JoinHandle<()>>,
}

/// Keeps the retry task alive while at least one `send` is parked. Dropping
/// the last guard (including by cancelling the send future) aborts it.
struct RetryGuard<'a> {
    retry: &'a Mutex<RetryState>,
}

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        let mut retry = self.retry.lock().unwrap();
        retry.waiters -= 1;
        if retry.waiters == 0 {
            if let Some(task) = retry.task.take() {
                task.abort();
            }
        }
    }
}

impl<C: CipherSuite, T: Transport> Channel<C, T> {
    pub fn new(
        auth: Arc<C::Authenticator>,
        rng: C::Rng,
        settings: Settings,
        transport: T,
    ) -> Self {
        let (ready, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ChannelInner {
                state: Mutex::new(ChannelState::new(auth, rng, settings)),
                transport,
                settings,
                ready,
                retry: Mutex::new(RetryState { waiters: 0, task: None }),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a session is currently ready to carry data.
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().unwrap().is_ready()
    }

    /// The channel binding of the current session, if one is established.
    pub fn channel_binding(&self) -> Option<[u8; CHANNEL_BINDING_SIZE]> {
        self.inner.state.lock().unwrap().channel_binding().copied()
    }

    /// Encrypt and transmit one payload, waiting for a session if none is
    /// ready.
    ///
    /// While parked, a background task retransmits handshake messages every
    /// [`Settings::handshake_retry_interval`] until a session is promoted.
    /// Cancelling the returned future is safe at any point: the payload has
    /// either been handed to the transport or not sent at all.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        let mut ready = self.inner.ready.subscribe();
        let mut guard = None;
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(SendError::ChannelClosed);
            }
            let attempt = {
                let mut state = self.inner.state.lock().unwrap();
                // Mark the gate as seen while still holding the state lock;
                // a promotion landing after this point registers as a
                // change and wakes us.
                ready.borrow_and_update();
                state.send(payload, Instant::now())
            };
            match attempt {
                Ok(datagram) => {
                    self.inner.transport.send(&datagram);
                    return Ok(());
                }
                Err(
                    err @ (SendError::NoReadySession
                    | SendError::SessionExpired
                    | SendError::SessionExhausted),
                ) => {
                    tracing::trace!(%err, "waiting for a session");
                    if guard.is_none() {
                        guard = Some(self.engage_retry());
                    }
                    if ready.changed().await.is_err() {
                        return Err(SendError::ChannelClosed);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Feed one datagram received from the network.
    ///
    /// Appends any decrypted payload to `out` and returns whether one was
    /// produced. Handshake replies are transmitted automatically. Errors
    /// mean the datagram was dropped; the channel itself is unaffected.
    pub fn deliver(&self, datagram: &[u8], out: &mut Vec<u8>) -> Result<bool, DeliverError> {
        let delivery = {
            let mut state = self.inner.state.lock().unwrap();
            let delivery = state.deliver(datagram, Instant::now(), out)?;
            if delivery.promoted {
                // Under the lock, paired with borrow_and_update in send.
                self.inner.ready.send_modify(|generation| *generation += 1);
            }
            delivery
        };
        if let Some(reply) = &delivery.reply {
            if !self.inner.closed.load(Ordering::Acquire) {
                self.inner.transport.send(reply);
            }
        }
        Ok(delivery.payload)
    }

    /// Shut the channel down. Parked and future `send`s fail with
    /// [`SendError::ChannelClosed`]; `deliver` becomes inert.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(task) = self.inner.retry.lock().unwrap().task.take() {
            task.abort();
        }
        // Wake every parked sender so it observes the closed flag.
        self.inner.ready.send_modify(|generation| *generation += 1);
    }

    fn engage_retry(&self) -> RetryGuard<'_> {
        let mut retry = self.inner.retry.lock().unwrap();
        retry.waiters += 1;
        if retry.task.is_none() && !self.inner.closed.load(Ordering::Acquire) {
            let inner = Arc::clone(&self.inner);
            retry.task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(inner.settings.handshake_retry_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    let attempt =
                        inner.state.lock().unwrap().send_handshake(Instant::now());
                    match attempt {
                        Ok(datagram) => inner.transport.send(&datagram),
                        Err(err) => tracing::debug!(%err, "handshake attempt failed"),
                    }
                }
            }));
        }
        RetryGuard { retry: &self.inner.retry }
    }
}

impl<C: CipherSuite, T: Transport> Drop for ChannelInner<C, T> {
    fn drop(&mut self) {
        if let Some(task) = self.retry.lock().unwrap().task.take() {
            task.abort();
        }
    }
}
