use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::Notify;

use super::messages::ServerMessage;

const CHANNEL_CAPACITY: usize = 64;

/// Owns the duplex channel to the connected client. Messages are serialized
/// once and fanned out over a bounded broadcast buffer, preserving send
/// order. Also tracks the client count and recreation acks so the
/// coordinator's DESTRUCT phase can wait without touching the socket.
pub struct Broadcaster {
    tx: broadcast::Sender<String>,
    clients: AtomicUsize,
    acks: AtomicU64,
    ack_notify: Notify,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            clients: AtomicUsize::new(0),
            acks: AtomicU64::new(0),
            ack_notify: Notify::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and publish. No-op when nobody is subscribed.
    pub fn publish(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(text) => {
                let _ = self.tx.send(text);
            }
            Err(e) => {
                tracing::error!("failed to serialize broadcast message: {e}");
            }
        }
    }

    pub fn client_connected(&self) {
        self.clients.fetch_add(1, Ordering::SeqCst);
    }

    pub fn client_disconnected(&self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
        // Wake a pending DESTRUCT ack wait; the coordinator proceeds
        // optimistically once the client is gone.
        self.ack_notify.notify_waiters();
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Called by the socket task when the client confirms a recreation.
    pub fn record_ack(&self) {
        self.acks.fetch_add(1, Ordering::SeqCst);
        self.ack_notify.notify_waiters();
    }

    /// Wait until the client acks a recreation command, bounded by
    /// `timeout`. Returns `true` only on a real ack; a disconnect or an
    /// expired deadline resolves to `false` so the caller can continue
    /// optimistically.
    pub async fn wait_for_ack(&self, timeout: Duration) -> bool {
        if self.client_count() == 0 {
            return false;
        }

        let before = self.acks.load(Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.ack_notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking, so an ack that lands
            // between the check and the await is not lost.
            notified.as_mut().enable();

            if self.acks.load(Ordering::SeqCst) > before {
                return true;
            }
            if self.client_count() == 0 {
                return false;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.acks.load(Ordering::SeqCst) > before;
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
