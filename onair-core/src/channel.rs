//! Change channel: real-time delivery of broadcast state updates.
//!
//! Each subscription runs its own connection state machine:
//! `Connecting -> Connected -> (Disconnected -> Reconnecting)* ->
//! Connected | FallbackPolling`. Push connections are retried with bounded
//! exponential backoff; once the attempt budget is exhausted the channel
//! polls the state store on a fixed interval instead, indefinitely, until
//! unsubscribed.
//!
//! Every delivery is an authoritative full snapshot, never a diff. Each
//! successful connect first delivers the stored state, so a subscriber
//! joining mid-broadcast does not wait for the next write.

use crate::config::ChannelConfig;
use crate::error::{CoreError, Result};
use crate::model::BroadcastState;
use crate::store::{StateBackend, StateDocument, StateStore, BROADCAST_STATE_KEY};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Push-delivery primitive offered by the real-time transport collaborator.
///
/// The returned receiver yields raw document payloads (JSON); the receiver
/// closing means the connection dropped and the channel should reconnect.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a push subscription to changes of one document.
    ///
    /// # Errors
    ///
    /// [`CoreError::Transient`](crate::CoreError::Transient) when the
    /// connection cannot be established.
    async fn connect(&self, key: &str) -> Result<mpsc::Receiver<String>>;
}

/// Observable lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in flight.
    Connecting,
    /// Push deliveries are flowing.
    Connected,
    /// Lost (or never had) the push connection; retrying with backoff.
    Reconnecting { attempt: u32 },
    /// Push attempts exhausted; polling the state store instead.
    FallbackPolling,
}

/// Handle to one live subscription. Unsubscribing (or dropping) cancels the
/// connection task and all of its timers.
pub struct ChannelGuard {
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ChannelGuard {
    /// Terminate whichever delivery mode is active. Idempotent.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Current connection lifecycle state, for "connection degraded" UI.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection state transitions.
    #[must_use]
    pub fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory for subscriptions to the broadcast state singleton.
#[derive(Clone)]
pub struct ChangeChannel {
    store: StateStore,
    transport: Arc<dyn RealtimeTransport>,
    config: ChannelConfig,
}

impl ChangeChannel {
    #[must_use]
    pub fn new(
        backend: Arc<dyn StateBackend>,
        transport: Arc<dyn RealtimeTransport>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            store: StateStore::new(backend),
            transport,
            config,
        }
    }

    /// Subscribe to state updates. The callback receives each delivered
    /// snapshot; it runs on the subscription task and must not block.
    pub fn subscribe<F>(&self, on_change: F) -> ChannelGuard
    where
        F: Fn(BroadcastState) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let task = SubscriptionTask {
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            cancel: cancel.clone(),
            state_tx,
        };
        tokio::spawn(task.run(on_change));

        ChannelGuard { cancel, state_rx }
    }
}

struct SubscriptionTask {
    store: StateStore,
    transport: Arc<dyn RealtimeTransport>,
    config: ChannelConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl SubscriptionTask {
    async fn run<F>(self, on_change: F)
    where
        F: Fn(BroadcastState) + Send + Sync + 'static,
    {
        if self.push_loop(&on_change).await {
            // Unsubscribed while pushing; nothing left to do.
            return;
        }
        self.polling_loop(&on_change).await;
    }

    /// Drive push delivery with reconnects. Returns true when cancelled,
    /// false when the attempt budget is exhausted.
    async fn push_loop<F>(&self, on_change: &F) -> bool
    where
        F: Fn(BroadcastState) + Send + Sync,
    {
        let mut attempt: u32 = 0;
        let mut ever_connected = false;

        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let _ = self.state_tx.send(if attempt == 0 && !ever_connected {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });

            match self.transport.connect(BROADCAST_STATE_KEY).await {
                Ok(rx) => {
                    attempt = 0;
                    ever_connected = true;
                    let _ = self.state_tx.send(ConnectionState::Connected);
                    info!("push channel connected");
                    // Push only relays future writes. A client joining an
                    // already-live broadcast would otherwise stay silent
                    // until the next write, so seed with the stored state.
                    match self.store.read().await {
                        Ok(state) => on_change(state),
                        Err(CoreError::StateNotFound) => {
                            debug!("no broadcast state yet, waiting for the first write");
                        }
                        Err(e) => warn!("initial state read failed: {e}"),
                    }
                    if self.deliver(rx, on_change).await {
                        return true;
                    }
                    warn!("push channel closed, reconnecting");
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        "push connect failed (attempt {}/{}): {}",
                        attempt, self.config.max_connect_attempts, e
                    );
                    if attempt >= self.config.max_connect_attempts {
                        return false;
                    }
                    let delay = backoff_delay(&self.config, attempt);
                    tokio::select! {
                        () = self.cancel.cancelled() => return true,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Pump one live push connection. Returns true when cancelled.
    async fn deliver<F>(&self, mut rx: mpsc::Receiver<String>, on_change: &F) -> bool
    where
        F: Fn(BroadcastState) + Send + Sync,
    {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return true,
                payload = rx.recv() => match payload {
                    Some(raw) => match decode_payload(&raw) {
                        Ok(state) => on_change(state),
                        // One bad payload must not kill the subscription.
                        Err(e) => warn!("dropping malformed state payload: {e}"),
                    },
                    None => return false,
                }
            }
        }
    }

    async fn polling_loop<F>(&self, on_change: &F)
    where
        F: Fn(BroadcastState) + Send + Sync,
    {
        error!(
            "push channel unavailable after {} attempts, falling back to polling every {}ms",
            self.config.max_connect_attempts, self.config.poll_interval_ms
        );
        let _ = self.state_tx.send(ConnectionState::FallbackPolling);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.poll_interval()) => {
                    match self.store.read().await {
                        Ok(state) => on_change(state),
                        Err(e) => debug!("fallback poll failed: {e}"),
                    }
                }
            }
        }
    }
}

fn decode_payload(raw: &str) -> Result<BroadcastState> {
    let doc: StateDocument = serde_json::from_str(raw)?;
    doc.into_state()
}

fn backoff_delay(config: &ChannelConfig, attempt: u32) -> Duration {
    // delay = min(base * 2^(attempt-1), cap); attempt is 1-based here.
    let exponent = attempt.saturating_sub(1).min(16);
    let ms = config
        .backoff_base_ms
        .saturating_mul(1_u64 << exponent)
        .min(config.backoff_cap_ms);
    Duration::from_millis(ms)
}
