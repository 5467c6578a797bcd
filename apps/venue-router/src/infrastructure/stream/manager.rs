//! Connection Manager
//!
//! One actor task per provider owns the transport, the connection state, the
//! subscription registry, the offline queue, the reconnect policy, the
//! circuit breaker and every timer. [`ConnectionManager`] is a cloneable
//! handle that talks to the actor over an mpsc mailbox, so all mutations are
//! serialized.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──► CONNECTING ──► CONNECTED ──(drop / pong timeout)──► RECONNECTING
//!                   │              ▲                                    │
//!                   ▼              └──────────(attempt succeeds)────────┤
//!                 ERROR                                                 ▼
//!                               (attempts exhausted) ──────────► DISCONNECTED
//! ```
//!
//! A failed initial connect ends in `ERROR` and is reported to the caller;
//! only a connection that was up reconnects on its own. A close with code
//! 1000 is a clean shutdown and does not reconnect.
//!
//! On every successful connect, subscriptions are re-sent in creation order
//! and the offline queue is flushed in FIFO order. A subscription stays
//! pending, and receives no data, until the provider acks it.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};

use crate::application::ports::{Connector, HealthSink, TransportFrame, TransportLink};
use crate::domain::connection::{ConnectionState, NORMAL_CLOSE_CODE};
use crate::domain::provider::{HealthSample, ProviderId};
use crate::domain::subscription::{
    Subscription, SubscriptionEntry, SubscriptionId, SubscriptionRegistry, SubscriptionType,
    Symbol,
};
use crate::domain::wire::{DataMessage, InboundMessage, WireMessage};
use crate::error::ConnectionError;
use crate::metrics;
use crate::resilience::CircuitBreaker;

use super::heartbeat::HeartbeatTracker;
use super::reconnect::ReconnectPolicy;
use super::settings::ConnectionSettings;
use super::timer::ScheduledTask;

const MAILBOX_CAPACITY: usize = 256;

// =============================================================================
// Events & Stats
// =============================================================================

/// Observable connection events.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// State changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// Transport opened.
    Connected,
    /// Transport closed.
    Disconnected {
        /// Close code, if known.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number since the drop (1-based).
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts exhausted; the manager stays disconnected.
    MaxReconnectAttemptsReached {
        /// Attempts made.
        attempts: u32,
    },
    /// Provider acknowledged a subscription.
    Subscribed {
        /// Subscription id.
        subscription_id: SubscriptionId,
    },
    /// A subscription callback returned an error or panicked.
    CallbackFailed {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Failure description.
        error: String,
    },
    /// Provider sent an error message.
    ProviderError {
        /// Provider error code.
        code: Option<String>,
        /// Provider error message.
        message: String,
        /// Subscription it relates to.
        subscription_id: Option<SubscriptionId>,
    },
    /// An inbound frame could not be decoded and was dropped.
    MalformedMessage {
        /// Decode error.
        error: String,
    },
}

/// Connection statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Current state.
    pub state: ConnectionState,
    /// Registered subscriptions.
    pub subscription_count: usize,
    /// Subscriptions confirmed on the current transport.
    pub active_subscription_count: usize,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Decoded inbound messages.
    pub messages_received: u64,
    /// Inbound frames dropped as malformed.
    pub malformed_messages: u64,
    /// Messages waiting for a connection.
    pub queued_messages: usize,
}

// =============================================================================
// Handle
// =============================================================================

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    Connect(Reply<Result<(), ConnectionError>>),
    Disconnect(Reply<()>),
    Shutdown(Reply<()>),
    Subscribe {
        entry: SubscriptionEntry,
        reply: Reply<()>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: Reply<bool>,
    },
    Send {
        message: WireMessage,
        queue_if_offline: bool,
        reply: Reply<Result<(), ConnectionError>>,
    },
    Subscriptions(Reply<Vec<Subscription>>),
    Stats(Reply<ConnectionStats>),
}

/// Handle to one provider connection.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    provider: ProviderId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Spawn the connection actor. The manager starts disconnected.
    #[must_use]
    pub fn spawn(
        provider: impl Into<ProviderId>,
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
        health: Arc<dyn HealthSink>,
    ) -> Self {
        let provider = provider.into();
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));

        let actor = Actor {
            policy: ReconnectPolicy::new(settings.reconnect()),
            breaker: CircuitBreaker::new(
                format!("connect:{provider}"),
                settings.circuit_breaker.clone(),
            ),
            provider: provider.clone(),
            settings,
            connector,
            health,
            state_tx,
            events: events.clone(),
            subscriptions: SubscriptionRegistry::new(),
            queue: VecDeque::new(),
            heartbeat: HeartbeatTracker::new(),
            link: None,
            epoch: 0,
            timer_tx,
            ping_timer: None,
            pong_timer: None,
            backoff_timer: None,
            messages_received: 0,
            malformed_messages: 0,
        };
        metrics::set_connection_state(&provider, ConnectionState::Disconnected);
        tokio::spawn(actor.run(command_rx, timer_rx));

        Self {
            provider,
            commands: command_tx,
            state: state_rx,
            events,
        }
    }

    /// Provider this connection belongs to.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ConnectionError::ManagerClosed)?;
        rx.await.map_err(|_| ConnectionError::ManagerClosed)
    }

    /// Open the connection.
    ///
    /// Resolves once connected, with subscriptions replayed and the queue
    /// flushed. Connecting while connected is a no-op; connecting while
    /// reconnecting makes an attempt immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectionTimeout`],
    /// [`ConnectionError::ConnectionFailed`] or
    /// [`ConnectionError::CircuitOpen`] when the attempt fails.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.request(Command::Connect).await?
    }

    /// Close the connection and stop reconnecting. Subscriptions are kept
    /// and replayed on the next connect.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.request(Command::Disconnect).await
    }

    /// Close the connection, drop all subscriptions and stop the actor.
    pub async fn shutdown(&self) -> Result<(), ConnectionError> {
        self.request(Command::Shutdown).await
    }

    /// Register a subscription.
    ///
    /// Sent immediately when connected, otherwise on the next connect.
    pub async fn create_subscription<F>(
        &self,
        subscription_type: SubscriptionType,
        symbols: Vec<Symbol>,
        callback: F,
        filters: Option<HashMap<String, Value>>,
    ) -> Result<SubscriptionHandle, ConnectionError>
    where
        F: Fn(&DataMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription = Subscription::new(
            uuid::Uuid::new_v4().to_string(),
            subscription_type,
            symbols,
            filters.unwrap_or_default(),
            Utc::now(),
        );
        let id = subscription.id.clone();
        let entry = SubscriptionEntry {
            subscription,
            callback: Arc::new(callback),
        };
        self.request(|reply| Command::Subscribe { entry, reply })
            .await?;
        Ok(SubscriptionHandle {
            id,
            manager: self.clone(),
        })
    }

    /// Remove a subscription. Returns false for unknown ids.
    pub async fn unsubscribe(&self, id: &str) -> Result<bool, ConnectionError> {
        let id = id.to_string();
        self.request(|reply| Command::Unsubscribe { id, reply }).await
    }

    /// Snapshot of all subscriptions.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, ConnectionError> {
        self.request(Command::Subscriptions).await
    }

    /// Send a message now.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NetworkError`] when not connected.
    pub async fn send(&self, message: WireMessage) -> Result<(), ConnectionError> {
        self.request(|reply| Command::Send {
            message,
            queue_if_offline: false,
            reply,
        })
        .await?
    }

    /// Send a message now, or queue it until the next connect.
    pub async fn send_or_queue(&self, message: WireMessage) -> Result<(), ConnectionError> {
        self.request(|reply| Command::Send {
            message,
            queue_if_offline: true,
            reply,
        })
        .await?
    }

    /// Connection statistics.
    pub async fn stats(&self) -> Result<ConnectionStats, ConnectionError> {
        self.request(Command::Stats).await
    }

    /// Current state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to connection events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// A created subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    manager: ConnectionManager,
}

impl SubscriptionHandle {
    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove this subscription.
    pub async fn unsubscribe(&self) -> Result<bool, ConnectionError> {
        self.manager.unsubscribe(&self.id).await
    }
}

// =============================================================================
// Actor
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Ping,
    PongDeadline(u64),
    Reconnect,
}

/// A timer event tagged with the epoch it was armed in.
#[derive(Debug, Clone, Copy)]
struct TimerFired {
    timer: Timer,
    epoch: u64,
}

struct Actor {
    provider: ProviderId,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    health: Arc<dyn HealthSink>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    subscriptions: SubscriptionRegistry,
    queue: VecDeque<WireMessage>,
    policy: ReconnectPolicy,
    breaker: CircuitBreaker,
    heartbeat: HeartbeatTracker,
    link: Option<TransportLink>,
    /// Bumped whenever the link or timers are replaced; older timer events
    /// are ignored.
    epoch: u64,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    ping_timer: Option<ScheduledTask>,
    pong_timer: Option<ScheduledTask>,
    backoff_timer: Option<ScheduledTask>,
    messages_received: u64,
    malformed_messages: u64,
}

async fn next_frame(link: &mut Option<TransportLink>) -> TransportFrame {
    match link {
        Some(link) => link
            .inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportFrame::Closed {
                code: None,
                reason: "transport dropped".to_string(),
            }),
        None => std::future::pending().await,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "callback panicked".to_string(), |m| format!("callback panicked: {m}"))
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        tracing::debug!(provider = %self.provider, "Connection actor started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                Some(fired) = timers.recv() => self.handle_timer(fired).await,
                frame = next_frame(&mut self.link) => self.handle_frame(frame).await,
            }
        }
        tracing::debug!(provider = %self.provider, "Connection actor stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(provider = %self.provider, %from, %to, "Unexpected state transition");
        }
        self.state_tx.send_replace(to);
        metrics::set_connection_state(&self.provider, to);
        tracing::debug!(provider = %self.provider, %from, %to, "Connection state changed");
        self.emit(ConnectionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                self.shutdown();
                let _ = reply.send(());
            }
            Command::Subscribe { entry, reply } => {
                self.subscribe(entry).await;
                let _ = reply.send(());
            }
            Command::Unsubscribe { id, reply } => {
                let removed = self.unsubscribe(&id).await;
                let _ = reply.send(removed);
            }
            Command::Send {
                message,
                queue_if_offline,
                reply,
            } => {
                let result = self.send(message, queue_if_offline).await;
                let _ = reply.send(result);
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.subscriptions.snapshot());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Reconnecting => {
                self.backoff_timer = None;
                return self.reconnect_attempt().await;
            }
            _ => {}
        }

        tracing::info!(provider = %self.provider, "Connecting");
        self.policy.reset();
        self.set_state(ConnectionState::Connecting);
        match self.open().await {
            Ok(link) => {
                self.on_open(link).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "Connect failed");
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        self.backoff_timer = None;
        let was_open = self.link.is_some();
        self.drop_link();
        self.policy.reset();
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            tracing::info!(provider = %self.provider, "Disconnected");
            self.emit(ConnectionEvent::Disconnected {
                code: Some(NORMAL_CLOSE_CODE),
                reason: "client disconnect".to_string(),
            });
        }
    }

    fn shutdown(&mut self) {
        self.disconnect();
        self.subscriptions.clear();
        self.queue.clear();
        metrics::set_subscriptions(&self.provider, 0);
        tracing::info!(provider = %self.provider, "Connection manager shut down");
    }

    async fn subscribe(&mut self, entry: SubscriptionEntry) {
        let message = entry
            .subscription
            .subscribe_message(now_ms())
            .with_provider(self.provider.clone());
        let id = entry.subscription.id.clone();
        tracing::debug!(
            provider = %self.provider,
            subscription_id = %id,
            subscription_type = %entry.subscription.subscription_type,
            symbols = ?entry.subscription.symbols,
            "Subscription created"
        );
        self.subscriptions
            .insert(entry.subscription, entry.callback);
        metrics::set_subscriptions(&self.provider, self.subscriptions.len());

        if self.state().is_connected()
            && let Err(e) = self.write(&message).await
        {
            self.connection_lost(None, &e.to_string());
        }
    }

    async fn unsubscribe(&mut self, id: &str) -> bool {
        let Some(subscription) = self.subscriptions.remove(id) else {
            return false;
        };
        metrics::set_subscriptions(&self.provider, self.subscriptions.len());
        tracing::debug!(provider = %self.provider, subscription_id = %id, "Unsubscribed");
        if self.state().is_connected() {
            let message = subscription
                .unsubscribe_message(now_ms())
                .with_provider(self.provider.clone());
            if let Err(e) = self.write(&message).await {
                self.connection_lost(None, &e.to_string());
            }
        }
        true
    }

    async fn send(
        &mut self,
        message: WireMessage,
        queue_if_offline: bool,
    ) -> Result<(), ConnectionError> {
        if self.state().is_connected() {
            match self.write(&message).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.connection_lost(None, &e.to_string());
                    if !queue_if_offline {
                        return Err(e);
                    }
                }
            }
        } else if !queue_if_offline {
            return Err(ConnectionError::NetworkError {
                provider: self.provider.clone(),
            });
        }
        self.enqueue(message);
        Ok(())
    }

    fn enqueue(&mut self, message: WireMessage) {
        if self.settings.queue_capacity == 0 {
            tracing::warn!(provider = %self.provider, "Offline queue disabled, dropping message");
            return;
        }
        if self.queue.len() >= self.settings.queue_capacity {
            self.queue.pop_front();
            tracing::warn!(
                provider = %self.provider,
                capacity = self.settings.queue_capacity,
                "Offline queue full, dropped oldest message"
            );
        }
        self.queue.push_back(message);
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state(),
            subscription_count: self.subscriptions.len(),
            active_subscription_count: self.subscriptions.active_len(),
            reconnect_attempts: self.policy.attempt_count(),
            messages_received: self.messages_received,
            malformed_messages: self.malformed_messages,
            queued_messages: self.queue.len(),
        }
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn open(&self) -> Result<TransportLink, ConnectionError> {
        if !self.breaker.try_acquire() {
            return Err(ConnectionError::CircuitOpen(self.provider.clone()));
        }
        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(link)) => {
                self.breaker.record_success();
                Ok(link)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(ConnectionError::ConnectionFailed {
                    provider: self.provider.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(ConnectionError::ConnectionTimeout {
                    provider: self.provider.clone(),
                    timeout,
                })
            }
        }
    }

    async fn on_open(&mut self, link: TransportLink) {
        self.epoch += 1;
        self.link = Some(link);
        self.policy.reset();
        self.heartbeat.reset();
        self.set_state(ConnectionState::Connected);
        tracing::info!(provider = %self.provider, "Connected");
        self.emit(ConnectionEvent::Connected);
        self.start_heartbeat();

        let restored = match self.replay_subscriptions().await {
            Ok(()) => self.flush_queue().await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            self.connection_lost(None, &e.to_string());
        }
    }

    async fn replay_subscriptions(&mut self) -> Result<(), ConnectionError> {
        let now = now_ms();
        let pending: Vec<(SubscriptionId, WireMessage)> = self
            .subscriptions
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    s.subscribe_message(now).with_provider(self.provider.clone()),
                )
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let count = pending.len();
        for (id, message) in pending {
            tracing::trace!(provider = %self.provider, subscription_id = %id, "Replaying subscription");
            self.write(&message).await?;
        }
        tracing::info!(provider = %self.provider, count, "Subscriptions replayed");
        Ok(())
    }

    async fn flush_queue(&mut self) -> Result<(), ConnectionError> {
        let mut flushed = 0usize;
        while let Some(message) = self.queue.pop_front() {
            if let Err(e) = self.write(&message).await {
                self.queue.push_front(message);
                return Err(e);
            }
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(provider = %self.provider, flushed, "Offline queue flushed");
        }
        Ok(())
    }

    async fn write(&self, message: &WireMessage) -> Result<(), ConnectionError> {
        let Some(link) = &self.link else {
            return Err(ConnectionError::NetworkError {
                provider: self.provider.clone(),
            });
        };
        let text = message
            .encode()
            .map_err(|e| ConnectionError::ConnectionFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })?;
        tracing::trace!(provider = %self.provider, kind = %message.kind, "Sending message");
        link.outbound
            .send(text)
            .await
            .map_err(|_| ConnectionError::NetworkError {
                provider: self.provider.clone(),
            })
    }

    fn drop_link(&mut self) {
        self.epoch += 1;
        self.link = None;
        self.ping_timer = None;
        self.pong_timer = None;
        self.heartbeat.reset();
        self.subscriptions.mark_all_inactive();
    }

    /// Transport lost while connected.
    fn connection_lost(&mut self, code: Option<u16>, reason: &str) {
        if self.link.is_none() {
            return;
        }
        self.drop_link();
        let next = ConnectionState::after_close(code);
        if next == ConnectionState::Disconnected {
            tracing::info!(provider = %self.provider, ?code, reason, "Connection closed by provider");
        } else {
            tracing::warn!(provider = %self.provider, ?code, reason, "Connection lost");
        }
        self.emit(ConnectionEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });
        self.set_state(next);
        if next == ConnectionState::Reconnecting {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.epoch += 1;
        if let Some(delay) = self.policy.next_delay() {
            let attempt = self.policy.attempt_count();
            metrics::record_reconnect(&self.provider);
            tracing::info!(
                provider = %self.provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            self.emit(ConnectionEvent::Reconnecting { attempt, delay });
            self.backoff_timer = Some(ScheduledTask::once(
                delay,
                self.timer_tx.clone(),
                TimerFired {
                    timer: Timer::Reconnect,
                    epoch: self.epoch,
                },
            ));
        } else {
            let attempts = self.policy.attempt_count();
            self.backoff_timer = None;
            tracing::error!(provider = %self.provider, attempts, "Max reconnect attempts reached");
            self.set_state(ConnectionState::Disconnected);
            self.emit(ConnectionEvent::MaxReconnectAttemptsReached { attempts });
        }
    }

    async fn reconnect_attempt(&mut self) -> Result<(), ConnectionError> {
        self.backoff_timer = None;
        match self.open().await {
            Ok(link) => {
                self.on_open(link).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    attempt = self.policy.attempt_count(),
                    error = %e,
                    "Reconnect attempt failed"
                );
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    async fn handle_timer(&mut self, fired: TimerFired) {
        if fired.epoch != self.epoch {
            return;
        }
        match fired.timer {
            Timer::Ping => self.send_ping().await,
            Timer::PongDeadline(seq) => {
                if self.heartbeat.is_expired(seq) {
                    tracing::warn!(
                        provider = %self.provider,
                        timeout_ms = self.settings.pong_timeout.as_millis() as u64,
                        "Pong timeout"
                    );
                    self.connection_lost(None, "pong timeout");
                }
            }
            Timer::Reconnect => {
                if self.state() == ConnectionState::Reconnecting {
                    let _ = self.reconnect_attempt().await;
                }
            }
        }
    }

    fn start_heartbeat(&mut self) {
        let config = self.settings.heartbeat();
        if !config.is_enabled() {
            return;
        }
        self.ping_timer = Some(ScheduledTask::every(
            config.ping_interval,
            self.timer_tx.clone(),
            TimerFired {
                timer: Timer::Ping,
                epoch: self.epoch,
            },
        ));
    }

    async fn send_ping(&mut self) {
        let seq = self.heartbeat.ping_sent(Instant::now());
        let ping = WireMessage::ping(now_ms()).with_provider(self.provider.clone());
        if let Err(e) = self.write(&ping).await {
            self.connection_lost(None, &e.to_string());
            return;
        }
        tracing::trace!(provider = %self.provider, seq, "Ping sent");
        self.pong_timer = Some(ScheduledTask::once(
            self.settings.pong_timeout,
            self.timer_tx.clone(),
            TimerFired {
                timer: Timer::PongDeadline(seq),
                epoch: self.epoch,
            },
        ));
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: TransportFrame) {
        match frame {
            TransportFrame::Text(text) => self.handle_text(&text).await,
            TransportFrame::Closed { code, reason } => self.connection_lost(code, &reason),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.malformed_messages += 1;
                metrics::record_malformed_message(&self.provider);
                tracing::warn!(provider = %self.provider, error = %e, "Dropping malformed message");
                self.emit(ConnectionEvent::MalformedMessage {
                    error: e.to_string(),
                });
                return;
            }
        };
        self.messages_received += 1;
        metrics::record_message_received(&self.provider, message.kind());

        match message {
            InboundMessage::SubscriptionAck { subscription_id } => {
                if self.subscriptions.mark_active(&subscription_id) {
                    tracing::debug!(provider = %self.provider, %subscription_id, "Subscription acknowledged");
                    self.emit(ConnectionEvent::Subscribed { subscription_id });
                } else {
                    tracing::debug!(provider = %self.provider, %subscription_id, "Ack for unknown subscription");
                }
            }
            InboundMessage::Data(data) => self.dispatch(&data),
            InboundMessage::Ping { timestamp } => {
                let pong = WireMessage::pong(timestamp).with_provider(self.provider.clone());
                if let Err(e) = self.write(&pong).await {
                    self.connection_lost(None, &e.to_string());
                }
            }
            InboundMessage::Pong { .. } => {
                if let Some(rtt) = self.heartbeat.pong_received(Instant::now()) {
                    self.pong_timer = None;
                    metrics::record_ping_rtt(&self.provider, rtt);
                    self.health.record_health(HealthSample::latency(
                        self.provider.clone(),
                        rtt.as_secs_f64() * 1000.0,
                    ));
                }
            }
            InboundMessage::Error {
                code,
                message,
                subscription_id,
            } => {
                tracing::warn!(
                    provider = %self.provider,
                    code = ?code,
                    subscription_id = ?subscription_id,
                    message = %message,
                    "Provider error"
                );
                self.emit(ConnectionEvent::ProviderError {
                    code,
                    message,
                    subscription_id,
                });
            }
            InboundMessage::Subscribe { .. } | InboundMessage::Unsubscribe { .. } => {
                tracing::trace!(provider = %self.provider, "Ignoring echoed subscription request");
            }
        }
    }

    fn dispatch(&mut self, message: &DataMessage) {
        let recipients = self.subscriptions.recipients(message);
        if recipients.is_empty() {
            tracing::trace!(provider = %self.provider, kind = message.kind.as_str(), "No subscriber for message");
            return;
        }
        let now = Utc::now();
        for entry in recipients {
            let id = entry.subscription.id;
            self.subscriptions.touch(&id, now);
            let callback = entry.callback;
            let error = match panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };
            metrics::record_callback_failure(&self.provider);
            tracing::warn!(provider = %self.provider, subscription_id = %id, error = %error, "Subscription callback failed");
            self.emit(ConnectionEvent::CallbackFailed {
                subscription_id: id,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoOpHealthSink;
    use crate::infrastructure::stream::memory::{ConnectBehavior, memory_transport};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(1),
            ping_interval: Duration::ZERO,
            reconnect_base_delay: Duration::from_millis(100),
            max_reconnect_attempts: 3,
            ..ConnectionSettings::default()
        }
    }

    #[tokio::test]
    async fn initial_connect_failure_is_error_state() {
        let (connector, server) = memory_transport();
        server.set_behavior(ConnectBehavior::Refuse);
        let manager =
            ConnectionManager::spawn("p", settings(), Arc::new(connector), Arc::new(NoOpHealthSink));
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConnectionFailed { .. }));
        assert_eq!(manager.connection_state(), ConnectionState::Error);
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_connect_times_out() {
        let (connector, server) = memory_transport();
        server.set_behavior(ConnectBehavior::Hang);
        let manager =
            ConnectionManager::spawn("p", settings(), Arc::new(connector), Arc::new(NoOpHealthSink));
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConnectionTimeout { .. }));
    }

    #[tokio::test]
    async fn connect_twice_is_noop() {
        let (connector, server) = memory_transport();
        let manager =
            ConnectionManager::spawn("p", settings(), Arc::new(connector), Arc::new(NoOpHealthSink));
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(server.connect_attempts(), 1);
        assert!(manager.connection_state().is_connected());
    }

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        let (connector, _server) = memory_transport();
        let manager =
            ConnectionManager::spawn("p", settings(), Arc::new(connector), Arc::new(NoOpHealthSink));
        let err = manager.send(WireMessage::ping(1)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_connect() {
        let (connector, server) = memory_transport();
        server.set_behavior(ConnectBehavior::Refuse);
        let settings = ConnectionSettings {
            circuit_breaker: crate::resilience::CircuitBreakerConfig {
                failure_threshold: 2,
                ..crate::resilience::CircuitBreakerConfig::default()
            },
            ..settings()
        };
        let manager =
            ConnectionManager::spawn("p", settings, Arc::new(connector), Arc::new(NoOpHealthSink));
        assert!(manager.connect().await.is_err());
        assert!(manager.connect().await.is_err());
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err, ConnectionError::CircuitOpen("p".into()));
        assert_eq!(server.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_the_handle() {
        let (connector, _server) = memory_transport();
        let manager =
            ConnectionManager::spawn("p", settings(), Arc::new(connector), Arc::new(NoOpHealthSink));
        manager
            .create_subscription(SubscriptionType::MarketData, vec!["AAPL".into()], |_| Ok(()), None)
            .await
            .unwrap();
        manager.shutdown().await.unwrap();
        assert_eq!(manager.stats().await, Err(ConnectionError::ManagerClosed));
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "callback panicked: boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "callback panicked");
    }
}
