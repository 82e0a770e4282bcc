//! Chat session facade and driver.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       ChatSession                         │
//! │  - UI-facing handle: status / messages / send / retry     │
//! │  - Commands travel over mpsc into the driver              │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      SessionDriver                        │
//! │  - One task owns the channel, retry budget, message log   │
//! │  - All state transitions happen here, none interleave     │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                 ┌────────────┼────────────┐
//!                 ▼            ▼            ▼
//!            Transport       wire       MessageLog
//! ```
//!
//! The driver is the only component that touches the live channel. All
//! outbound traffic routes through the facade, so a send racing a channel
//! swap is rejected deterministically instead of hitting a dying socket.
//!
//! Destroying the session closes the channel, cancels any pending retry
//! sleep, and stops the driver - no reconnect can fire against a session
//! that no longer exists.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::CourierError;
use crate::history::HistorySource;
use crate::message::{ConversationId, Message, ParticipantId};
use crate::reconcile::MessageLog;
use crate::reconnect::RetrySchedule;
use crate::transport::{Channel, Transport};
use crate::wire;

/// Connection lifecycle state of a session.
///
/// Exactly one value is current at any instant. `Failed` and `Exhausted`
/// are terminal until a manual [`ChatSession::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Status snapshot published through the watch channel.
///
/// `last_error` is cleared on every successful connect and otherwise holds
/// the most recent connection failure.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

/// Events broadcast to session subscribers.
///
/// `MessageReceived` fires only after the message is visible through
/// [`ChatSession::messages`] - a consumer never observes the notification
/// ahead of the data.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageReceived(Message),
    StatusChanged(ConnectionState),
}

/// Commands from the facade to the driver.
enum Command {
    Send {
        payload: String,
        ack: oneshot::Sender<bool>,
    },
    Retry,
}

/// The session object a UI holds for the lifetime of one open conversation.
///
/// # Guarantees
///
/// - `status()` / `last_error()` / `messages()` are cheap snapshots, safe to
///   poll from any thread.
/// - Dropping the session releases the channel and halts any pending retry.
///
/// # Non-Guarantees
///
/// - `send` returning `true` means transport handoff, not delivery. The
///   created message arrives later as a stream echo.
pub struct ChatSession {
    conversation: ConversationId,
    participant: ParticipantId,
    log: Arc<RwLock<MessageLog>>,
    status_rx: watch::Receiver<StatusSnapshot>,
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: broadcast::Sender<()>,
    driver: tokio::task::JoinHandle<()>,
}

impl ChatSession {
    /// Start a session for one conversation.
    ///
    /// Spawns the driver task and returns immediately. The driver fetches
    /// the history batch once, seeds the log, then enters the connect loop.
    pub fn start<T, H>(
        conversation: ConversationId,
        participant: ParticipantId,
        config: SessionConfig,
        transport: T,
        history: H,
    ) -> Self
    where
        T: Transport,
        H: HistorySource,
    {
        let log = Arc::new(RwLock::new(MessageLog::new()));
        let (status_tx, status_rx) = watch::channel(StatusSnapshot {
            state: ConnectionState::Connecting,
            last_error: None,
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let driver = SessionDriver {
            conversation: conversation.clone(),
            participant: participant.clone(),
            schedule: RetrySchedule::new(config.retry.clone()),
            config,
            transport,
            history,
            log: Arc::clone(&log),
            status_tx,
            command_rx,
            event_tx: event_tx.clone(),
            shutdown_rx: shutdown_tx.subscribe(),
        };

        let handle = tokio::spawn(async move { driver.run().await });

        Self {
            conversation,
            participant,
            log,
            status_rx,
            command_tx,
            event_tx,
            shutdown_tx,
            driver: handle,
        }
    }

    /// The conversation this session is bound to.
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    /// Last connection error, if any. Cleared on every successful connect.
    pub fn last_error(&self) -> Option<String> {
        self.status_rx.borrow().last_error.clone()
    }

    /// Snapshot of the reconciled message sequence.
    pub fn messages(&self) -> Vec<Message> {
        with_log(&self.log, |log| log.messages())
    }

    /// Unread messages from the other participant.
    pub fn unread(&self) -> usize {
        with_log(&self.log, |log| log.unread_from_peer(&self.participant))
    }

    /// Send a message on the open channel.
    ///
    /// Returns `false` without touching the channel when the text trims to
    /// empty or the session is not connected - the caller may disable input
    /// or wait for `connected`. Outbound sends are never queued while
    /// disconnected: silent queueing would hide delivery order from the
    /// caller.
    pub async fn send(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        if self.status() != ConnectionState::Connected {
            debug!(state = %self.status(), error = %CourierError::NotConnected, "Send rejected");
            return false;
        }

        let payload = match wire::encode_send(&self.conversation, text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode send payload");
                return false;
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Send {
                payload,
                ack: ack_tx,
            })
            .is_err()
        {
            return false;
        }

        ack_rx.await.unwrap_or(false)
    }

    /// Manually restart the connect loop after `failed` or `exhausted`.
    ///
    /// A no-op in any other state.
    pub fn retry(&self) {
        match self.status() {
            ConnectionState::Failed | ConnectionState::Exhausted => {
                let _ = self.command_tx.send(Command::Retry);
            }
            state => debug!(state = %state, "Retry ignored"),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the session: close the channel, cancel any pending retry.
    ///
    /// Idempotent; also performed on drop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        // Abort outright as well, so no retry timer can fire against a
        // session that no longer exists.
        self.driver.abort();
        debug!(conversation = %self.conversation, "Chat session dropped");
    }
}

/// Run a closure against the shared log. A poisoned lock is recovered - the
/// log itself is always left in a consistent state by its methods.
fn with_log<R>(log: &RwLock<MessageLog>, f: impl FnOnce(&mut MessageLog) -> R) -> R {
    let mut guard = match log.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

/// How a pump run over one channel ended.
enum Exit {
    Shutdown,
    Dropped(String),
}

/// One resolved select arm inside the pump.
enum Step {
    Shutdown,
    Ping,
    Command(Option<Command>),
    Frame(Result<Option<String>, CourierError>),
}

/// The driver task: owns every piece of mutable session state.
struct SessionDriver<T: Transport, H: HistorySource> {
    conversation: ConversationId,
    participant: ParticipantId,
    config: SessionConfig,
    transport: T,
    history: H,
    log: Arc<RwLock<MessageLog>>,
    schedule: RetrySchedule,
    status_tx: watch::Sender<StatusSnapshot>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<T: Transport, H: HistorySource> SessionDriver<T, H> {
    async fn run(mut self) {
        info!(conversation = %self.conversation, "Chat session starting");

        // One-shot history load, before the stream is authoritative.
        match self.history.fetch(&self.conversation).await {
            Ok(batch) => {
                let count = batch.len();
                with_log(&self.log, |log| log.seed(batch));
                debug!(count, "History seeded");
            }
            Err(e) => {
                // Live traffic is still worth having over an empty log;
                // surface the failure and carry on.
                warn!(error = %e, "History fetch failed");
                self.publish(ConnectionState::Connecting, Some(e.to_string()));
            }
        }

        loop {
            let carried_error = self.status_tx.borrow().last_error.clone();
            self.publish(ConnectionState::Connecting, carried_error);

            let opened = tokio::select! {
                _ = self.shutdown_rx.recv() => return,
                result = self.transport.open(&self.conversation, &self.participant) => result,
            };

            match opened {
                Ok(channel) => {
                    self.schedule.reset();
                    self.publish(ConnectionState::Connected, None);
                    info!(conversation = %self.conversation, "Conversation stream connected");

                    match self.pump(channel).await {
                        Exit::Shutdown => {
                            info!(conversation = %self.conversation, "Chat session shut down");
                            return;
                        }
                        Exit::Dropped(reason) => {
                            self.drain_commands();
                            self.publish(ConnectionState::Disconnected, Some(reason));
                        }
                    }
                }
                Err(CourierError::Rejected(detail)) => {
                    warn!(detail = %detail, "Stream handshake rejected");
                    self.drain_commands();
                    self.publish(ConnectionState::Failed, Some(detail));

                    if !self.park_until_retry().await {
                        return;
                    }
                    self.schedule.reset();
                    info!("Manual retry after rejection");
                    continue;
                }
                Err(e) => {
                    self.drain_commands();
                    self.publish(ConnectionState::Disconnected, Some(e.to_string()));
                }
            }

            match self.schedule.next_delay() {
                Some(delay) => {
                    info!(attempt = self.schedule.attempts(), ?delay, "Scheduling reconnect");
                    if !self.wait_retry_delay(delay).await {
                        return;
                    }
                }
                None => {
                    let last = self
                        .status_tx
                        .borrow()
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "connection lost".to_string());
                    let error = CourierError::RetriesExhausted {
                        attempts: self.schedule.attempts(),
                        last,
                    };
                    warn!(attempts = self.schedule.attempts(), "Retry budget exhausted");
                    self.publish(ConnectionState::Exhausted, Some(error.to_string()));

                    if !self.park_until_retry().await {
                        return;
                    }
                    self.schedule.reset();
                    info!("Manual retry after exhaustion");
                }
            }
        }
    }

    /// Move frames, commands, and keepalives over one open channel until it
    /// drops or the session shuts down.
    async fn pump(&mut self, mut channel: T::Channel) -> Exit {
        let mut ping = tokio::time::interval(self.config.ping_interval);

        loop {
            let step = tokio::select! {
                _ = self.shutdown_rx.recv() => Step::Shutdown,
                _ = ping.tick() => Step::Ping,
                command = self.command_rx.recv() => Step::Command(command),
                frame = channel.recv() => Step::Frame(frame),
            };

            match step {
                Step::Shutdown => {
                    channel.close().await;
                    return Exit::Shutdown;
                }
                Step::Ping => {
                    if let Err(e) = channel.ping().await {
                        warn!(error = %e, "Keepalive failed");
                        channel.close().await;
                        return Exit::Dropped(e.to_string());
                    }
                }
                Step::Command(Some(Command::Send { payload, ack })) => {
                    match channel.send(payload).await {
                        Ok(()) => {
                            let _ = ack.send(true);
                        }
                        Err(e) => {
                            let _ = ack.send(false);
                            warn!(error = %e, "Send failed, dropping channel");
                            channel.close().await;
                            return Exit::Dropped(e.to_string());
                        }
                    }
                }
                Step::Command(Some(Command::Retry)) => {
                    debug!("Retry ignored while connected");
                }
                Step::Command(None) => {
                    // Every facade handle is gone.
                    channel.close().await;
                    return Exit::Shutdown;
                }
                Step::Frame(Ok(Some(raw))) => self.ingest_frame(&raw),
                Step::Frame(Ok(None)) => {
                    info!("Server closed the conversation stream");
                    let closed = CourierError::Closed("closed by server".to_string());
                    return Exit::Dropped(closed.to_string());
                }
                Step::Frame(Err(e)) => {
                    warn!(error = %e, "Stream error");
                    channel.close().await;
                    return Exit::Dropped(e.to_string());
                }
            }
        }
    }

    /// Decode and ingest one pushed frame. The message is visible in the
    /// log before the notification fires.
    fn ingest_frame(&self, raw: &str) {
        match wire::decode_event(raw) {
            Ok(message) => {
                let appended = with_log(&self.log, |log| log.ingest(message.clone()));
                if appended {
                    debug!(id = %message.id, "Message ingested");
                    let _ = self.event_tx.send(SessionEvent::MessageReceived(message));
                }
            }
            Err(e) => {
                // One bad event must not sacrifice a healthy channel.
                warn!(error = %e, "Dropping malformed event");
            }
        }
    }

    /// Sleep out the backoff delay, still answering commands. Returns
    /// `false` on shutdown.
    async fn wait_retry_delay(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => return false,
                () = &mut sleep => return true,
                command = self.command_rx.recv() => match command {
                    Some(Command::Send { ack, .. }) => {
                        let _ = ack.send(false);
                    }
                    Some(Command::Retry) => {
                        debug!("Retry ignored while reconnect pending");
                    }
                    None => return false,
                },
            }
        }
    }

    /// Park in a terminal state until a manual retry. No timer runs here.
    /// Returns `false` on shutdown.
    async fn park_until_retry(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => return false,
                command = self.command_rx.recv() => match command {
                    Some(Command::Retry) => return true,
                    Some(Command::Send { ack, .. }) => {
                        let _ = ack.send(false);
                    }
                    None => return false,
                },
            }
        }
    }

    /// Refuse any command left over from a channel that just dropped.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                Command::Send { ack, .. } => {
                    let _ = ack.send(false);
                }
                Command::Retry => {}
            }
        }
    }

    /// Publish a state transition. The status snapshot always updates; the
    /// `StatusChanged` event fires only when the state itself changed.
    fn publish(&self, state: ConnectionState, last_error: Option<String>) {
        let state_changed = self.status_tx.borrow().state != state;
        self.status_tx.send_replace(StatusSnapshot { state, last_error });

        if state_changed {
            debug!(state = %state, "Connection state changed");
            let _ = self.event_tx.send(SessionEvent::StatusChanged(state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Exhausted.to_string(), "exhausted");
    }

    #[test]
    fn test_connection_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Disconnected).unwrap();
        assert_eq!(json, "\"disconnected\"");
    }
}
