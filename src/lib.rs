//! courier - real-time conversation transport for per-booking chat.
//!
//! Keeps one conversation synchronized between a message history fetched
//! once over HTTP and a live, possibly interrupted event stream, exposing a
//! single connection-state machine and a duplicate-free message sequence to
//! the consuming UI.
//!
//! # Architecture
//!
//! The crate is organized by concern, with each module having a single
//! responsibility:
//!
//! | Module      | Responsibility                                     |
//! |-------------|----------------------------------------------------|
//! | `transport` | Open/close one live channel, move raw frames       |
//! | `wire`      | JSON wire format for pushed events and sends       |
//! | `history`   | One-shot paginated history load                    |
//! | `reconcile` | Merge history and stream into one ordered sequence |
//! | `reconnect` | Backoff curve and retry budget                     |
//! | `session`   | The facade a UI holds: status, send, retry, events |
//!
//! # Usage
//!
//! ```ignore
//! use courier::{ChatSession, HttpHistorySource, SessionConfig, WsTransport};
//!
//! let session = ChatSession::start(
//!     "bk-2041".into(),
//!     "guest-17".into(),
//!     SessionConfig::default(),
//!     WsTransport::new("wss://api.example.com/rt"),
//!     HttpHistorySource::new("https://api.example.com"),
//! );
//!
//! let mut events = session.subscribe();
//! if session.send("on my way!").await {
//!     // delivery confirmation arrives later as a stream echo
//! }
//! ```
//!
//! The session object lives exactly as long as the open conversation view.
//! Dropping it closes the channel and cancels any pending reconnect timer;
//! transport failures never surface as panics, only as `status()` and
//! `last_error()` snapshots the UI observes.

pub mod config;
pub mod error;
pub mod history;
pub mod message;
pub mod reconcile;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod wire;

// Re-exports
pub use config::SessionConfig;
pub use error::CourierError;
pub use history::{HistorySource, HttpHistorySource};
pub use message::{ConversationId, Message, MessageId, ParticipantId};
pub use reconcile::MessageLog;
pub use reconnect::{RetryPolicy, RetrySchedule};
pub use session::{ChatSession, ConnectionState, SessionEvent, StatusSnapshot};
pub use transport::{Channel, Transport, WsChannel, WsTransport};
