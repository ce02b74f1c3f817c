//! # Shadow Module
//!
//! Keeps one local [`StateDocument`] per named shadow and synchronizes it with
//! the remote shadow service over the injected [`MessageTransport`].
//!
//! ```text
//! shadow/
//! ├── document.rs   - reported/desired halves, merge rules, version tracking
//! ├── topics.rs     - `$aws/things/<thing>/shadow/name/<shadow>/...` layout
//! ├── messages.rs   - JSON request/response bodies
//! ├── reconcile.rs  - per-key reconciler trait and handler table
//! └── channel.rs    - protocol state machine for one named shadow
//! ```
//!
//! The device-level shadow and the per-sensor shadows share the same
//! [`ShadowChannel`] type. What differs is the [`ReconcilerTable`] handed to
//! the channel: it decides which desired keys can be acted upon.
//!
//! [`MessageTransport`]: crate::mqtt::MessageTransport

pub mod channel;
pub mod document;
pub mod messages;
pub mod reconcile;
pub mod topics;

use std::time::Duration;

use crate::mqtt::TransportError;

pub use channel::{ChannelState, ChannelStatsSnapshot, ShadowChannel, ShadowName};
pub use document::{DocumentSnapshot, StateDocument, StateMap};
pub use reconcile::{Reconciled, Reconciler, ReconcilerTable};
pub use topics::{ShadowTopic, ShadowTopics};

#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request rejected by shadow service (code {code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("No delete confirmation within {0:?}")]
    DeleteTimeout(Duration),

    #[error("Shadow channel closed while waiting for a response")]
    Closed,

    #[error("Operation not allowed in state {0:?}")]
    InvalidState(ChannelState),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}
