//! # Command Module
//!
//! Inbound commands arrive directly from the transport, independent of the
//! shadow delta path:
//!
//! ```text
//! cmd/<namespace>/<device>/<sensor_id>/<action>   {"action": ..., "body": ..., "response_topic": ...}
//!        │
//!        ▼
//! [CommandRouter] ──► DeviceApi ──► per-sensor ShadowChannel (on success)
//!        │
//!        ▼
//! <response_topic> or <inbound_topic>/resp
//! ```
//!
//! Handlers: `settings` reads or writes the sensor settings, `operate` starts
//! or stops the sensor.

pub mod envelope;
pub mod router;

pub use envelope::{
    parse_command_topic, CommandAddress, CommandEnvelope, CommandOutcome, CommandStatus, Status,
};
pub use router::{CommandKind, CommandReply, CommandRouter, RouterStatsSnapshot};
