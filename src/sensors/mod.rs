//! Sensor bookkeeping
//!
//! - [`registry`] - the sensor list of the device-level shadow and its id index
//! - [`fleet`] - the per-sensor shadow channels that are live
//! - [`reconcilers`] - how desired sensor state is pushed to the device API

pub mod fleet;
pub mod reconcilers;
pub mod registry;

use std::sync::Arc;
use tokio::sync::RwLock;

pub use fleet::ShadowFleet;
pub use registry::{SensorChange, SensorRecord, SensorRegistry};

/// Registry shared between the heartbeat, the command router and the
/// device-level reconciler
pub type SharedRegistry = Arc<RwLock<SensorRegistry>>;
