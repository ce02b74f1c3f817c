//! # sensortwin
//!
//! Keeps a digital twin of a multi-sensor device in sync with AWS IoT named
//! shadows and routes inbound commands to the device's local HTTP API.
//!
//! ```text
//! HeartbeatScheduler ──► device ShadowChannel ──publish──► shadow service
//!                                 ▲                              │
//!                                 └────── delta / accepted ◄─────┘
//!                                              │
//!                                  ReconcilerTable ──► DeviceApi
//!
//! cmd/<namespace>/<device>/<sensor>/<action> ──► CommandRouter ──► DeviceApi
//!                                                    │
//!                                                    └──► <inbound>/resp
//! ```
//!
//! - [`mqtt`] - transport trait plus the rumqttc binding
//! - [`shadow`] - state documents and the named-shadow protocol
//! - [`sensors`] - sensor registry, live sensor shadows, reconcilers
//! - [`device_api`] - local HTTP API client
//! - [`command`] - command topic parsing and routing
//! - [`heartbeat`] - periodic health sampling
//! - [`orchestrator`] - ordered startup and teardown
//! - [`config`] - TOML and environment configuration

pub mod command;
pub mod config;
pub mod device_api;
pub mod heartbeat;
pub mod mqtt;
pub mod orchestrator;
pub mod sensors;
pub mod shadow;

#[cfg(test)]
mod testing;
