//! Turntable Module
//!
//! BLE link to the rotating platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   TurntableClient                    │
//! │  (connection state machine, angle, reset-to-zero)    │
//! └───────────────┬───────────────────────┬──────────────┘
//!                 │                       │
//!                 ▼                       ▼
//!        ┌────────────────┐      ┌─────────────────┐
//!        │    Protocol    │      │  BleTransport   │
//!        │ - UUIDs        │      │ - scan/connect  │
//!        │ - rotate frame │      │ - GATT notify   │
//!        │ - angle frame  │      │ - writes        │
//!        └────────────────┘      └────────┬────────┘
//!                                         │
//!                          ┌──────────────┴─────────────┐
//!                          ▼                            ▼
//!                 SimulatedTurntable           BtleplugTransport
//!                                             (feature "btleplug")
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Device identifiers and frame codecs
//! - [`transport`] - Radio port and its asynchronous events
//! - [`client`] - Session state machine used by the controller

#[cfg(feature = "btleplug")]
pub mod btleplug_transport;
pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{TurntableClient, TurntableError};
pub use transport::{BleTransport, TransportEvent};
