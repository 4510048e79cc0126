//! # relay-server
//!
//! In-memory hub bridging devices and UI observers.
//!
//! - `DeviceStore`: authoritative device id → (record, output channel) map
//! - `UiRegistry`: live UI channels and event fan-out
//! - `Hub`: write-then-announce routing between the two
//! - `WebSocket` sessions for devices (`/ws/devices`) and UIs (`/ws/ui`)
//! - REST value trigger, health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod rest;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::{Hub, Origin};
pub use server::RelayServer;
