//! Core library for the headless Shelly Wi-Fi provisioning agent.
//!
//! Discovers unprovisioned devices in AP mode, drives them onto a
//! target network, and talks to a remote manager for task dispatch and
//! status reporting. Platform Wi-Fi control and device dialects are
//! swappable behind traits, selected at startup from [`config::AgentConfig`].

pub mod config;
pub mod control_plane;
pub mod device;
pub mod discovery;
pub mod error;
pub mod manager_client;
pub mod model;
pub mod network;
pub mod provisioning;
pub mod radio_lock;

pub use error::{Error, Result};
