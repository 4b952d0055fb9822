//! WiFi DPP Enrollee
//!
//! Provisions WiFi credentials through the Device Provisioning Protocol
//! (Wi-Fi Easy Connect):
//! - bootstrapping URI generation, optionally from a provisioned key
//! - URI presentation as a terminal QR code
//! - DPP handshake supervision with bounded retries
//! - association supervision until an address is acquired

pub mod backend;
pub mod config;
pub mod core;

pub use core::{
    error::{BootstrapError, ConfigError, ServiceError, StackError},
    session::{ProvisioningSession, ProvisioningSettings, SessionSummary},
    types::{NetworkCredential, NetworkSecret, Outcome, SessionReport},
};
