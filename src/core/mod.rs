//! Core business logic module

pub mod bootstrap;
pub mod connector;
pub mod error;
pub mod event;
pub mod presenter;
pub mod provisioning;
pub mod session;
pub mod signal;
pub mod types;
