//! Inbound events from the DPP/WiFi stack

use std::{fmt, net::IpAddr};

use crate::core::types::NetworkCredential;

/// Event emitted by the underlying stack
///
/// Events of one session are delivered in the order the stack emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// Station interface is up and may start listening
    StationStarted,
    /// Bootstrapping URI generated (absent if the stack produced none)
    UriReady(Option<String>),
    /// DPP authentication completed, configuration exchange follows
    AuthSucceeded,
    /// Network configuration received (absent if the payload was unusable)
    ConfigReceived(Option<NetworkCredential>),
    /// DPP authentication or configuration failed
    AuthFailure { reason: String },
    /// Association lost or failed
    Disconnected { reason: DisconnectReason },
    /// Address assigned, association confirmed
    AddressAcquired(IpAddr),
    /// Anything the state machines do not know about
    Other(String),
}

/// Reason for a disconnect event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Unspecified,
    WrongPassword,
    NetworkNotFound,
    /// Associated but no address was assigned in time
    NoAddress,
    /// IEEE 802.11 reason code
    Code(u16),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Unspecified => f.write_str("unspecified"),
            DisconnectReason::WrongPassword => f.write_str("wrong password"),
            DisconnectReason::NetworkNotFound => f.write_str("network not found"),
            DisconnectReason::NoAddress => f.write_str("no address assigned"),
            DisconnectReason::Code(code) => write!(f, "reason code {}", code),
        }
    }
}
