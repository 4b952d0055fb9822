//! Domain types for DPP provisioning

use std::{fmt, net::IpAddr, str::FromStr, time::Duration};

use serde::Serialize;

use crate::core::error::ConfigError;

/// Secret part of a delivered network credential
#[derive(Clone, PartialEq, Eq)]
pub enum NetworkSecret {
    /// WPA passphrase (8..63 printable characters)
    Passphrase(String),
    /// Raw 256-bit pre-shared key
    Psk([u8; 32]),
    /// Open network
    Open,
}

impl fmt::Debug for NetworkSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkSecret::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            NetworkSecret::Psk(_) => f.write_str("Psk(<redacted>)"),
            NetworkSecret::Open => f.write_str("Open"),
        }
    }
}

/// Network credential delivered by the configurator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    /// Network SSID
    pub ssid: String,
    /// Network secret
    pub secret: NetworkSecret,
}

impl NetworkCredential {
    pub fn new(ssid: impl Into<String>, secret: NetworkSecret) -> Self {
        Self {
            ssid: ssid.into(),
            secret,
        }
    }
}

/// DPP enrollee state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    ListeningForAuth,
    AwaitingConfig,
    Applying,
    Connecting,
    AuthFailed,
}

/// WiFi association state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Associating,
    Connected,
    Failed,
}

/// Terminal signal raised by an event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSignal {
    Connected,
    ConnectionFailed,
    AuthenticationFailed,
}

/// Final result of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Connected,
    ConnectionFailed,
    AuthenticationFailed,
    /// The wait ended without a recognized terminal signal
    UnexpectedState,
}

impl From<TerminalSignal> for Outcome {
    fn from(signal: TerminalSignal) -> Self {
        match signal {
            TerminalSignal::Connected => Outcome::Connected,
            TerminalSignal::ConnectionFailed => Outcome::ConnectionFailed,
            TerminalSignal::AuthenticationFailed => Outcome::AuthenticationFailed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Connected => "connected",
            Outcome::ConnectionFailed => "connection failed",
            Outcome::AuthenticationFailed => "authentication failed",
            Outcome::UnexpectedState => "unexpected state",
        };
        f.write_str(s)
    }
}

/// Session identifier used to correlate log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WiFi channel a DPP enrollee may listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(u8);

impl Channel {
    pub fn new(number: u8) -> Option<Self> {
        Self::operating_class_of(number).map(|_| Self(number))
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// Center frequency in MHz
    pub fn frequency(&self) -> u32 {
        match self.0 {
            14 => 2484,
            ch @ 1..=13 => 2407 + 5 * u32::from(ch),
            ch => 5000 + 5 * u32::from(ch),
        }
    }

    /// Global operating class (IEEE 802.11 Annex E) of a 20 MHz channel
    pub fn operating_class(&self) -> u8 {
        // Channels are validated on construction
        Self::operating_class_of(self.0).unwrap_or(81)
    }

    fn operating_class_of(number: u8) -> Option<u8> {
        match number {
            1..=13 => Some(81),
            14 => Some(82),
            36..=48 if number % 4 == 0 => Some(115),
            52..=64 if number % 4 == 0 => Some(118),
            100..=144 if number % 4 == 0 => Some(121),
            149..=161 if number % 4 == 1 => Some(124),
            165 => Some(125),
            _ => None,
        }
    }
}

/// Ordered list of DPP listen channels, e.g. `"6"` or `"1,6,11"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelList(Vec<Channel>);

impl ChannelList {
    /// Channel the enrollee listens on
    pub fn primary(&self) -> Channel {
        self.0[0]
    }

    /// Channel list in `opclass/channel` notation used by DPP bootstrapping
    pub fn to_bootstrap_notation(&self) -> String {
        self.0
            .iter()
            .map(|ch| format!("{}/{}", ch.operating_class(), ch.number()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for ChannelList {
    fn default() -> Self {
        Self(vec![Channel(6)])
    }
}

impl FromStr for ChannelList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidChannelList {
            list: s.to_string(),
            reason,
        };

        let mut channels = Vec::new();
        for part in s.split(',').map(str::trim) {
            let number = part
                .parse::<u8>()
                .map_err(|_| invalid(format!("{:?} is not a channel number", part)))?;
            let channel =
                Channel::new(number).ok_or_else(|| invalid(format!("unsupported channel {}", number)))?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        if channels.is_empty() {
            return Err(invalid("empty channel list".to_string()));
        }

        Ok(Self(channels))
    }
}

impl fmt::Display for ChannelList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self
            .0
            .iter()
            .map(|ch| ch.number().to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&list)
    }
}

/// Diagnostic summary of a finished provisioning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    pub auth_retries: u32,
    pub connect_retries: u32,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_list_default() {
        let list: ChannelList = "6".parse().unwrap();
        assert_eq!(list, ChannelList::default());
        assert_eq!(list.primary().frequency(), 2437);
        assert_eq!(list.to_bootstrap_notation(), "81/6");
    }

    #[test]
    fn test_channel_list_multiple() {
        let list: ChannelList = "1, 6,11,36,149".parse().unwrap();
        assert_eq!(list.primary().number(), 1);
        assert_eq!(list.to_bootstrap_notation(), "81/1,81/6,81/11,115/36,124/149");
        assert_eq!(list.to_string(), "1,6,11,36,149");
    }

    #[test]
    fn test_channel_list_deduplicates() {
        let list: ChannelList = "6,6,11".parse().unwrap();
        assert_eq!(list.to_string(), "6,11");
    }

    #[test]
    fn test_channel_list_invalid() {
        assert!("".parse::<ChannelList>().is_err());
        assert!("0".parse::<ChannelList>().is_err());
        assert!("15".parse::<ChannelList>().is_err());
        assert!("37".parse::<ChannelList>().is_err());
        assert!("six".parse::<ChannelList>().is_err());
        assert!("6,".parse::<ChannelList>().is_err());
    }

    #[test]
    fn test_channel_frequencies() {
        assert_eq!(Channel::new(1).unwrap().frequency(), 2412);
        assert_eq!(Channel::new(13).unwrap().frequency(), 2472);
        assert_eq!(Channel::new(14).unwrap().frequency(), 2484);
        assert_eq!(Channel::new(36).unwrap().frequency(), 5180);
        assert_eq!(Channel::new(165).unwrap().frequency(), 5825);
        assert_eq!(Channel::new(14).unwrap().operating_class(), 82);
        assert_eq!(Channel::new(165).unwrap().operating_class(), 125);
    }

    #[test]
    fn test_secret_is_redacted() {
        let credential = NetworkCredential::new(
            "HomeNet",
            NetworkSecret::Passphrase("hunter2hunter2".into()),
        );
        let debug = format!("{:?}", credential);
        assert!(debug.contains("HomeNet"));
        assert!(!debug.contains("hunter2"));

        let debug = format!("{:?}", NetworkSecret::Psk([0xab; 32]));
        assert!(!debug.contains("ab"));
    }

    #[test]
    fn test_outcome_from_signal() {
        assert_eq!(Outcome::from(TerminalSignal::Connected), Outcome::Connected);
        assert_eq!(
            Outcome::from(TerminalSignal::ConnectionFailed),
            Outcome::ConnectionFailed
        );
        assert_eq!(
            Outcome::from(TerminalSignal::AuthenticationFailed),
            Outcome::AuthenticationFailed
        );
    }

    #[test]
    fn test_report_serialization() {
        let report = SessionReport {
            session_id: SessionId::new(),
            outcome: Outcome::Connected,
            ssid: Some("HomeNet".into()),
            ip_address: Some("192.168.1.100".parse().unwrap()),
            auth_retries: 0,
            connect_retries: 3,
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""outcome":"connected""#));
        assert!(json.contains(r#""ssid":"HomeNet""#));
        assert!(json.contains(r#""ip_address":"192.168.1.100""#));
        assert!(json.contains(r#""elapsed":1500"#));
    }

    #[test]
    fn test_report_omits_missing_fields() {
        let report = SessionReport {
            session_id: SessionId::new(),
            outcome: Outcome::AuthenticationFailed,
            ssid: None,
            ip_address: None,
            auth_retries: 10,
            connect_retries: 0,
            elapsed: Duration::ZERO,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""outcome":"authentication_failed""#));
        assert!(!json.contains("ssid"));
        assert!(!json.contains("ip_address"));
    }
}
