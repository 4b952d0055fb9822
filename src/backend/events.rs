//! wpa_supplicant DPP event parsing

use tracing::{debug, warn};

use crate::core::{
    event::StackEvent,
    types::{NetworkCredential, NetworkSecret},
};

/// A wpa_supplicant control interface event relevant to DPP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WpaEvent {
    AuthSuccess,
    ConfReceived,
    ConfObjAkm(String),
    /// `None` if the SSID is not valid UTF-8
    ConfObjSsid(Option<String>),
    ConfObjPass(Option<String>),
    ConfObjPsk(Option<[u8; 32]>),
    /// Part of a configuration object this enrollee does not apply
    /// (connector, signing key, network access key)
    ObjectDetail(String),
    Failure(String),
    /// Any other DPP event
    Other(String),
    /// Not a DPP event
    Unrelated,
}

/// Failure events; each one ends the current handshake
const FAILURE_EVENTS: [&str; 5] = [
    "DPP-FAIL",
    "DPP-CONF-FAILED",
    "DPP-AUTH-INIT-FAILED",
    "DPP-NOT-COMPATIBLE",
    "DPP-TIMEOUT",
];

/// Connector material reported alongside a configuration object
const OBJECT_DETAIL_EVENTS: [&str; 3] = ["DPP-CONNECTOR", "DPP-C-SIGN-KEY", "DPP-NET-ACCESS-KEY"];

/// Strip the `<N>` message level prefix of unsolicited events
fn strip_level(line: &str) -> &str {
    let line = line.trim();
    match line.strip_prefix('<').and_then(|rest| rest.split_once('>')) {
        Some((level, rest)) if level.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => line,
    }
}

/// Parse one event line
pub fn parse_event(line: &str) -> WpaEvent {
    let line = strip_level(line);
    let (name, args) = line.split_once(' ').unwrap_or((line, ""));

    match name {
        "DPP-AUTH-SUCCESS" => WpaEvent::AuthSuccess,
        "DPP-CONF-RECEIVED" => WpaEvent::ConfReceived,
        "DPP-CONFOBJ-AKM" => WpaEvent::ConfObjAkm(args.trim().to_string()),
        "DPP-CONFOBJ-SSID" => WpaEvent::ConfObjSsid(decode_ssid_text(args)),
        "DPP-CONFOBJ-PASS" => WpaEvent::ConfObjPass(
            hex::decode(args.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok()),
        ),
        "DPP-CONFOBJ-PSK" => {
            let mut psk = [0u8; 32];
            WpaEvent::ConfObjPsk(hex::decode_to_slice(args.trim(), &mut psk).ok().map(|_| psk))
        }
        name if FAILURE_EVENTS.contains(&name) => WpaEvent::Failure(line.to_string()),
        // Key material must not travel any further than the name
        name if OBJECT_DETAIL_EVENTS.contains(&name) || name.starts_with("DPP-CONFOBJ-") => {
            WpaEvent::ObjectDetail(name.to_string())
        }
        name if name.starts_with("DPP-") => WpaEvent::Other(line.to_string()),
        _ => WpaEvent::Unrelated,
    }
}

/// Undo the escaping wpa_supplicant applies to SSIDs in event text
///
/// Returns `None` for SSIDs that are not valid UTF-8.
fn decode_ssid_text(text: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut input = text.bytes();

    while let Some(b) = input.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match input.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'e') => bytes.push(0x1b),
            Some(b'x') => {
                let digits = [input.next(), input.next()];
                let decoded = match digits {
                    [Some(hi), Some(lo)] => {
                        let pair = [hi, lo];
                        std::str::from_utf8(&pair)
                            .ok()
                            .and_then(|s| u8::from_str_radix(s, 16).ok())
                    }
                    _ => None,
                };
                match decoded {
                    Some(value) => bytes.push(value),
                    None => {
                        bytes.extend(b"\\x");
                        bytes.extend(digits.into_iter().flatten());
                    }
                }
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }

    String::from_utf8(bytes).ok()
}

#[derive(Debug, Default)]
struct PendingConfig {
    akm: Option<String>,
    ssid: Option<String>,
    secret: Option<NetworkSecret>,
    malformed: bool,
}

impl PendingConfig {
    fn into_credential(self) -> Option<NetworkCredential> {
        if self.malformed {
            warn!("Configuration object carried an undecodable field");
            return None;
        }
        let ssid = self.ssid.filter(|ssid| !ssid.is_empty())?;
        let secret = match (self.secret, self.akm.as_deref()) {
            (Some(secret), _) => secret,
            // Connector-only credentials cannot be applied as a plain network
            (None, Some(akm)) if akm.contains("dpp") => {
                warn!(akm, "DPP connector credentials are not supported");
                return None;
            }
            (None, Some(akm)) if akm.contains("psk") || akm.contains("sae") => {
                warn!(akm, "Protected network delivered without a secret");
                return None;
            }
            (None, _) => NetworkSecret::Open,
        };
        Some(NetworkCredential::new(ssid, secret))
    }
}

/// Turns the `DPP-CONF-RECEIVED` / `DPP-CONFOBJ-*` sequence into a single
/// [`StackEvent::ConfigReceived`]
///
/// wpa_supplicant reports a received configuration object as several
/// lines with no terminator. The credential is complete once a secret
/// arrives. Otherwise the caller flushes it after a quiet period, or a new
/// handshake replaces it.
#[derive(Debug, Default)]
pub struct ConfigAssembler {
    pending: Option<PendingConfig>,
}

impl ConfigAssembler {
    /// Whether a configuration object is being assembled
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Translate one event, returning the stack events it completes
    pub fn push(&mut self, event: WpaEvent) -> Vec<StackEvent> {
        let mut out = Vec::new();

        match event {
            WpaEvent::ConfReceived => {
                out.extend(self.flush());
                debug!("DPP configuration received");
                self.pending = Some(PendingConfig::default());
            }
            WpaEvent::ConfObjAkm(akm) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.akm = Some(akm);
                }
            }
            WpaEvent::ConfObjSsid(ssid) => {
                if let Some(pending) = self.pending.as_mut() {
                    match ssid {
                        Some(ssid) => pending.ssid = Some(ssid),
                        None => pending.malformed = true,
                    }
                }
            }
            WpaEvent::ConfObjPass(pass) => {
                if let Some(mut pending) = self.pending.take() {
                    match pass {
                        Some(pass) => pending.secret = Some(NetworkSecret::Passphrase(pass)),
                        None => pending.malformed = true,
                    }
                    out.push(StackEvent::ConfigReceived(pending.into_credential()));
                }
            }
            WpaEvent::ConfObjPsk(psk) => {
                if let Some(mut pending) = self.pending.take() {
                    match psk {
                        Some(psk) => pending.secret = Some(NetworkSecret::Psk(psk)),
                        None => pending.malformed = true,
                    }
                    out.push(StackEvent::ConfigReceived(pending.into_credential()));
                }
            }
            WpaEvent::ObjectDetail(name) => debug!("Skipping configuration object detail {}", name),
            WpaEvent::AuthSuccess => {
                out.extend(self.flush());
                out.push(StackEvent::AuthSucceeded);
            }
            WpaEvent::Failure(reason) => {
                self.pending = None;
                out.push(StackEvent::AuthFailure { reason });
            }
            WpaEvent::Other(line) => out.push(StackEvent::Other(line)),
            WpaEvent::Unrelated => {}
        }

        out
    }

    /// Finish a pending configuration object
    pub fn flush(&mut self) -> Option<StackEvent> {
        self.pending
            .take()
            .map(|pending| StackEvent::ConfigReceived(pending.into_credential()))
    }
}
