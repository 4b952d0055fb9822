//! Bootstrapping key preparation
//!
//! A configured private key is wrapped into the DER encoded SEC1
//! `ECPrivateKey` structure expected by DPP bootstrap generation:
//!
//! ```text
//! 30 31                     SEQUENCE
//!    02 01 01               INTEGER version 1
//!    04 20 <32 byte key>    OCTET STRING privateKey
//!    a0 0a 06 08 <oid>      [0] parameters: prime256v1
//! ```
//!
//! Only NIST P-256 is supported. Supporting another curve needs a new
//! prefix/suffix pair and its own length branch in [`Curve`].

use std::fmt;

use tracing::{debug, info, warn};

use crate::core::{error::BootstrapError, types::ChannelList};

/// Hex digits of a P-256 private key (32 bytes)
pub const P256_PRIVATE_KEY_HEX_DIGITS: usize = 64;

const P256_PRIVATE_KEY_BYTES: usize = P256_PRIVATE_KEY_HEX_DIGITS / 2;
const P256_DER_PREFIX: &str = "30310201010420";
const P256_DER_SUFFIX: &str = "a00a06082a8648ce3d030107";

/// Elliptic curve of the bootstrapping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    P256,
}

impl Curve {
    /// Number of hex digits a raw private key must have
    pub const fn private_key_hex_digits(&self) -> usize {
        match self {
            Curve::P256 => P256_PRIVATE_KEY_HEX_DIGITS,
        }
    }

    const fn der_prefix(&self) -> &'static str {
        match self {
            Curve::P256 => P256_DER_PREFIX,
        }
    }

    const fn der_suffix(&self) -> &'static str {
        match self {
            Curve::P256 => P256_DER_SUFFIX,
        }
    }
}

/// Wire encoded (hex DER) bootstrapping private key
///
/// Lives only for the duration of one bootstrap generation call.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapKey(String);

impl BootstrapKey {
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BootstrapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BootstrapKey(<redacted>)")
    }
}

/// Bootstrapping method; only QR codes are supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapMethod {
    #[default]
    QrCode,
}

impl BootstrapMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapMethod::QrCode => "qrcode",
        }
    }
}

/// Parameters of a bootstrap generation request
#[derive(Debug, Clone, Copy)]
pub struct BootstrapRequest<'a> {
    pub channels: &'a ChannelList,
    pub method: BootstrapMethod,
    pub key: Option<&'a BootstrapKey>,
    pub info: Option<&'a str>,
}

/// Validates a raw private key and wraps it for bootstrap generation
#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapKeyFormatter {
    curve: Curve,
}

impl BootstrapKeyFormatter {
    pub fn new(curve: Curve) -> Self {
        Self { curve }
    }

    /// Format an optional hex encoded private key
    ///
    /// Returns `Ok(None)` when no key (or an empty key) is configured, in
    /// which case the stack generates an ephemeral key. A key of the wrong
    /// length or with non-hex digits is a configuration error.
    pub fn format(&self, raw: Option<&str>) -> Result<Option<BootstrapKey>, BootstrapError> {
        let Some(raw) = raw.filter(|key| !key.is_empty()) else {
            warn!("No bootstrapping key configured, QR code will be random each time");
            return Ok(None);
        };

        let expected = self.curve.private_key_hex_digits();
        info!("Using configured bootstrapping key, length: {}", raw.len());
        if raw.len() != expected {
            return Err(BootstrapError::InvalidKeyLength {
                expected,
                actual: raw.len(),
            });
        }

        let mut scratch = [0u8; P256_PRIVATE_KEY_BYTES];
        let decoded = hex::decode_to_slice(raw, &mut scratch);
        scratch.fill(0);
        decoded.map_err(|e| BootstrapError::InvalidKeyEncoding(e.to_string()))?;

        let prefix = self.curve.der_prefix();
        let suffix = self.curve.der_suffix();

        let mut blob = String::new();
        blob.try_reserve_exact(prefix.len() + raw.len() + suffix.len())
            .map_err(|_| BootstrapError::AllocationFailure)?;
        blob.push_str(prefix);
        blob.push_str(raw);
        blob.push_str(suffix);

        debug!("Formatted DER key prepared for DPP bootstrap");
        Ok(Some(BootstrapKey(blob)))
    }
}
