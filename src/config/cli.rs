//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Clone)]
#[clap(name = "wifi-dpp-enrollee", version, author)]
#[clap(about = "Provision WiFi credentials through DPP (Wi-Fi Easy Connect)")]
pub struct CliArgs {
    /// Wireless network interface name
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Directory holding the wpa_supplicant control sockets
    #[clap(long, default_value = "/var/run/wpa_supplicant")]
    pub ctrl_dir: String,

    /// Comma separated DPP listen channels; the first one is listened on
    #[clap(short, long, default_value = "6")]
    pub channels: String,

    /// Raw P-256 bootstrapping private key (64 hex digits)
    #[clap(long, env = "DPP_BOOTSTRAP_KEY", hide_env_values = true)]
    pub bootstrap_key: Option<String>,

    /// Device information embedded in the bootstrapping URI
    #[clap(long, env = "DPP_DEVICE_INFO")]
    pub device_info: Option<String>,

    /// DPP handshake retries before giving up
    #[clap(long, default_value = "10")]
    pub max_auth_retries: u32,

    /// Association retries before giving up
    #[clap(long, default_value = "10")]
    pub max_connect_retries: u32,

    /// Delay before re-listening after a failed handshake (milliseconds)
    #[clap(long, default_value = "1000")]
    pub auth_retry_backoff_ms: u64,

    /// Abort the session after this many seconds
    #[clap(long)]
    pub session_timeout_secs: Option<u64>,

    /// Persist the received network in the wpa_supplicant configuration
    #[clap(long)]
    pub save_config: bool,

    /// Do not render the bootstrapping URI as a QR code
    #[clap(long)]
    pub no_qr: bool,

    /// Print a JSON session report on stdout
    #[clap(long)]
    pub json: bool,
}

impl std::fmt::Debug for CliArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliArgs")
            .field("interface", &self.interface)
            .field("ctrl_dir", &self.ctrl_dir)
            .field("channels", &self.channels)
            .field("bootstrap_key", &self.bootstrap_key.as_ref().map(|_| "<redacted>"))
            .field("device_info", &self.device_info)
            .field("max_auth_retries", &self.max_auth_retries)
            .field("max_connect_retries", &self.max_connect_retries)
            .field("auth_retry_backoff_ms", &self.auth_retry_backoff_ms)
            .field("session_timeout_secs", &self.session_timeout_secs)
            .field("save_config", &self.save_config)
            .field("no_qr", &self.no_qr)
            .field("json", &self.json)
            .finish()
    }
}
