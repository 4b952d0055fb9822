//! Runtime settings

use std::time::Duration;

use crate::{
    config::CliArgs,
    core::{
        error::ConfigError,
        provisioning::DppRetryPolicy,
        session::ProvisioningSettings,
        types::ChannelList,
    },
};

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub interface: String,
    pub ctrl_dir: String,
    pub json_report: bool,
    pub provisioning: ProvisioningSettings,
}

impl TryFrom<CliArgs> for Settings {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.interface.is_empty() || args.interface.contains('/') {
            return Err(ConfigError::InvalidSetting {
                name: "interface",
                reason: format!("{:?} is not an interface name", args.interface),
            });
        }

        let channels: ChannelList = args.channels.parse()?;

        if args.max_auth_retries == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max-auth-retries",
                reason: "must be at least 1".into(),
            });
        }
        if args.max_connect_retries == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max-connect-retries",
                reason: "must be at least 1".into(),
            });
        }

        let session_timeout = match args.session_timeout_secs {
            Some(0) => {
                return Err(ConfigError::InvalidSetting {
                    name: "session-timeout-secs",
                    reason: "must be greater than zero".into(),
                });
            }
            secs => secs.map(Duration::from_secs),
        };

        // Key format is checked when the bootstrap is generated
        let bootstrap_key = args.bootstrap_key.map(|key| key.trim().to_string());
        let device_info = args.device_info.filter(|info| !info.is_empty());

        Ok(Settings {
            interface: args.interface,
            ctrl_dir: args.ctrl_dir,
            json_report: args.json,
            provisioning: ProvisioningSettings {
                channels,
                bootstrap_key,
                device_info,
                dpp_retry: DppRetryPolicy {
                    max_retries: args.max_auth_retries,
                    backoff: Duration::from_millis(args.auth_retry_backoff_ms),
                },
                max_connect_retries: args.max_connect_retries,
                persist_config: args.save_config,
                render_qr: !args.no_qr,
                session_timeout,
            },
        })
    }
}
