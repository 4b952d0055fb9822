//! DPP enrollee state machine
//!
//! ```text
//! Idle ──► ListeningForAuth ──► AwaitingConfig ──► Applying ──► Connecting
//!               ▲    │                                 │
//!               └────┘ auth failure (below ceiling)    └──► AuthFailed
//! ```
//!
//! Failures re-arm the listen after a fixed backoff until the retry ceiling
//! is crossed; from then on the handler is terminal and ignores all events.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    backend::DppStack,
    core::{
        presenter::UriPresenter,
        signal::OutcomeSignal,
        types::{NetworkCredential, ProvisioningState, TerminalSignal},
    },
};

/// Retry budget of the DPP handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DppRetryPolicy {
    /// Re-arms allowed before giving up
    pub max_retries: u32,
    /// Fixed delay before re-arming the listen
    pub backoff: Duration,
}

impl Default for DppRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Consumes DPP events and drives the enrollee state machine
pub struct ProvisioningEventHandler<S: DppStack> {
    stack: Arc<S>,
    presenter: UriPresenter,
    policy: DppRetryPolicy,
    state: ProvisioningState,
    retries: u32,
    listening: bool,
    uri_presented: bool,
}

impl<S: DppStack> ProvisioningEventHandler<S> {
    pub fn new(stack: Arc<S>, presenter: UriPresenter, policy: DppRetryPolicy) -> Self {
        Self {
            stack,
            presenter,
            policy,
            state: ProvisioningState::Idle,
            retries: 0,
            listening: false,
            uri_presented: false,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Number of times the listen was re-armed after a failure
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn is_terminal(&self) -> bool {
        self.state == ProvisioningState::AuthFailed
    }

    fn fail(&mut self, signal: &mut OutcomeSignal) {
        self.state = ProvisioningState::AuthFailed;
        self.listening = false;
        signal.raise(TerminalSignal::AuthenticationFailed);
    }

    /// Station is up: arm the DPP listen
    pub async fn on_station_started(&mut self, signal: &mut OutcomeSignal) {
        if self.is_terminal() {
            return;
        }
        if self.listening {
            debug!("DPP listen already armed");
            return;
        }

        match self.stack.start_listen().await {
            Ok(()) => {
                info!("Started listening for DPP Authentication");
                self.listening = true;
                if self.state == ProvisioningState::Idle {
                    self.state = ProvisioningState::ListeningForAuth;
                }
            }
            Err(e) => {
                error!("Failed to start DPP listen: {}", e);
                self.fail(signal);
            }
        }
    }

    /// Bootstrapping URI is available: present it once per bootstrap cycle
    pub fn on_uri_ready(&mut self, uri: Option<&str>) {
        match self.state {
            ProvisioningState::Idle | ProvisioningState::ListeningForAuth => {
                if self.uri_presented {
                    debug!("DPP URI already presented for this bootstrap");
                } else {
                    self.presenter.present(uri);
                    self.uri_presented = true;
                }
                self.state = ProvisioningState::ListeningForAuth;
            }
            state => warn!(?state, "Ignoring DPP URI"),
        }
    }

    /// Authentication completed, configuration exchange follows
    pub fn on_auth_succeeded(&mut self) {
        if self.state == ProvisioningState::ListeningForAuth {
            info!("DPP authentication succeeded, awaiting configuration");
            self.state = ProvisioningState::AwaitingConfig;
        } else {
            debug!(state = ?self.state, "Ignoring DPP authentication success");
        }
    }

    /// Configuration received; returns the credential to associate with
    pub async fn on_config_received(
        &mut self,
        payload: Option<NetworkCredential>,
        signal: &mut OutcomeSignal,
    ) -> Option<NetworkCredential> {
        if self.is_terminal() {
            return None;
        }

        let Some(credential) = payload else {
            error!("DPP configuration data is NULL");
            self.fail(signal);
            return None;
        };

        match self.state {
            ProvisioningState::ListeningForAuth | ProvisioningState::AwaitingConfig => {}
            state => {
                warn!(?state, ssid = %credential.ssid, "Ignoring unexpected DPP configuration");
                return None;
            }
        }

        self.state = ProvisioningState::Applying;
        self.listening = false;

        if let Err(e) = self.stack.set_network_config(&credential).await {
            error!("Failed to set WiFi config: {}", e);
            self.fail(signal);
            return None;
        }

        info!(ssid = %credential.ssid, "DPP Authentication successful, connecting to AP");
        self.state = ProvisioningState::Connecting;
        Some(credential)
    }

    /// Authentication or configuration failed: re-arm or give up
    pub async fn on_auth_failure(&mut self, reason: &str, signal: &mut OutcomeSignal) {
        if self.is_terminal() {
            return;
        }

        error!(%reason, retry = self.retries, "DPP Auth failed");
        self.listening = false;

        if self.retries >= self.policy.max_retries {
            error!(
                "DPP Authentication failed after {} retries, giving up",
                self.retries
            );
            self.fail(signal);
            return;
        }

        tokio::time::sleep(self.policy.backoff).await;

        match self.stack.start_listen().await {
            Ok(()) => {
                self.retries += 1;
                self.listening = true;
                self.state = ProvisioningState::ListeningForAuth;
                info!(
                    retry = self.retries,
                    max = self.policy.max_retries,
                    "Re-armed DPP listen"
                );
            }
            Err(e) => {
                error!("Failed to start DPP listen: {}", e);
                self.fail(signal);
            }
        }
    }
}
