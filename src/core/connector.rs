//! WiFi association supervisor with state machine

use std::{net::IpAddr, sync::Arc};

use tracing::{debug, error, info, warn};

use crate::{
    backend::DppStack,
    core::{
        event::DisconnectReason,
        signal::OutcomeSignal,
        types::{ConnectionState, NetworkCredential, TerminalSignal},
    },
};

/// Connection state machine
#[derive(Debug)]
struct ConnectionStateMachine {
    state: ConnectionState,
    ssid: Option<String>,
    ip_address: Option<IpAddr>,
    error: Option<String>,
}

impl ConnectionStateMachine {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            ssid: None,
            ip_address: None,
            error: None,
        }
    }

    /// Start association with a (new) network
    fn start_connect(&mut self, ssid: String) {
        self.state = ConnectionState::Associating;
        self.ssid = Some(ssid);
        self.ip_address = None;
        self.error = None;
    }

    /// Mark association as successful
    fn complete_connect(&mut self, ip_address: IpAddr) {
        self.state = ConnectionState::Connected;
        self.ip_address = Some(ip_address);
        self.error = None;
    }

    /// Mark association as failed for good
    fn fail_connect(&mut self, error: String) {
        self.state = ConnectionState::Failed;
        self.error = Some(error);
        self.ip_address = None;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Supervises association with the delivered network
///
/// Owns the network credential once delivered. Transient disconnects are
/// retried silently; exhausting the attempt budget raises
/// [`TerminalSignal::ConnectionFailed`].
pub struct ConnectionSupervisor<S: DppStack> {
    stack: Arc<S>,
    max_retries: u32,
    persist: bool,
    credential: Option<NetworkCredential>,
    attempts: u32,
    total_retries: u32,
    state_machine: ConnectionStateMachine,
}

impl<S: DppStack> ConnectionSupervisor<S> {
    /// Create a new supervisor
    ///
    /// With `persist` set, the stack is asked to save its network
    /// configuration once an address was acquired.
    pub fn new(stack: Arc<S>, max_retries: u32, persist: bool) -> Self {
        Self {
            stack,
            max_retries,
            persist,
            credential: None,
            attempts: 0,
            total_retries: 0,
            state_machine: ConnectionStateMachine::new(),
        }
    }

    /// Supervisor starting with a credential from an earlier session
    pub fn with_credential(mut self, credential: NetworkCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state_machine.state()
    }

    /// Attempts since the last successful association
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// All retries made by this supervisor
    pub fn total_retries(&self) -> u32 {
        self.total_retries
    }

    pub fn credential(&self) -> Option<&NetworkCredential> {
        self.credential.as_ref()
    }

    pub fn into_credential(self) -> Option<NetworkCredential> {
        self.credential
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        self.state_machine.ip_address
    }

    /// SSID of the network being (or last) associated with
    pub fn ssid(&self) -> Option<&str> {
        self.state_machine.ssid.as_deref()
    }

    /// Reason of the final association failure
    pub fn last_error(&self) -> Option<&str> {
        self.state_machine.error.as_deref()
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Take ownership of a freshly delivered credential and associate
    pub async fn associate(&mut self, credential: NetworkCredential, signal: &mut OutcomeSignal) {
        info!(ssid = %credential.ssid, "Associating with delivered network");
        self.state_machine.start_connect(credential.ssid.clone());
        self.credential = Some(credential);
        self.attempts = 0;
        self.request_association(signal).await;
    }

    /// Station is up and a credential is already known: reconnect with it
    pub async fn on_station_started(&mut self, signal: &mut OutcomeSignal) {
        let Some(credential) = self.credential.as_ref() else {
            debug!("No known network, nothing to reconnect");
            return;
        };

        info!(ssid = %credential.ssid, "Reconnecting with known network");
        if let Err(e) = self.stack.set_network_config(credential).await {
            error!("Failed to set WiFi config: {}", e);
            self.state_machine.fail_connect(e.to_string());
            signal.raise(TerminalSignal::ConnectionFailed);
            return;
        }

        let ssid = credential.ssid.clone();
        self.state_machine.start_connect(ssid);
        self.attempts = 0;
        self.request_association(signal).await;
    }

    /// Association lost or failed
    pub async fn on_disconnected(&mut self, reason: DisconnectReason, signal: &mut OutcomeSignal) {
        if self.state() != ConnectionState::Associating {
            debug!(%reason, state = ?self.state(), "Ignoring disconnect");
            return;
        }

        info!(%reason, attempt = self.attempts, "connect to the AP fail");
        self.retry_or_fail(reason.to_string(), signal).await;
    }

    /// Address assigned: association confirmed
    pub async fn on_address_acquired(&mut self, address: IpAddr, signal: &mut OutcomeSignal) {
        info!("got ip: {}", address);
        self.attempts = 0;
        self.state_machine.complete_connect(address);

        if self.persist && self.credential.is_some() {
            match self.stack.persist_network_config().await {
                Ok(()) => debug!("Network configuration saved"),
                Err(e) => warn!("Failed to save network configuration: {}", e),
            }
        }

        signal.raise(TerminalSignal::Connected);
    }

    async fn retry_or_fail(&mut self, error: String, signal: &mut OutcomeSignal) {
        let mut error = error;
        loop {
            if self.attempts >= self.max_retries {
                error!(
                    attempts = self.attempts,
                    "Failed to connect to the AP, giving up"
                );
                self.state_machine.fail_connect(error);
                signal.raise(TerminalSignal::ConnectionFailed);
                return;
            }

            self.attempts += 1;
            self.total_retries += 1;
            info!(
                attempt = self.attempts,
                max = self.max_retries,
                "retry to connect to the AP"
            );

            match self.stack.connect().await {
                Ok(()) => return,
                Err(e) => {
                    warn!("Failed to request association: {}", e);
                    error = e.to_string();
                }
            }
        }
    }

    async fn request_association(&mut self, signal: &mut OutcomeSignal) {
        if let Err(e) = self.stack.connect().await {
            warn!("Failed to request association: {}", e);
            self.retry_or_fail(e.to_string(), signal).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MockDppStack, mock_backend::StackCall},
        core::types::NetworkSecret,
    };

    fn credential() -> NetworkCredential {
        NetworkCredential::new("HomeNet", NetworkSecret::Psk([7u8; 32]))
    }

    fn disconnected() -> DisconnectReason {
        DisconnectReason::Code(3)
    }

    #[test]
    fn test_connection_state_machine_transitions() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Idle);

        sm.start_connect("TestNet".to_string());
        assert_eq!(sm.state(), ConnectionState::Associating);

        sm.complete_connect("192.168.1.100".parse().unwrap());
        assert_eq!(sm.state(), ConnectionState::Connected);
        assert_eq!(sm.ip_address, Some("192.168.1.100".parse().unwrap()));
    }

    #[test]
    fn test_connection_state_machine_failure() {
        let mut sm = ConnectionStateMachine::new();
        sm.start_connect("TestNet".to_string());
        sm.fail_connect("reason code 15".to_string());

        assert_eq!(sm.state(), ConnectionState::Failed);
        assert_eq!(sm.ip_address, None);
        assert_eq!(sm.error.as_deref(), Some("reason code 15"));

        // A new delivery starts over
        sm.start_connect("TestNet".to_string());
        assert_eq!(sm.state(), ConnectionState::Associating);
        assert!(sm.error.is_none());
    }

    #[tokio::test]
    async fn test_associate_requests_connection() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, false);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;

        assert_eq!(supervisor.state(), ConnectionState::Associating);
        assert_eq!(supervisor.credential(), Some(&credential()));
        assert_eq!(stack.count(&StackCall::Connect).await, 1);
        assert!(!signal.is_raised());
    }

    #[tokio::test]
    async fn test_disconnects_within_budget_retry_silently() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, false);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;
        for n in 1..=10 {
            supervisor.on_disconnected(disconnected(), &mut signal).await;
            assert_eq!(supervisor.attempts(), n);
            assert!(!signal.is_raised());
        }

        assert_eq!(stack.count(&StackCall::Connect).await, 11);
    }

    #[tokio::test]
    async fn test_disconnect_ceiling_fails_once() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, false);
        let (mut signal, receiver) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;
        for _ in 0..11 {
            supervisor.on_disconnected(disconnected(), &mut signal).await;
        }

        assert_eq!(supervisor.state(), ConnectionState::Failed);
        assert_eq!(receiver.await.unwrap(), TerminalSignal::ConnectionFailed);
        assert_eq!(stack.count(&StackCall::Connect).await, 11);

        // Failed supervisor ignores further disconnects
        supervisor.on_disconnected(disconnected(), &mut signal).await;
        assert_eq!(stack.count(&StackCall::Connect).await, 11);
    }

    #[tokio::test]
    async fn test_address_resets_attempts() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, false);
        let (mut signal, receiver) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;
        for _ in 0..3 {
            supervisor.on_disconnected(disconnected(), &mut signal).await;
        }
        assert_eq!(supervisor.attempts(), 3);

        supervisor
            .on_address_acquired("10.0.0.23".parse().unwrap(), &mut signal)
            .await;

        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(supervisor.total_retries(), 3);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(supervisor.ip_address(), Some("10.0.0.23".parse().unwrap()));
        assert_eq!(receiver.await.unwrap(), TerminalSignal::Connected);
        assert_eq!(stack.count(&StackCall::PersistNetworkConfig).await, 0);
    }

    #[tokio::test]
    async fn test_address_persists_configuration() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, true);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;
        supervisor
            .on_address_acquired("10.0.0.23".parse().unwrap(), &mut signal)
            .await;

        assert_eq!(stack.count(&StackCall::PersistNetworkConfig).await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_credential_is_ignored() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 10, false);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.on_disconnected(disconnected(), &mut signal).await;

        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(stack.count(&StackCall::Connect).await, 0);
        assert!(!signal.is_raised());
    }

    #[tokio::test]
    async fn test_connect_errors_consume_budget() {
        let stack = Arc::new(MockDppStack::new());
        stack.set_connect_failure(true).await;
        let mut supervisor = ConnectionSupervisor::new(stack.clone(), 3, false);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;

        assert_eq!(signal.raised(), Some(TerminalSignal::ConnectionFailed));
        assert_eq!(supervisor.state(), ConnectionState::Failed);
        // Initial request plus three retries
        assert_eq!(stack.count(&StackCall::Connect).await, 4);
    }

    #[tokio::test]
    async fn test_new_delivery_overwrites_credential() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor = ConnectionSupervisor::new(stack, 10, false);
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.associate(credential(), &mut signal).await;
        supervisor.on_disconnected(disconnected(), &mut signal).await;

        let other = NetworkCredential::new("OtherNet", NetworkSecret::Open);
        supervisor.associate(other.clone(), &mut signal).await;

        assert_eq!(supervisor.credential(), Some(&other));
        assert_eq!(supervisor.attempts(), 0);
    }

    #[tokio::test]
    async fn test_station_started_reconnects_known_network() {
        let stack = Arc::new(MockDppStack::new());
        let mut supervisor =
            ConnectionSupervisor::new(stack.clone(), 10, false).with_credential(credential());
        let (mut signal, _rx) = OutcomeSignal::channel();

        supervisor.on_station_started(&mut signal).await;

        assert_eq!(supervisor.state(), ConnectionState::Associating);
        assert_eq!(stack.applied().await, Some(credential()));
        assert_eq!(stack.count(&StackCall::Connect).await, 1);
    }
}
