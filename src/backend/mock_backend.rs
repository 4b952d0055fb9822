//! Mock DPP stack for testing

use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{Mutex, broadcast};

use crate::backend::{DppStack, EventReceiver};
use crate::core::{
    bootstrap::BootstrapRequest,
    error::{StackError, StackResult},
    event::StackEvent,
    types::NetworkCredential,
};

/// URI handed out by the mock unless configured otherwise
pub const MOCK_URI: &str = "DPP:C:81/6;M:020000000001;V:2;K:MDkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDIgAC;;";

/// Operation invoked on the mock stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    Init,
    GenerateBootstrap {
        channels: String,
        method: &'static str,
        key: Option<String>,
        info: Option<String>,
    },
    Start,
    StartListen,
    Deinit,
    SetNetworkConfig { ssid: String },
    Connect,
    PersistNetworkConfig,
}

/// Internal state for the mock stack
#[derive(Debug)]
struct MockState {
    calls: Vec<StackCall>,
    uri: Option<String>,
    should_fail_init: bool,
    should_fail_bootstrap: bool,
    should_fail_start: bool,
    should_fail_listen: bool,
    should_fail_set_config: bool,
    should_fail_connect: bool,
    listen_script: VecDeque<Vec<StackEvent>>,
    connect_script: VecDeque<Vec<StackEvent>>,
    applied: Option<NetworkCredential>,
}

/// Mock DPP stack for testing
///
/// Records every call and emits scripted events: each `start_listen` and
/// each `connect` call pops the next batch of its script and emits it.
#[derive(Debug, Clone)]
pub struct MockDppStack {
    inner: Arc<Mutex<MockState>>,
    events: broadcast::Sender<StackEvent>,
}

impl MockDppStack {
    /// Create a new mock stack with default state
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(MockState {
                calls: vec![],
                uri: Some(MOCK_URI.to_string()),
                should_fail_init: false,
                should_fail_bootstrap: false,
                should_fail_start: false,
                should_fail_listen: false,
                should_fail_set_config: false,
                should_fail_connect: false,
                listen_script: VecDeque::new(),
                connect_script: VecDeque::new(),
                applied: None,
            })),
            events,
        }
    }

    /// Configure the URI emitted after bootstrap generation
    pub async fn set_uri(&self, uri: Option<&str>) {
        self.inner.lock().await.uri = uri.map(str::to_string);
    }

    /// Configure mock to fail stack bring-up
    pub async fn set_init_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_init = should_fail;
    }

    /// Configure mock to fail bootstrap generation
    pub async fn set_bootstrap_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_bootstrap = should_fail;
    }

    /// Configure mock to fail station start
    pub async fn set_start_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_start = should_fail;
    }

    /// Configure mock to fail DPP listen requests
    pub async fn set_listen_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_listen = should_fail;
    }

    /// Configure mock to reject network configurations
    pub async fn set_config_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_set_config = should_fail;
    }

    /// Configure mock to fail association requests
    pub async fn set_connect_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_connect = should_fail;
    }

    /// Queue events emitted in response to the next unscripted `start_listen`
    pub async fn script_listen(&self, events: Vec<StackEvent>) {
        self.inner.lock().await.listen_script.push_back(events);
    }

    /// Queue events emitted in response to the next unscripted `connect`
    pub async fn script_connect(&self, events: Vec<StackEvent>) {
        self.inner.lock().await.connect_script.push_back(events);
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: StackEvent) {
        let _ = self.events.send(event);
    }

    /// All calls made so far
    pub async fn calls(&self) -> Vec<StackCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Number of recorded calls equal to `call`
    pub async fn count(&self, call: &StackCall) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Last applied network credential
    pub async fn applied(&self) -> Option<NetworkCredential> {
        self.inner.lock().await.applied.clone()
    }

    /// Number of active event subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn emit_all(&self, events: Vec<StackEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Default for MockDppStack {
    fn default() -> Self {
        Self::new()
    }
}

impl DppStack for MockDppStack {
    async fn init(&self) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::Init);
        if state.should_fail_init {
            Err(StackError::Unavailable("Mock init failure".into()))
        } else {
            Ok(())
        }
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    async fn generate_bootstrap(&self, request: BootstrapRequest<'_>) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::GenerateBootstrap {
            channels: request.channels.to_bootstrap_notation(),
            method: request.method.as_str(),
            key: request.key.map(|key| key.as_hex().to_string()),
            info: request.info.map(str::to_string),
        });
        if state.should_fail_bootstrap {
            return Err(StackError::BootstrapFailed("Mock bootstrap failure".into()));
        }
        self.emit(StackEvent::UriReady(state.uri.clone()));
        Ok(())
    }

    async fn start(&self) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::Start);
        if state.should_fail_start {
            return Err(StackError::Unavailable("Mock start failure".into()));
        }
        self.emit(StackEvent::StationStarted);
        Ok(())
    }

    async fn start_listen(&self) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::StartListen);
        if state.should_fail_listen {
            return Err(StackError::ListenFailed("Mock listen failure".into()));
        }
        if let Some(events) = state.listen_script.pop_front() {
            self.emit_all(events);
        }
        Ok(())
    }

    async fn deinit(&self) -> StackResult<()> {
        self.inner.lock().await.calls.push(StackCall::Deinit);
        Ok(())
    }

    async fn set_network_config(&self, credential: &NetworkCredential) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::SetNetworkConfig {
            ssid: credential.ssid.clone(),
        });
        if state.should_fail_set_config {
            return Err(StackError::ConfigRejected("Mock config failure".into()));
        }
        state.applied = Some(credential.clone());
        Ok(())
    }

    async fn connect(&self) -> StackResult<()> {
        let mut state = self.inner.lock().await;
        state.calls.push(StackCall::Connect);
        if state.should_fail_connect {
            return Err(StackError::ConnectFailed("Mock connect failure".into()));
        }
        if let Some(events) = state.connect_script.pop_front() {
            self.emit_all(events);
        }
        Ok(())
    }

    async fn persist_network_config(&self) -> StackResult<()> {
        self.inner
            .lock()
            .await
            .calls
            .push(StackCall::PersistNetworkConfig);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        bootstrap::BootstrapMethod,
        event::DisconnectReason,
        types::{ChannelList, NetworkSecret},
    };

    #[tokio::test]
    async fn test_mock_emits_uri_and_start() {
        let stack = MockDppStack::new();
        let mut events = stack.subscribe();
        let channels = ChannelList::default();

        stack
            .generate_bootstrap(BootstrapRequest {
                channels: &channels,
                method: BootstrapMethod::QrCode,
                key: None,
                info: Some("device"),
            })
            .await
            .unwrap();
        stack.start().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StackEvent::UriReady(Some(MOCK_URI.to_string()))
        );
        assert_eq!(events.recv().await.unwrap(), StackEvent::StationStarted);

        let calls = stack.calls().await;
        assert_eq!(
            calls[0],
            StackCall::GenerateBootstrap {
                channels: "81/6".into(),
                method: "qrcode",
                key: None,
                info: Some("device".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_mock_scripts() {
        let stack = MockDppStack::new();
        let mut events = stack.subscribe();

        stack
            .script_listen(vec![StackEvent::AuthFailure {
                reason: "timeout".into(),
            }])
            .await;
        stack
            .script_connect(vec![StackEvent::Disconnected {
                reason: DisconnectReason::Unspecified,
            }])
            .await;

        stack.start_listen().await.unwrap();
        stack.connect().await.unwrap();
        // Scripts are consumed
        stack.start_listen().await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            StackEvent::AuthFailure { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            StackEvent::Disconnected { .. }
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(stack.count(&StackCall::StartListen).await, 2);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let stack = MockDppStack::new();
        stack.set_listen_failure(true).await;
        stack.set_config_failure(true).await;

        assert!(stack.start_listen().await.is_err());
        let credential = NetworkCredential::new("Net", NetworkSecret::Open);
        assert!(stack.set_network_config(&credential).await.is_err());
        assert!(stack.applied().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_subscriptions() {
        let stack = MockDppStack::new();
        assert_eq!(stack.subscriber_count(), 0);

        let events = stack.subscribe();
        assert_eq!(stack.subscriber_count(), 1);

        drop(events);
        assert_eq!(stack.subscriber_count(), 0);
    }
}
