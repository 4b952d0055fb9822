//! DPP provisioning session orchestrator

use std::{fmt, sync::Arc, time::Duration, time::Instant};

use tokio::sync::broadcast::error::RecvError;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::{
    backend::{DppStack, EventReceiver},
    core::{
        bootstrap::{BootstrapKeyFormatter, BootstrapMethod, BootstrapRequest, Curve},
        connector::ConnectionSupervisor,
        error::{BootstrapError, ServiceError, ServiceResult},
        event::StackEvent,
        presenter::UriPresenter,
        provisioning::{DppRetryPolicy, ProvisioningEventHandler},
        signal::{OutcomeReceiver, OutcomeSignal},
        types::{
            ChannelList, NetworkCredential, Outcome, SessionId, SessionReport, TerminalSignal,
        },
    },
};

/// Parameters of a provisioning session
#[derive(Clone)]
pub struct ProvisioningSettings {
    /// DPP listen channels
    pub channels: ChannelList,
    /// Optional raw bootstrapping private key (hex)
    pub bootstrap_key: Option<String>,
    /// Optional device information embedded in the URI
    pub device_info: Option<String>,
    /// DPP handshake retry budget
    pub dpp_retry: DppRetryPolicy,
    /// Association retry budget
    pub max_connect_retries: u32,
    /// Persist the network configuration after a successful association
    pub persist_config: bool,
    /// Render the URI as a QR code
    pub render_qr: bool,
    /// Defensive upper bound for the whole session
    pub session_timeout: Option<Duration>,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            channels: ChannelList::default(),
            bootstrap_key: None,
            device_info: None,
            dpp_retry: DppRetryPolicy::default(),
            max_connect_retries: 10,
            persist_config: false,
            render_qr: true,
            session_timeout: None,
        }
    }
}

impl fmt::Debug for ProvisioningSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningSettings")
            .field("channels", &self.channels)
            .field("bootstrap_key", &self.bootstrap_key.as_ref().map(|_| "<redacted>"))
            .field("device_info", &self.device_info)
            .field("dpp_retry", &self.dpp_retry)
            .field("max_connect_retries", &self.max_connect_retries)
            .field("persist_config", &self.persist_config)
            .field("render_qr", &self.render_qr)
            .field("session_timeout", &self.session_timeout)
            .finish()
    }
}

/// Result of a finished session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub report: SessionReport,
    /// Credential delivered (or reused) during the session, kept for reconnects
    pub credential: Option<NetworkCredential>,
}

impl SessionSummary {
    pub fn outcome(&self) -> Outcome {
        self.report.outcome
    }
}

/// Routes stack events to the state machines, one event at a time
struct EventRouter<S: DppStack> {
    handler: ProvisioningEventHandler<S>,
    supervisor: ConnectionSupervisor<S>,
    signal: OutcomeSignal,
}

impl<S: DppStack> EventRouter<S> {
    async fn dispatch(&mut self, event: StackEvent) {
        match event {
            StackEvent::StationStarted => {
                if self.supervisor.has_credential() {
                    self.supervisor.on_station_started(&mut self.signal).await;
                } else {
                    self.handler.on_station_started(&mut self.signal).await;
                }
            }
            StackEvent::UriReady(uri) => self.handler.on_uri_ready(uri.as_deref()),
            StackEvent::AuthSucceeded => self.handler.on_auth_succeeded(),
            StackEvent::ConfigReceived(payload) => {
                if let Some(credential) = self
                    .handler
                    .on_config_received(payload, &mut self.signal)
                    .await
                {
                    self.supervisor
                        .associate(credential, &mut self.signal)
                        .await;
                }
            }
            StackEvent::AuthFailure { reason } => {
                self.handler
                    .on_auth_failure(&reason, &mut self.signal)
                    .await
            }
            StackEvent::Disconnected { reason } => {
                self.supervisor
                    .on_disconnected(reason, &mut self.signal)
                    .await
            }
            StackEvent::AddressAcquired(address) => {
                self.supervisor
                    .on_address_acquired(address, &mut self.signal)
                    .await
            }
            StackEvent::Other(event) => debug!("Unhandled DPP event: {}", event),
        }
    }

    /// Consume events until a terminal signal was raised or the stream ends
    async fn run(mut self, mut events: EventReceiver) -> Self {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(?event, "Stack event");
                    self.dispatch(event).await;
                    if self.signal.is_raised() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Event receiver lagged, {} events lost", missed);
                }
                Err(RecvError::Closed) => {
                    warn!("Stack event stream closed");
                    break;
                }
            }
        }

        // Unregister before the session starts tearing down
        drop(events);
        self.signal.close();
        self
    }
}

/// One DPP provisioning run
///
/// Drives the stack from bootstrap generation until exactly one terminal
/// outcome was observed, then releases all DPP state.
pub struct ProvisioningSession<S: DppStack> {
    id: SessionId,
    stack: Arc<S>,
    settings: ProvisioningSettings,
    presenter: UriPresenter,
    known_credential: Option<NetworkCredential>,
}

impl<S: DppStack> ProvisioningSession<S> {
    /// Create a new session presenting the URI on stdout
    pub fn new(stack: Arc<S>, settings: ProvisioningSettings) -> Self {
        let presenter = UriPresenter::stdout(settings.render_qr);
        Self {
            id: SessionId::new(),
            stack,
            settings,
            presenter,
            known_credential: None,
        }
    }

    /// Present the URI through a custom presenter
    pub fn with_presenter(mut self, presenter: UriPresenter) -> Self {
        self.presenter = presenter;
        self
    }

    /// Reconnect with a credential from an earlier session instead of
    /// running DPP
    pub fn with_known_credential(mut self, credential: NetworkCredential) -> Self {
        self.known_credential = Some(credential);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the session to completion
    ///
    /// Only a failing stack bring-up is reported as `Err`; every other
    /// result is one of the [`Outcome`] values in the summary.
    pub async fn run(self) -> ServiceResult<SessionSummary> {
        let span = info_span!("provisioning", session = %self.id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> ServiceResult<SessionSummary> {
        let started = Instant::now();
        let ProvisioningSession {
            id,
            stack,
            settings,
            presenter,
            known_credential,
        } = self;

        stack.init().await.map_err(ServiceError::BringUp)?;
        let events = stack.subscribe();
        let (signal, receiver) = OutcomeSignal::channel();

        let handler = ProvisioningEventHandler::new(stack.clone(), presenter, settings.dpp_retry);
        let mut supervisor = ConnectionSupervisor::new(
            stack.clone(),
            settings.max_connect_retries,
            settings.persist_config,
        );
        if let Some(credential) = known_credential {
            supervisor = supervisor.with_credential(credential);
        }
        let mut router = EventRouter {
            handler,
            supervisor,
            signal,
        };

        if !router.supervisor.has_credential() {
            if let Err(e) = Self::bootstrap(&stack, &settings).await {
                if e.is_configuration_error() {
                    error!("Invalid bootstrapping key configuration: {}", e);
                } else {
                    error!("Failed to bootstrap DPP: {}", e);
                }
                router.signal.raise(TerminalSignal::AuthenticationFailed);
                drop(events);
                Self::teardown(&stack).await;
                let outcome = Outcome::AuthenticationFailed;
                return Ok(Self::summarize(id, Some(router), outcome, started));
            }
        }

        if let Err(e) = stack.start().await {
            error!("Failed to start station: {}", e);
            drop(events);
            Self::teardown(&stack).await;
            return Err(ServiceError::BringUp(e));
        }

        let router_task = tokio::spawn(router.run(events).instrument(Span::current()));

        let outcome = match Self::wait(receiver, settings.session_timeout).await {
            Some(signal) => Outcome::from(signal),
            None => {
                router_task.abort();
                Outcome::UnexpectedState
            }
        };

        let router = match router_task.await {
            Ok(router) => Some(router),
            Err(e) => {
                if !e.is_cancelled() {
                    error!("Event router failed: {}", e);
                }
                None
            }
        };

        Self::teardown(&stack).await;
        Ok(Self::summarize(id, router, outcome, started))
    }

    /// Format the bootstrapping key and generate the bootstrap
    async fn bootstrap(stack: &S, settings: &ProvisioningSettings) -> Result<(), BootstrapError> {
        info!(
            channels = %settings.channels,
            key_configured = settings.bootstrap_key.is_some(),
            "DPP bootstrap configuration check"
        );

        let formatter = BootstrapKeyFormatter::new(Curve::P256);
        let key = formatter.format(settings.bootstrap_key.as_deref())?;

        stack
            .generate_bootstrap(BootstrapRequest {
                channels: &settings.channels,
                method: BootstrapMethod::QrCode,
                key: key.as_ref(),
                info: settings.device_info.as_deref(),
            })
            .await?;

        info!("DPP bootstrap generation successful");
        Ok(())
    }

    async fn wait(receiver: OutcomeReceiver, deadline: Option<Duration>) -> Option<TerminalSignal> {
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, receiver).await {
                Ok(result) => result,
                Err(_) => {
                    error!(?deadline, "Provisioning deadline elapsed");
                    return None;
                }
            },
            None => receiver.await,
        };

        match result {
            Ok(signal) => Some(signal),
            Err(_) => {
                error!("UNEXPECTED EVENT: wait ended without terminal signal");
                None
            }
        }
    }

    async fn teardown(stack: &S) {
        match stack.deinit().await {
            Ok(()) => info!("DPP deinitialized successfully"),
            Err(e) => warn!("Failed to deinitialize DPP: {}", e),
        }
    }

    fn summarize(
        id: SessionId,
        router: Option<EventRouter<S>>,
        outcome: Outcome,
        started: Instant,
    ) -> SessionSummary {
        let elapsed = started.elapsed();
        info!("DPP session execution time: {:?}", elapsed);

        let mut report = SessionReport {
            session_id: id,
            outcome,
            ssid: None,
            ip_address: None,
            auth_retries: 0,
            connect_retries: 0,
            elapsed,
        };

        let Some(router) = router else {
            return SessionSummary {
                report,
                credential: None,
            };
        };

        report.ssid = router.supervisor.ssid().map(str::to_string);
        report.ip_address = router.supervisor.ip_address();
        report.auth_retries = router.handler.retries();
        report.connect_retries = router.supervisor.total_retries();

        match outcome {
            Outcome::Connected => {
                info!(ssid = ?report.ssid, "connected to ap");
            }
            Outcome::ConnectionFailed => {
                info!(
                    ssid = ?report.ssid,
                    error = ?router.supervisor.last_error(),
                    "Failed to connect to ap"
                );
            }
            Outcome::AuthenticationFailed => {
                info!("DPP Authentication failed after {} retries", report.auth_retries);
            }
            Outcome::UnexpectedState => error!("UNEXPECTED EVENT"),
        }

        SessionSummary {
            report,
            credential: router.supervisor.into_credential(),
        }
    }
}
