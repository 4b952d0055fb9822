//! wpa_supplicant backend using the wifi-ctrl control socket client

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    process::Command,
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::{debug, error, info, warn};
use wifi_ctrl::sta::{Broadcast, RequestClient, WifiSetup};

use crate::{
    backend::{
        DppStack, EventReceiver,
        events::{ConfigAssembler, parse_event},
    },
    core::{
        bootstrap::BootstrapRequest,
        error::{StackError, StackResult},
        event::{DisconnectReason, StackEvent},
        types::{ChannelList, NetworkCredential, NetworkSecret},
    },
};

const IP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const IP_POLL_RETRIES: usize = 30; // 30 * 200ms = 6 seconds
const CONFIG_SETTLE: Duration = Duration::from_millis(500);
const EVENT_CAPACITY: usize = 64;

/// Live connection to the control socket
struct Link {
    client: RequestClient,
    station: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Handles wpa_supplicant allocated for this enrollee
#[derive(Debug, Default)]
struct DppHandles {
    bootstrap_id: Option<u32>,
    network_id: Option<u32>,
    listen_frequency: Option<u32>,
    listening: bool,
}

pub struct WifiCtrlBackend {
    interface: String,
    socket_path: String,
    link: Mutex<Option<Link>>,
    handles: Mutex<DppHandles>,
    events: broadcast::Sender<StackEvent>,
    /// Set while an association attempt awaits its result
    attempt: Arc<AtomicBool>,
}

impl WifiCtrlBackend {
    pub fn new(interface: String, ctrl_dir: &str) -> Self {
        let socket_path = format!("{}/{}", ctrl_dir.trim_end_matches('/'), interface);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            interface,
            socket_path,
            link: Mutex::new(None),
            handles: Mutex::new(DppHandles::default()),
            events,
            attempt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Send a control command and check the reply
    async fn command(&self, command: String) -> StackResult<String> {
        let verb = command_verb(&command).to_string();
        debug!("wpa_supplicant command: {}", verb);

        let link = self.link.lock().await;
        let link = link
            .as_ref()
            .ok_or_else(|| StackError::Unavailable("control socket not connected".into()))?;

        let response = link
            .client
            .send_custom(command)
            .await
            .map_err(|e| StackError::WpaSupplicantError(format!("{} failed: {}", verb, e)))?;

        check_response(&verb, &response)
    }

    /// Remove a network added by a previous configuration attempt
    async fn remove_network(&self, id: u32) {
        if let Err(e) = self.command(format!("REMOVE_NETWORK {}", id)).await {
            warn!("Failed to remove network {}: {}", id, e);
        }
    }

    async fn configure_network(&self, id: u32, credential: &NetworkCredential) -> StackResult<()> {
        for command in network_commands(id, credential) {
            self.command(command).await?;
        }
        Ok(())
    }
}

impl DppStack for WifiCtrlBackend {
    async fn init(&self) -> StackResult<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let mut setup =
            WifiSetup::new().map_err(|e| StackError::WpaSupplicantError(e.to_string()))?;
        setup.set_socket_path(self.socket_path.clone());

        let client = setup.get_request_client();
        let receiver = setup.get_broadcast_receiver();
        let station = setup.complete();

        // Spawn the station runtime
        let station = tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });
        let forwarder = tokio::spawn(
            EventForwarder::new(
                self.interface.clone(),
                self.events.clone(),
                self.attempt.clone(),
            )
            .run(receiver),
        );

        let pong = client
            .send_custom("PING".to_string())
            .await
            .map_err(|e| StackError::Unavailable(format!("{}: {}", self.socket_path, e)));
        match pong {
            Ok(reply) if reply.trim() == "PONG" => {}
            Ok(reply) => {
                station.abort();
                forwarder.abort();
                return Err(StackError::Unavailable(format!(
                    "unexpected PING reply {:?}",
                    reply.trim()
                )));
            }
            Err(e) => {
                station.abort();
                forwarder.abort();
                return Err(e);
            }
        }

        *link = Some(Link {
            client,
            station,
            forwarder,
        });
        drop(link);

        // Configuration objects are applied by this service
        if let Err(e) = self.command("SET dpp_config_processing 0".to_string()).await {
            warn!("Failed to set dpp_config_processing: {}", e);
        }

        info!("Connected to wpa_supplicant at {}", self.socket_path);
        Ok(())
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    async fn generate_bootstrap(&self, request: BootstrapRequest<'_>) -> StackResult<()> {
        let reply = self
            .command(bootstrap_command(&request))
            .await
            .map_err(|e| StackError::BootstrapFailed(e.to_string()))?;
        let id = reply
            .parse::<u32>()
            .map_err(|_| StackError::BootstrapFailed(format!("unexpected reply {:?}", reply)))?;

        {
            let mut handles = self.handles.lock().await;
            handles.bootstrap_id = Some(id);
            handles.listen_frequency = Some(request.channels.primary().frequency());
        }
        debug!("DPP bootstrap id {}", id);

        let uri = self
            .command(format!("DPP_BOOTSTRAP_GET_URI {}", id))
            .await
            .map_err(|e| StackError::BootstrapFailed(e.to_string()))?;

        let uri = Some(uri).filter(|uri| !uri.is_empty());
        publish(&self.events, StackEvent::UriReady(uri));
        Ok(())
    }

    async fn start(&self) -> StackResult<()> {
        let status = self.command("STATUS".to_string()).await?;
        let state = status
            .lines()
            .find_map(|line| line.strip_prefix("wpa_state="))
            .unwrap_or("UNKNOWN");
        debug!("Interface {} in state {}", self.interface, state);

        if state == "INTERFACE_DISABLED" {
            return Err(StackError::Unavailable(format!(
                "interface {} is disabled",
                self.interface
            )));
        }

        publish(&self.events, StackEvent::StationStarted);
        Ok(())
    }

    async fn start_listen(&self) -> StackResult<()> {
        let frequency = {
            let handles = self.handles.lock().await;
            handles
                .listen_frequency
                .unwrap_or_else(|| ChannelList::default().primary().frequency())
        };

        self.command(format!("DPP_LISTEN {}", frequency))
            .await
            .map_err(|e| StackError::ListenFailed(e.to_string()))?;

        self.handles.lock().await.listening = true;
        debug!("DPP listening on {} MHz", frequency);
        Ok(())
    }

    async fn deinit(&self) -> StackResult<()> {
        let (listening, bootstrap_id) = {
            let mut handles = self.handles.lock().await;
            (
                std::mem::take(&mut handles.listening),
                handles.bootstrap_id.take(),
            )
        };

        if listening {
            if let Err(e) = self.command("DPP_STOP_LISTEN".to_string()).await {
                warn!("Failed to stop DPP listen: {}", e);
            }
        }
        if let Some(id) = bootstrap_id {
            if let Err(e) = self.command(format!("DPP_BOOTSTRAP_REMOVE {}", id)).await {
                warn!("Failed to remove bootstrap {}: {}", id, e);
            }
        }

        if let Some(link) = self.link.lock().await.take() {
            link.forwarder.abort();
            link.station.abort();
        }
        Ok(())
    }

    async fn set_network_config(&self, credential: &NetworkCredential) -> StackResult<()> {
        let previous = self.handles.lock().await.network_id.take();
        if let Some(id) = previous {
            self.remove_network(id).await;
        }

        let reply = self
            .command("ADD_NETWORK".to_string())
            .await
            .map_err(|e| StackError::ConfigRejected(e.to_string()))?;
        let id = reply
            .parse::<u32>()
            .map_err(|_| StackError::ConfigRejected(format!("unexpected reply {:?}", reply)))?;

        if let Err(e) = self.configure_network(id, credential).await {
            self.remove_network(id).await;
            return Err(StackError::ConfigRejected(e.to_string()));
        }

        self.handles.lock().await.network_id = Some(id);
        debug!("Network {} configured for {}", id, credential.ssid);
        Ok(())
    }

    async fn connect(&self) -> StackResult<()> {
        let id = self
            .handles
            .lock()
            .await
            .network_id
            .ok_or_else(|| StackError::ConnectFailed("no network configured".into()))?;

        // Open the attempt first so an immediate failure is not missed
        self.attempt.store(true, Ordering::Release);
        if let Err(e) = self.command(format!("SELECT_NETWORK {}", id)).await {
            self.attempt.store(false, Ordering::Release);
            return Err(StackError::ConnectFailed(e.to_string()));
        }
        Ok(())
    }

    async fn persist_network_config(&self) -> StackResult<()> {
        self.command("SAVE_CONFIG".to_string()).await?;
        debug!("wpa_supplicant configuration saved successfully");
        Ok(())
    }
}

/// Translates wifi-ctrl broadcasts into stack events
///
/// Association failures are only reported while an attempt is open:
/// wpa_supplicant reports one failed attempt with several events
/// (`CTRL-EVENT-DISCONNECTED` followed by `CTRL-EVENT-SSID-TEMP-DISABLED`
/// for a wrong key), and each attempt must count once.
struct EventForwarder {
    interface: String,
    events: broadcast::Sender<StackEvent>,
    attempt: Arc<AtomicBool>,
    assembler: ConfigAssembler,
    settle: Option<Instant>,
}

impl EventForwarder {
    fn new(
        interface: String,
        events: broadcast::Sender<StackEvent>,
        attempt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            interface,
            events,
            attempt,
            assembler: ConfigAssembler::default(),
            settle: None,
        }
    }

    async fn run(mut self, mut receiver: broadcast::Receiver<Broadcast>) {
        loop {
            let next = match self.settle {
                Some(deadline) => match timeout_at(deadline, receiver.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.flush();
                        continue;
                    }
                },
                None => receiver.recv().await,
            };

            match next {
                Ok(broadcast) => self.handle(broadcast),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Broadcast receiver lagged, {} events lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("wpa_supplicant broadcast channel closed");
                    break;
                }
            }
        }

        self.flush();
    }

    fn handle(&mut self, broadcast: Broadcast) {
        match broadcast {
            Broadcast::Connected => {
                self.attempt.store(false, Ordering::Release);
                debug!("Associated, waiting for IP address");
                tokio::spawn(poll_address(self.interface.clone(), self.events.clone()));
            }
            Broadcast::Disconnected => self.attempt_failed(DisconnectReason::Unspecified),
            Broadcast::WrongPsk => self.attempt_failed(DisconnectReason::WrongPassword),
            Broadcast::NetworkNotFound => self.attempt_failed(DisconnectReason::NetworkNotFound),
            Broadcast::Unknown(line) => {
                for event in self.assembler.push(parse_event(&line)) {
                    publish(&self.events, event);
                }
                self.settle = match (self.assembler.is_pending(), self.settle) {
                    (false, _) => None,
                    (true, Some(deadline)) => Some(deadline),
                    (true, None) => Some(Instant::now() + CONFIG_SETTLE),
                };
            }
            other => debug!("Ignoring wpa_supplicant broadcast: {:?}", other),
        }
    }

    fn attempt_failed(&self, reason: DisconnectReason) {
        if self.attempt.swap(false, Ordering::AcqRel) {
            disconnected(&self.events, reason);
        } else {
            debug!(%reason, "Ignoring disconnect outside an association attempt");
        }
    }

    /// Finish a configuration object that never received a secret
    fn flush(&mut self) {
        self.settle = None;
        if let Some(event) = self.assembler.flush() {
            publish(&self.events, event);
        }
    }
}

fn publish(events: &broadcast::Sender<StackEvent>, event: StackEvent) {
    if events.send(event).is_err() {
        debug!("No subscriber for stack event");
    }
}

fn disconnected(events: &broadcast::Sender<StackEvent>, reason: DisconnectReason) {
    publish(events, StackEvent::Disconnected { reason });
}

/// Wait for an IPv4 address on the interface after association
async fn poll_address(interface: String, events: broadcast::Sender<StackEvent>) {
    for _ in 0..IP_POLL_RETRIES {
        if let Some(address) = get_ip_address(&interface).await {
            publish(&events, StackEvent::AddressAcquired(IpAddr::V4(address)));
            return;
        }
        tokio::time::sleep(IP_POLL_INTERVAL).await;
    }

    warn!("Associated with network but no IP address on {}", interface);
    disconnected(&events, DisconnectReason::NoAddress);
}

/// Get IP address using ip command
async fn get_ip_address(interface: &str) -> Option<Ipv4Addr> {
    let output = Command::new("ip")
        .args(["-4", "addr", "show", interface])
        .output()
        .await
        .ok()?;

    parse_inet_address(&String::from_utf8_lossy(&output.stdout))
}

fn parse_inet_address(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("inet "))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|cidr| cidr.split('/').next())
        .find_map(|ip| ip.parse().ok())
}

/// First word of a command, safe to log
fn command_verb(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

fn check_response(verb: &str, response: &str) -> StackResult<String> {
    let response = response.trim();
    if response == "FAIL" || response.starts_with("FAIL-") || response == "UNKNOWN COMMAND" {
        return Err(StackError::CommandFailed {
            command: verb.to_string(),
            response: response.to_string(),
        });
    }
    Ok(response.to_string())
}

fn bootstrap_command(request: &BootstrapRequest<'_>) -> String {
    let mut command = format!(
        "DPP_BOOTSTRAP_GEN type={} chan={}",
        request.method.as_str(),
        request.channels.to_bootstrap_notation()
    );
    if let Some(key) = request.key {
        command.push_str(" key=");
        command.push_str(key.as_hex());
    }
    if let Some(info) = request.info {
        command.push_str(" info=");
        command.push_str(info);
    }
    command
}

fn network_commands(id: u32, credential: &NetworkCredential) -> Vec<String> {
    let mut commands = vec![format!(
        "SET_NETWORK {} ssid {}",
        id,
        hex::encode(credential.ssid.as_bytes())
    )];
    commands.push(match &credential.secret {
        NetworkSecret::Passphrase(pass) => format!("SET_NETWORK {} psk \"{}\"", id, pass),
        NetworkSecret::Psk(psk) => format!("SET_NETWORK {} psk {}", id, hex::encode(psk)),
        NetworkSecret::Open => format!("SET_NETWORK {} key_mgmt NONE", id),
    });
    commands
}
