//! DPP stack trait definition

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::{
    bootstrap::BootstrapRequest, error::StackResult, event::StackEvent, types::NetworkCredential,
};

/// Subscription to stack events; dropping it unregisters the sink
pub type EventReceiver = broadcast::Receiver<StackEvent>;

/// Abstraction over the radio/security stack providing DPP
///
/// The DPP handshake itself is implemented by the stack (typically
/// wpa_supplicant); this trait only drives it and delivers its events.
#[make(Send)]
pub trait DppStack: Send + Sync + 'static {
    /// Bring up the network/event stack
    async fn init(&self) -> StackResult<()>;

    /// Register an event sink
    ///
    /// Events emitted before subscribing are not delivered.
    fn subscribe(&self) -> EventReceiver;

    /// Generate the bootstrapping information
    ///
    /// The resulting URI is delivered as [`StackEvent::UriReady`].
    async fn generate_bootstrap(&self, request: BootstrapRequest<'_>) -> StackResult<()>;

    /// Start the station interface; emits [`StackEvent::StationStarted`]
    async fn start(&self) -> StackResult<()>;

    /// Listen for DPP authentication requests from a configurator
    async fn start_listen(&self) -> StackResult<()>;

    /// Release all DPP state (listen, bootstrapping info)
    async fn deinit(&self) -> StackResult<()>;

    /// Apply a delivered network credential
    async fn set_network_config(&self, credential: &NetworkCredential) -> StackResult<()>;

    /// Request association with the configured network
    async fn connect(&self) -> StackResult<()>;

    /// Ask the stack to persist the applied network configuration
    async fn persist_network_config(&self) -> StackResult<()>;
}
