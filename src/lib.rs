pub mod cloud;
pub mod config;
pub mod descriptor;
pub mod net;
pub mod telemetry;
pub mod wake;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

pub use cloud::{CloudError, EventBus, InstanceIdentity, InstanceMetadata, JoinAttempt};
pub use descriptor::{DescriptorCell, ServerDescriptor, StartingText};
pub use net::handshake::{parse_handshake, parse_login_start, Handshake, LoginStart, NextState};
pub use net::packet::{FrameError, PacketReader, PacketWriter};
pub use net::router::{route_connection, Exchange, ProtocolError};
pub use net::server::{run_server, ListenerConfig, ServerContext, ServerControl};
pub use net::status::build_status_json;
pub use wake::{WakeOutcome, WakeTrigger};

use cloud::events::{HttpEventBus, LoggingEventBus};
use cloud::metadata::ImdsClient;
use config::{AppConfig, LoadOutcome, WakeConfig};
use net::hostname::HostnameCache;

pub fn run(args: &[String]) -> Result<(), String> {
    let app = AppConfig::from_args(args)?;
    telemetry::logging::init(&app.log_dir)?;
    if let Some(path) = telemetry::logging::log_path() {
        info!("Logging to {}", path.display());
    }

    info!("Loading configuration...");
    let file = match config::load_or_create(&app.config_path)? {
        LoadOutcome::Loaded(file) => file,
        LoadOutcome::Created(path) => {
            warn!("Please adjust the settings in {}!", path.display());
            return Err(format!("default config written to {}", path.display()));
        }
    };

    let base_dir = app
        .config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let descriptor = file.descriptor(base_dir)?;
    let starting = StartingText::from(&file.starting);
    let wake = build_wake_trigger(&file.wake, starting)?;
    if wake.is_none() {
        info!("Wake trigger disabled, join attempts are only kicked");
    }

    let listener = file.listener_config(app.bind_addr.as_deref());
    let context = Arc::new(ServerContext::new(
        DescriptorCell::new(descriptor),
        wake,
        HostnameCache::new(file.limits.hostname_cache),
    ));
    let control = Arc::new(ServerControl::new());
    control.register_signals()?;

    info!("Setting up server on {}...", listener.bind_addr);
    run_server(listener, context, control)?;
    info!("Server stopped");
    Ok(())
}

fn build_wake_trigger(
    config: &WakeConfig,
    starting: StartingText,
) -> Result<Option<WakeTrigger>, String> {
    if !config.enabled {
        return Ok(None);
    }
    let timeout = config.request_timeout();
    let metadata = ImdsClient::new(&config.metadata_url, timeout)
        .map_err(|err| format!("metadata client init failed: {}", err))?;
    let events: Arc<dyn EventBus> = match config.event_bus_url.as_deref() {
        Some(endpoint) => Arc::new(
            HttpEventBus::new(endpoint, &config.source, &config.detail_type, timeout)
                .map_err(|err| format!("event bus client init failed: {}", err))?,
        ),
        None => {
            warn!("No event bus endpoint configured, join attempts will be logged but never wake the server");
            Arc::new(LoggingEventBus::new(&config.source, &config.detail_type))
        }
    };
    Ok(Some(WakeTrigger::new(Arc::new(metadata), events, starting)))
}
