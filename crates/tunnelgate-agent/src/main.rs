//! Tunnelgate Agent Binary
//!
//! Serves the loopback control API and supervises the tunnel client.

use std::env;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use tunnelgate_agent::{
    create_router, AgentConfig, AgentController, AgentSettings, AgentState, SupervisorOptions,
};
use tunnelgate_core::{CertificateVerifier, MachineIdentity};

#[tokio::main]
async fn main() {
    // Initialize logging
    let log_level = env::var("TUNNELGATE_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Configuration
    let config = AgentConfig::from_env().expect("Invalid agent configuration");

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");

    let identity =
        MachineIdentity::load_or_create(config.machine_id_path()).expect("Failed to determine machine identity");

    let root_pem = std::fs::read_to_string(&config.ca_cert_path).expect("Failed to read CA certificate");
    let verifier = CertificateVerifier::from_pem(&root_pem).expect("Invalid CA certificate");

    let controller = AgentController::new(
        identity,
        verifier,
        AgentSettings {
            cert_path: config.cert_path(),
            program: config.npc_path.clone(),
            supervisor: SupervisorOptions {
                max_restarts: config.max_restarts,
                reap_orphans: true,
            },
        },
    );

    info!(
        machine_id = %controller.identity(),
        npc = %config.npc_path.display(),
        "Starting tunnelgate agent"
    );

    // Resume the persisted channel, if any
    if let Err(e) = controller.load_persisted().await {
        error!(error = %e, "Persisted certificate not loaded");
    }

    let state = Arc::new(AgentState { controller });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %config.listen_addr, "Tunnelgate agent listening");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
