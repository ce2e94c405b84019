//! Tunnelgate Server Binary
//!
//! Runs the channel issuance API and the per-channel reverse proxy.

use std::env;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tunnelgate_broker::backends::NpsBroker;
use tunnelgate_core::{CaMaterial, CertificateAuthority};
use tunnelgate_server::{
    create_router, AppState, ChannelController, ChannelStore, Forwarder, IssuanceSettings,
    MemoryStore, RouteCache, ServerConfig,
};

const CA_COMMON_NAME: &str = "tunnelgate root";

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
    let config = ServerConfig::from_env().expect("Invalid server configuration");

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");

    // Load the CA, creating one on first start
    let material = if config.ca_cert_path.exists() && config.ca_key_path.exists() {
        CaMaterial::load(&config.ca_cert_path, &config.ca_key_path).expect("Failed to read CA files")
    } else {
        warn!(
            cert = %config.ca_cert_path.display(),
            "No CA found, generating a new root"
        );
        let material = CaMaterial::generate(CA_COMMON_NAME).expect("Failed to generate CA");
        material
            .save(&config.ca_cert_path, &config.ca_key_path)
            .expect("Failed to write CA files");
        material
    };
    let ca = Arc::new(CertificateAuthority::from_material(&material).expect("Invalid CA material"));

    // Initialize storage
    let store = open_store(&config).await;

    // Broker and routing
    let broker = Arc::new(NpsBroker::new(&config.nps.api_url, &config.nps.api_key));
    let routes = Arc::new(RouteCache::new(store.clone(), config.route_cache_capacity));
    let forwarder = Forwarder::new(&config.upstream_host).expect("Failed to build HTTP client");

    let controller = ChannelController::new(
        store,
        broker,
        ca,
        routes.clone(),
        IssuanceSettings {
            auth_key: config.auth_key.clone(),
            bridge_host: config.nps.bridge_host.clone(),
            client_port: config.nps.client_port.clone(),
        },
    );

    info!(
        broker = %config.nps.api_url,
        bridge = %config.nps.bridge_host,
        route_cache = config.route_cache_capacity,
        "Starting tunnelgate server"
    );

    // Create application state
    let state = Arc::new(AppState {
        controller,
        routes,
        forwarder,
    });

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %config.listen_addr, "Tunnelgate server listening");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

#[cfg(feature = "sqlite")]
async fn open_store(config: &ServerConfig) -> Arc<dyn ChannelStore> {
    match &config.database_url {
        Some(url) => {
            info!("Using SQLite channel store");
            Arc::new(
                tunnelgate_server::storage::SqliteStore::new(url)
                    .await
                    .expect("Failed to open database"),
            )
        }
        None => Arc::new(MemoryStore::new()),
    }
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(config: &ServerConfig) -> Arc<dyn ChannelStore> {
    if config.database_url.is_some() {
        warn!("TUNNELGATE_DATABASE_URL is set but the sqlite feature is disabled, using memory store");
    }
    Arc::new(MemoryStore::new())
}
