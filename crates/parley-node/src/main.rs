//! # parley-node
//!
//! Headless Parley node: opens the local database and identity, starts a
//! messenger on an in-process loopback network and runs the background
//! maintenance loops until interrupted.

mod keyfile;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_core::{
    spawn_background_loops, MemoryNetwork, Messenger, MessengerConfig, SystemTimeSource,
    TimeSource,
};
use parley_store::Database;

const INSTALLATION_KEY: &str = "installation_id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_core=debug")),
        )
        .init();

    info!("Starting Parley node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and local state
    // -----------------------------------------------------------------------
    let config = MessengerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.data_dir {
        Some(dir) => Database::open_at(&dir.join("parley.db"))?,
        None => Database::new()?,
    };
    let data_dir = db
        .path()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let identity = keyfile::load_or_create(&data_dir.join(keyfile::KEY_FILE))?;

    let installation_id = match db.get_local_value(INSTALLATION_KEY)? {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            db.set_local_value(INSTALLATION_KEY, &id)?;
            id
        }
    };

    // -----------------------------------------------------------------------
    // 3. Start the messenger
    // -----------------------------------------------------------------------
    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let network = MemoryNetwork::new();
    let transport = Arc::new(network.endpoint(identity.user_id(), time.clone()));
    let messenger = Arc::new(Messenger::with_signed_codec(
        identity,
        &installation_id,
        db,
        transport,
        time,
        config,
    )?);
    info!(
        user = %messenger.user_id().to_hex(),
        installation = %installation_id,
        "Messenger ready"
    );

    // -----------------------------------------------------------------------
    // 4. Spawn background loops and wait for shutdown
    // -----------------------------------------------------------------------
    let loops = spawn_background_loops(messenger.clone(), None);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    loops.shutdown().await;

    Ok(())
}
