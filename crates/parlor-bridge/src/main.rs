use std::time::Duration;

use tracing_subscriber::EnvFilter;

use parlor_bridge::cli;
use parlor_bridge::ipc::{sock_path, IpcClient};
use parlor_bridge::protocol::build_ws_url;
use parlor_bridge::session::BridgeSession;

/// Load environment variables from a .env file (KEY=VALUE lines).
fn load_dotenv() {
    let candidates = [
        // Workspace root when run via cargo
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../.env"),
        // Current directory when spawned by the orchestrator
        std::path::PathBuf::from(".env"),
    ];

    for path in &candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
            return;
        }
    }
}

#[tokio::main]
async fn main() {
    // .env before clap so env-sourced options see it
    load_dotenv();
    let args = cli::parse();

    let directive = args.log_level.as_deref().unwrap_or("parlor_bridge=info");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                directive
                    .parse()
                    .unwrap_or_else(|_| "parlor_bridge=info".parse().unwrap()),
            ),
        )
        .init();

    tracing::info!(
        instance = %args.instance,
        room = %args.room,
        "parlor-bridge v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let socket = args
        .socket
        .clone()
        .unwrap_or_else(|| sock_path(&args.instance));
    let ipc = IpcClient::new(socket, args.auth_secret.clone());
    let ws_url = build_ws_url(&args.relay_url, &args.room);
    let session = BridgeSession::new(
        args.instance,
        ws_url,
        ipc,
        Duration::from_secs(args.poll_interval),
    );

    tokio::select! {
        _ = session.run() => {}
        _ = tokio::signal::ctrl_c() => {
            session.shutdown();
            tracing::info!("Shutdown complete");
        }
    }
}
