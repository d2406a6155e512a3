use std::path::PathBuf;

use clap::Parser;

/// parlor-bridge — room-sync sidecar for a parlor terminal instance.
///
/// Spawned by the room orchestrator next to each instance; every option
/// can come from the environment instead of the command line.
#[derive(Parser, Debug)]
#[command(name = "parlor-bridge", version, about)]
pub struct Args {
    /// Instance id of the local parlor process (drives the socket path).
    #[arg(long, env = "PARLOR_INSTANCE")]
    pub instance: String,

    /// Base URL of the relay server (http(s):// or ws(s)://).
    #[arg(long, env = "PARLOR_RELAY_URL")]
    pub relay_url: String,

    /// Room to join on the relay.
    #[arg(long, env = "PARLOR_ROOM")]
    pub room: String,

    /// Shared HMAC secret for the control socket. Omit when the local
    /// instance runs without auth.
    #[arg(long, env = "PARLOR_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Control socket path override.
    #[arg(long, env = "PARLOR_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Seconds between state polls.
    #[arg(long, env = "PARLOR_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval: u64,

    /// Log level override (debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn parse() -> Args {
    Args::parse()
}
