use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "netprobe", about = "Network telemetry probe: ping, throughput and FTP upload")]
pub struct Cli {
    /// Settings file (sectioned JSON)
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
    /// Where the session identity is kept
    #[arg(long, default_value = "session.json")]
    pub session_file: PathBuf,
    /// Text log file
    #[arg(long, default_value = "log.txt")]
    pub log_file: PathBuf,
    /// Hardware id for new sessions (default: /etc/machine-id, else the hostname)
    #[arg(long)]
    pub device_id: Option<String>,
    /// Delete the stored session before starting, so a new one is generated
    #[arg(long, default_value_t = false)]
    pub clear_session: bool,
    /// Run every enabled task once and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
