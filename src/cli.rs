use clap::{Parser, Subcommand};

/// Rig Telemetry - real-time drilling telemetry distribution server
#[derive(Parser)]
#[command(name = "rig-telemetry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Override RIG_PORT
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Override RIG_BIND_ADDR
    #[arg(short, long, global = true)]
    pub bind: Option<String>,

    /// Seed the mock rig for reproducible telemetry
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (default)
    Serve,

    /// Print the effective configuration and exit
    PrintConfig,
}
