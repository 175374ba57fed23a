// Command-line interface definitions for voxlink
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voxlink")]
#[command(author, version, about = "Push-to-talk channel orchestration daemon")]
#[command(long_about = "
Voxlink keeps a push-to-talk audio channel connected while you need it and
tears it down when you don't. Hold the PTT key to join and transmit, release
to stop; short gaps between transmissions reuse the existing connection
instead of reconnecting.

SETUP:
  1. Add yourself to the input group: sudo usermod -aG input $USER
  2. Log out and back in
  3. Adjust the channel and token endpoint in ~/.config/voxlink/config.toml
  4. Run: voxlink (to start the daemon)

USAGE:
  Hold ScrollLock (default) to transmit on the configured channel.
  Compositor keybindings can drive the daemon via 'voxlink key press/release'.
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override push-to-talk key (e.g., SCROLLLOCK, PAUSE, F13)
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,

    /// Override target channel name
    #[arg(long, value_name = "CHANNEL")]
    pub channel: Option<String>,

    /// Override channel teardown delay in milliseconds
    #[arg(long, value_name = "MS")]
    pub disconnect_delay: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as daemon (default if no command specified)
    Daemon,

    /// Show current configuration
    Config,

    /// Show daemon status (for Waybar/polybar integration)
    Status {
        /// Continuously output status changes (for Waybar exec)
        #[arg(long)]
        follow: bool,

        /// Output format: "text" (default) or "json" (for Waybar)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Drive the PTT key from external sources (compositor keybindings, scripts)
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Press the PTT key (send SIGUSR1 to daemon)
    Press,
    /// Release the PTT key (send SIGUSR2 to daemon)
    Release,
}
