//! Voxlink - push-to-talk channel orchestration daemon
//!
//! Run with `voxlink` or `voxlink daemon` to start the daemon.
//! Use `voxlink key press/release` to drive the PTT key externally.
//! Use `voxlink status` for Waybar/polybar integration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxlink::cli::{Cli, Commands, KeyAction};
use voxlink::{config, daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxlink={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(key) = cli.key {
        config.keys.key = key;
    }
    if let Some(channel) = cli.channel {
        config.channel.name = channel;
    }
    if let Some(ms) = cli.disconnect_delay {
        config.debounce.disconnect_delay_ms = ms;
    }

    // Run the appropriate command
    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => {
            let mut daemon = daemon::Daemon::new(config);
            daemon.run().await?;
        }

        Commands::Config => {
            show_config(&config)?;
        }

        Commands::Status { follow, format } => {
            run_status(&config, follow, &format).await?;
        }

        Commands::Key { action } => {
            send_key_signal(action)?;
        }
    }

    Ok(())
}

/// Print the effective configuration
fn show_config(config: &config::Config) -> anyhow::Result<()> {
    if let Some(path) = config::Config::default_path() {
        println!("# Config file: {:?}", path);
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Show the daemon's session state from the state file
async fn run_status(config: &config::Config, follow: bool, format: &str) -> anyhow::Result<()> {
    let path = config
        .resolve_state_file()
        .ok_or_else(|| anyhow::anyhow!("state file is disabled in config"))?;

    fn read_state(path: &PathBuf) -> String {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "stopped".to_string())
    }

    fn print_state(state: &str, format: &str) {
        if format == "json" {
            println!("{}", serde_json::json!({ "text": state, "class": state }));
        } else {
            println!("{}", state);
        }
    }

    let mut last = read_state(&path);
    print_state(&last, format);

    if follow {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let current = read_state(&path);
            if current != last {
                print_state(&current, format);
                last = current;
            }
        }
    }

    Ok(())
}

/// Send SIGUSR1/SIGUSR2 to the running daemon (external key control)
#[cfg(target_os = "linux")]
fn send_key_signal(action: KeyAction) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid_path = config::Config::runtime_dir().join("pid");
    let pid_str = std::fs::read_to_string(&pid_path)
        .map_err(|_| anyhow::anyhow!("daemon not running (no PID file at {:?})", pid_path))?;
    let pid = pid_str.trim().parse::<i32>()?;

    let sig = match action {
        KeyAction::Press => Signal::SIGUSR1,
        KeyAction::Release => Signal::SIGUSR2,
    };
    kill(Pid::from_raw(pid), sig)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_key_signal(_action: KeyAction) -> anyhow::Result<()> {
    anyhow::bail!("'voxlink key' requires Linux signal support")
}
