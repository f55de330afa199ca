//! booking-notify CLI - log in to the booking service and listen for
//! notifications.
//!
//! This is the main binary entry point. See the `booking_notify` library
//! for the core functionality.

use anyhow::{Context, Result};
use booking_notify::{commands, Config, Role};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "booking-notify")]
#[command(version = VERSION)]
#[command(about = "Real-time notifications for the appointment booking service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session credential
    Login {
        #[arg(long)]
        email: String,
        /// Password (falls back to BOOKING_PASSWORD, then a prompt)
        #[arg(long)]
        password: Option<String>,
    },
    /// Create a customer or provider account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Account role: customer or provider
        #[arg(long, value_parser = parse_role)]
        role: Role,
        /// Password (falls back to BOOKING_PASSWORD, then a prompt)
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the stored identity
    Whoami,
    /// Print notifications as they arrive
    Listen,
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role '{value}' (expected customer or provider)"))
}

/// Log to `BOOKING_LOG_FILE`, or `booking-notify.log` in the config dir.
/// Stdout belongs to the alert display.
fn init_logging() -> Result<()> {
    let log_path = match std::env::var("BOOKING_LOG_FILE") {
        Ok(path) => std::path::PathBuf::from(path),
        Err(_) => Config::config_dir()?.join("booking-notify.log"),
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file at {}", log_path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load()?;
    log::info!("booking-notify v{} against {}", VERSION, config.server_url);

    match cli.command {
        Commands::Login { email, password } => {
            commands::account::login(&config, &email, password).await?;
        }
        Commands::Register {
            name,
            email,
            role,
            password,
        } => {
            commands::account::register(&config, &name, &email, role, password).await?;
        }
        Commands::Logout => commands::account::logout(&config)?,
        Commands::Whoami => commands::account::whoami(&config)?,
        Commands::Listen => commands::listen::run(config).await?,
    }

    Ok(())
}
