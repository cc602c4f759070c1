//! Courier delivery service
//!
//! - `courier run` dispatches until SIGINT or SIGTERM
//! - `courier send ...` pushes one message through an in-process pipeline and
//!   prints the final record as JSON

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier::Courier;
use courier_delivery::SubmitRequest;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Resilient outbound message delivery", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, overrides the default lookup
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delivery loop (the default)
    Run,
    /// Deliver a single message and print its final state
    Send {
        #[arg(long)]
        recipient: String,

        #[arg(long)]
        subject: String,

        /// Message body
        #[arg(long)]
        message: String,

        /// high, normal or low
        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        idempotency_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let courier = load_config(cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => courier.run().await,
        Commands::Send {
            recipient,
            subject,
            message,
            priority,
            idempotency_key,
        } => {
            let mut request = SubmitRequest::new(recipient, subject, message);
            request.priority = priority;

            let record = courier.send(request, idempotency_key.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<Courier> {
    let Some(config_path) = explicit.map_or_else(find_config_file, |path| Ok(Some(path)))? else {
        return Ok(Courier::default());
    };

    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;

    Ok(ron::from_str(&config_content)?)
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// No file at all means built-in defaults.
fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok([
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ]
    .into_iter()
    .find(|path| path.exists()))
}
