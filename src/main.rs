//! parley - command-line client for the parley messaging protocol
//!
//! One-shot commands against a server, a push watcher and an offline
//! decoder for captured frames.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use parley_client::{Client, ClientConfig, ClientError, ConnectionStatus};
use parley_protocol::{EntityType, UnknownFields};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Command-line client for the parley messaging protocol")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, env = "PARLEY_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "PARLEY_PORT")]
    port: Option<u16>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "PARLEY_TLS")]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long, env = "PARLEY_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Server name for TLS SNI (defaults to the host)
    #[arg(long)]
    server_name: Option<String>,

    /// Never compress outbound frames
    #[arg(long)]
    no_compression: bool,

    /// Fail on entity fields this client does not model
    #[arg(long)]
    strict: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ping the server and print the round-trip time
    Ping,

    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short = 'P', long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: String,

        /// Second-factor code, sent if the server asks for one
        #[arg(long)]
        mfa: Option<String>,
    },

    /// Fetch an entity and print it as JSON
    Get {
        /// Entity type (user, channel, group, message, role, file, message-state, poll, agent)
        entity_type: EntityType,

        id: u64,

        /// Context entity as type:id
        #[arg(long)]
        context: Option<String>,

        /// Paginate a list field as field:older|newer:from:max
        #[arg(long)]
        page: Option<String>,
    },

    /// Print server pushes as JSON until interrupted
    Watch,

    /// Decode hex-encoded frames offline and print them as JSON
    Decode {
        /// Hex bytes (whitespace and a 0x prefix are ignored)
        hex: String,

        /// Input is a bare packet without the frame header
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    parley_protocol::verify_schemas();

    let unknown_fields = if cli.strict {
        UnknownFields::Strict
    } else {
        UnknownFields::Skip
    };

    // Handle decode locally (no server connection needed)
    if let Commands::Decode { hex, raw } = &cli.command {
        match commands::decode(hex, *raw, unknown_fields) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Config file and PARLEY_* environment first, then flags
    let mut config = ClientConfig::load()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.tls || cli.ca_cert.is_some() {
        config.tls.enabled = true;
    }
    if let Some(path) = cli.ca_cert {
        config.tls.ca_cert_path = Some(path);
    }
    if let Some(name) = cli.server_name {
        config.tls.server_name = Some(name);
    }
    if cli.no_compression {
        config.compression.enabled = false;
    }
    if cli.strict {
        config.unknown_fields = unknown_fields;
    }
    config.validate()?;

    let client = Client::new(config.to_connection_config());
    // subscribe before connecting so no push is missed
    let mut pushes = client.subscribe_spontaneous();

    if let Err(e) = client.connect().await {
        eprintln!("{}: {}", "Connection failed".red(), e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Watch => {
            eprintln!(
                "{} {}:{}",
                "Watching".green(),
                config.host.cyan(),
                config.port
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            let mut status = client.connection().subscribe_status();
            loop {
                tokio::select! {
                    push = pushes.recv() => {
                        match push {
                            Ok(packet) => println!("{}", serde_json::to_string(&packet)?),
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} packets", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => {
                                eprintln!("{}", "Connection closed".red());
                                break;
                            }
                        }
                    }
                    changed = status.changed() => {
                        if changed.is_err() || *status.borrow() == ConnectionStatus::Disconnected {
                            eprintln!("{}", "Connection closed".red());
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }
        }
        cmd => match commands::execute(&client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                report(e.as_ref());
                client.close().await;
                std::process::exit(1);
            }
        },
    }

    client.close().await;
    Ok(())
}

fn report(e: &(dyn std::error::Error + 'static)) {
    match e.downcast_ref::<ClientError>() {
        Some(err @ ClientError::Status { .. }) => {
            let code = match err.status_code() {
                Some(code) => code.to_string(),
                None => "UNKNOWN".to_string(),
            };
            eprintln!("{} {}: {}", "Server refused".red(), code.red().bold(), err);
        }
        _ => eprintln!("{}: {}", "Error".red(), e),
    }
}
