//! Toolbridge CLI, the main entry point.
//!
//! Commands:
//! - `chat`        Interactive chat or single-message mode
//! - `tools`       List the tools every adapter provides
//! - `serve-tools` Serve the local tools over stdio JSON-RPC
//! - `gateway`     Start the HTTP session server
//! - `onboard`     Write a default config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolbridge",
    about = "Toolbridge: a tool-augmented assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.toolbridge/config.toml
    #[arg(long, global = true, env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Name the assistant should address
        #[arg(short, long, env = "USER", default_value = "cli-user")]
        user: String,

        /// Only offer this tool (repeatable). All tools when omitted.
        #[arg(short, long = "tool", value_name = "NAME")]
        tools: Vec<String>,
    },

    /// List the tools every adapter provides
    Tools,

    /// Serve the local tools as a line-delimited JSON-RPC server on stdio
    ServeTools,

    /// Start the HTTP gateway
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a default configuration file
    Onboard,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // stdout belongs to the conversation (or the JSON-RPC stream).
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            message,
            user,
            tools,
        } => commands::chat::run(config, message, user, tools).await?,
        Commands::Tools => commands::tools::run(config).await?,
        Commands::ServeTools => commands::serve_tools::run(config).await?,
        Commands::Gateway { port } => commands::gateway::run(config, port).await?,
        Commands::Onboard => commands::onboard::run(config)?,
    }

    Ok(())
}
