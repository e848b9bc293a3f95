//! MCP session server CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use mcp_session::transport::StdioTransport;
use mcp_session::utils::logging::init_logging;
use mcp_session::{Config, McpServerBuilder, PROTOCOL_VERSION};

/// MCP session server
#[derive(Parser)]
#[command(name = "mcp-session")]
#[command(about = "A Model Context Protocol server session over stdio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdio
    Serve {
        /// Server name
        #[arg(long)]
        name: Option<String>,

        /// Server version
        #[arg(long)]
        version: Option<String>,

        /// Instructions surfaced to the client
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "mcp-session.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            name,
            version,
            instructions,
        }) => serve(cli.config, name, version, instructions).await,
        Some(Commands::Config { output, force }) => generate_config(output, force),
        Some(Commands::Validate { file }) => validate_config(file),
        Some(Commands::Info) => {
            show_info();
            Ok(())
        }
        None => serve(cli.config, None, None, None).await,
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    name: Option<String>,
    version: Option<String>,
    instructions: Option<String>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(name) = name {
        config.server.name = name;
    }
    if let Some(version) = version {
        config.server.version = version;
    }
    if let Some(instructions) = instructions {
        config.server.instructions = Some(instructions);
    }

    init_logging(&config.logging)?;
    info!(
        "starting {} {} over stdio",
        config.server.name, config.server.version
    );

    let transport = StdioTransport::with_buffer_size(config.transport.stdio.buffer_size);
    let server = McpServerBuilder::new()
        .config(config)
        .build(Arc::new(transport))?;

    server.run().await.context("session failed")?;

    info!("session ended");
    Ok(())
}

fn generate_config(output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "configuration file already exists: {} (use --force to overwrite)",
            output.display()
        );
    }

    let config = Config::default();
    config.to_file(&output)?;

    println!("generated configuration file: {}", output.display());
    Ok(())
}

fn validate_config(file: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&file)?;
    config.validate()?;

    println!("configuration file is valid: {}", file.display());
    Ok(())
}

fn show_info() {
    println!("mcp-session {}", env!("CARGO_PKG_VERSION"));
    println!("protocol version: {}", PROTOCOL_VERSION);
    println!();
    println!("features:");
    println!("  - stdio transport (newline-framed JSON-RPC)");
    println!("  - tools, resources, resource templates, prompts");
    println!("  - argument completion for prompts and templates");
    println!("  - client sampling and roots integration");
    println!("  - log forwarding with client-controlled levels");
}
