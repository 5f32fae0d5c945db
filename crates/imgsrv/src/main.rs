//! imgsrv - image derivative server with polygon extraction and
//! request coalescing.
//!
//! Sources are uploaded once; crops, rotations, resizes and grayscale
//! variants are computed on first request and served from disk afterwards.
//!
//! # Usage
//!
//! ```bash
//! # Run the HTTP server with an in-process coordinator
//! imgsrv serve
//!
//! # Multi-process: one coordinator, several workers
//! imgsrv coordinator --listen 127.0.0.1:61236
//! imgsrv serve --bind 0.0.0.0:8080 --coordinator 127.0.0.1:61236
//!
//! # Try a transform offline
//! imgsrv derive photo.jpg --polygon '[{x:10,y:10},{x:200,y:10},{x:200,y:90},{x:10,y:90}]' -o crop.jpg
//!
//! # View configuration
//! imgsrv config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod http;
mod logging;

/// imgsrv - image derivative server with polygon extraction and request coalescing.
#[derive(Parser, Debug)]
#[command(name = "imgsrv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve(cli::serve::ServeArgs),

    /// Run the designated reservation coordinator for multi-process deployments
    Coordinator(cli::coordinator::CoordinatorArgs),

    /// Apply a transform to a local image once, without the server
    Derive(cli::derive::DeriveArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match imgsrv_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `imgsrv config path`."
            );
            imgsrv_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("imgsrv v{}", imgsrv_core::VERSION);

    match cli.command {
        Commands::Serve(args) => cli::serve::execute(args, config).await,
        Commands::Coordinator(args) => cli::coordinator::execute(args, config).await,
        Commands::Derive(args) => cli::derive::execute(args, &config).await,
        Commands::Config(args) => cli::config::execute(args, &config).await,
    }
}
