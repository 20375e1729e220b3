use clap::Parser;
use cqdam_server::config::parse_memory_size;
use cqdam_server::{Config, Server};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Memory limit for the keyspace (e.g. 100mb, 1gb, or plain bytes)
    #[arg(long, value_parser = parse_memory_size)]
    max_memory: Option<usize>,

    /// Maximum number of connected clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Command-line values override the config file
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(max_memory) = args.max_memory {
        config.max_memory = Some(max_memory);
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        &config.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("cqdam_server={}", log_level))
        .init();

    info!(
        "Starting CQDAM Server v{} on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr()
    );
    match config.max_memory {
        Some(limit) => info!("Keyspace memory limit: {} bytes", limit),
        None => info!("No keyspace memory limit"),
    }
    if config.bind_addr != "127.0.0.1" && config.bind_addr != "localhost" {
        warn!(
            "Server is bound to {} and has no authentication; \
            any client that can reach it can read and modify every key",
            config.bind_addr
        );
    }

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    // Setup signal handlers for graceful shutdown
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        shutdown.shutdown();
    })?;

    // Run the server
    if let Err(e) = server.run() {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
