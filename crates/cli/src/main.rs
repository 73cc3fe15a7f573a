use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "forumrelay")]
#[command(about = "Relay private Telegram chats into per-user forum topics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: FORUMRELAY_CONFIG_PATH or ~/.forumrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay: webhook (or long-poll) listener plus the relay worker.
    #[command(alias = "gateway")]
    Run {
        /// Config file path (default: FORUMRELAY_CONFIG_PATH or ~/.forumrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config, PORT env, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the persisted topic directory and correlation count.
    State {
        /// Config file path (default: FORUMRELAY_CONFIG_PATH or ~/.forumrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("forumrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::State { config }) => {
            if let Err(e) = run_state(config).await {
                log::error!("state failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    config.gateway.port = port.unwrap_or_else(|| lib::config::resolve_gateway_port(&config));
    log::info!("starting forumrelay with config {}", path.display());
    lib::gateway::run_gateway(config, path).await
}

async fn run_state(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    let state_path = lib::config::resolve_state_path(&config, &path);
    let snapshot = lib::relay::snapshot::SnapshotStore::new(&state_path)
        .load()
        .await?;
    let (directory, correlations) = snapshot.restore();
    println!("state file: {}", state_path.display());
    println!("topics: {}", directory.len());
    println!("correlations: {}", correlations.len());
    for (user, topic) in directory.user_topics() {
        println!("  user {} -> topic {}", user, topic);
    }
    Ok(())
}
