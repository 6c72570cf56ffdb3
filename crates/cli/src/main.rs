use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "linecord")]
#[command(about = "Relay messages between a LINE group and Discord", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay: LINE webhook listener plus the Discord gateway connection.
    Run {
        /// Config file path (default: LINECORD_CONFIG_PATH or ~/.linecord/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Webhook listener port (default from PORT, config, or 5000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Load the configuration and report missing credentials without connecting anywhere.
    CheckConfig {
        /// Config file path (default: LINECORD_CONFIG_PATH or ~/.linecord/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // .env first, so a RUST_LOG set there reaches the logger.
    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Ok(path) = dotenv {
        log::debug!("loaded environment from {}", path.display());
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("linecord {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run_relay(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            if let Err(e) = check_config(config) {
                log::error!("{:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_relay(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting relay on {}:{} (config: {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    lib::server::run_relay(config).await
}

fn check_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    println!("config file: {}", path.display());
    println!("listen: {}:{}", config.gateway.bind, config.gateway.port);
    println!("line api: {}", lib::config::resolve_line_api_base(&config));
    println!("discord gateway: {}", lib::config::resolve_discord_gateway_url(&config));
    match config.discord.channel_id.as_deref() {
        Some(id) => println!("discord channel filter: {}", id),
        None => println!("discord channel filter: none (all channels)"),
    }
    let missing = config.missing_credentials();
    if missing.is_empty() {
        println!("credentials: complete");
        Ok(())
    } else {
        anyhow::bail!("missing required configuration: {}", missing.join(", "))
    }
}
