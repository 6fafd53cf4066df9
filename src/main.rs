use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use complaint_locator::acquisition::{
    AcquisitionController, AcquisitionObserver, AcquisitionState, Advisory,
};
use complaint_locator::config::Config;
use complaint_locator::format::format_coordinates;
use complaint_locator::geo::Coordinate;
use complaint_locator::position::now_ms;
use complaint_locator::replay::{ReplayScript, ScriptedPositionSource};
use complaint_locator::status::controller_status;
use complaint_locator::store::LastGoodFix;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Acquire a stable location and a readable address for a complaint"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Replay a script of position fixes through the full pipeline
    Locate {
        /// YAML script of watch events and the network fallback answer
        #[arg(long, value_name = "FILE")]
        fixes: PathBuf,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Look up the address of a single coordinate
    Resolve {
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show the persisted last known good fix
    LastGood {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// Prints advisories the way the form would show them
struct ConsoleObserver;

impl AcquisitionObserver for ConsoleObserver {
    fn on_state(&self, state: AcquisitionState) {
        info!("Location status: {state}");
    }

    fn on_advisory(&self, advisory: Advisory) {
        println!("Advisory: {advisory}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => init_config(config, *force),
        Commands::Locate { fixes, config } => {
            let config_data = load_config(config)?;
            locate(&config_data, fixes).await
        }
        Commands::Resolve { lat, lng, config } => {
            let config_data = load_config(config)?;
            let resolver = config_data.build_resolver()?;

            let resolved = resolver.resolve_now(Coordinate::new(*lat, *lng)).await;
            println!("{}", resolved.text);
            Ok(())
        }
        Commands::LastGood { config } => {
            let config_data = load_config(config)?;
            let store = config_data.open_store();

            match LastGoodFix::load(&store, &config_data.storage.last_good_key) {
                Some(fix) => {
                    println!("Last good fix: {}", format_coordinates(fix.coordinate()));
                    println!("Age: {}s", fix.age_ms(now_ms()) / 1000);
                }
                None => println!("No last good fix recorded in {}", store.path().display()),
            }
            Ok(())
        }
    }
}

async fn locate(config: &Config, fixes: &Path) -> Result<()> {
    let script = ReplayScript::load_from_file(fixes)?;
    println!(
        "Replaying {} watch events from {}",
        script.watch.len(),
        fixes.display()
    );

    let resolver = Arc::new(config.build_resolver()?);
    let mut controller = AcquisitionController::new(
        Arc::new(ScriptedPositionSource::new(script)),
        Arc::new(config.open_store()),
        resolver.clone(),
    )
    .with_observer(Arc::new(ConsoleObserver))
    .with_config(config.acquisition.clone(), config.filter.clone())
    .with_last_good_key(config.storage.last_good_key.as_str());

    let state = controller.begin().await;
    resolver.wait_idle().await;

    println!("State: {state}");
    match controller.current_fix() {
        Some(fix) => println!("Coordinate: {}", format_coordinates(fix.coordinate)),
        None => println!("Coordinate: none"),
    }
    println!("{}", controller_status(&controller, now_ms()));

    let address = resolver.current_address();
    if address.is_empty() {
        println!("Address: none");
    } else {
        println!("Address: {address}");
    }

    Ok(())
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'complaint-locator init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
