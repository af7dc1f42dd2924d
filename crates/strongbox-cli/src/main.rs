mod cli;
mod config;
mod properties;
mod storage;

use std::io;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use strongbox_core::PropertiesFactory;
use strongbox_storage::LegacyMigration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Version => print_version(),
        Command::Health => run_health_check(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(&config, cli.config.as_deref())?,
        Command::Config(ConfigCommand::Show) => print!("{}", toml::to_string_pretty(&config)?),
        Command::Migrate => run_migration(&config)?,
        cmd => {
            let factory = storage::factory_from_config(&config)?;
            properties::handle(cmd, &factory, &mut io::stdout().lock())?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("strongbox {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of the encrypted storage path.
fn run_health_check(config: &config::Config) -> Result<()> {
    let factory = storage::factory_from_config(config)?;
    run_store_health(&factory)?;
    println!("Storage: ok");
    Ok(())
}

fn run_store_health(factory: &dyn PropertiesFactory) -> Result<()> {
    let probe = factory.properties("strongbox/health")?;
    let payload = b"ok";
    probe.put_bytes("probe", payload)?;
    let round_trip = probe.get_bytes("probe")?;
    probe.remove("probe")?;

    if round_trip != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config, path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let path = config::write_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_migration(config: &config::Config) -> Result<()> {
    let Some(legacy_path) = &config.legacy_database_path else {
        println!("No legacy database configured.");
        return Ok(());
    };
    let Some(tables) = storage::legacy_tables(legacy_path)? else {
        println!("Nothing to migrate: {} does not exist.", legacy_path.display());
        return Ok(());
    };

    let factory = storage::factory_from_config(config)?;
    let target = factory.properties(&config.migration_uri)?;
    let report = LegacyMigration::new(tables, target).run();
    for (entry, outcome) in &report.outcomes {
        println!("{} -> {}: {outcome}", entry.table, entry.property);
    }
    if !report.is_success() {
        color_eyre::eyre::bail!("legacy migration incomplete; failed tables were left in place");
    }
    Ok(())
}
