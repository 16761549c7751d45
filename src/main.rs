use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use warden::authn::PluginRegistry;
use warden::security::SecurityService;
use warden::settings::Settings;
use warden::store::FileStore;
use warden::web;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Rule-based access control with a live security configuration"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let store = FileStore::open(&settings.security.path)?;
    let security = SecurityService::open(
        Arc::new(store),
        Arc::new(PluginRegistry::default()),
        Arc::new(settings.permission_names.clone()),
    )?;

    web::serve(&settings, Arc::new(security)).await?;
    Ok(())
}
