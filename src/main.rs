use std::error::Error;
use tracing_subscriber::EnvFilter;

use authors::config::Settings;
use authors::{db, Services};

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;
    let pool = db::init_pool(&settings);
    db::run_migrations(&pool)?;
    let services = Services::from_settings(&settings)?;

    authors::build(settings, pool, services).launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "failed to start");
        std::process::exit(1);
    }
}
