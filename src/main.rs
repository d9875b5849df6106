use std::{env, sync::Arc};

use anyhow::Context;
use license_manager::{
  plugins::{App, cron, server},
  state::{AppState, Config},
};
use tracing::info;
use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "license_manager=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = Config::from_env()?;
  let db_url = env::var("DATABASE_URL")
    .unwrap_or_else(|_| "sqlite:license.db?mode=rwc".into());
  let secret = env::var("SERVER_SECRET").context("SERVER_SECRET not set")?;

  info!(
    "Starting {} license manager v{} against {}",
    config.plugin_name, config.version, config.api_url
  );

  let app = Arc::new(AppState::new(&db_url, config, secret).await?);

  let handles = App::new()
    .register(server::Plugin)
    .register(cron::Recheck)
    .run(app);

  tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
  info!("Shutting down");

  for handle in handles {
    handle.abort();
  }

  Ok(())
}
