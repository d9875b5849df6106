pub mod cron;
pub mod server;

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::state::AppState;

/// Long-running host service around the license core.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

pub struct App {
  plugins: Vec<Arc<dyn Plugin>>,
  restart_delay: Duration,
}

impl Default for App {
  fn default() -> Self {
    Self::new()
  }
}

impl App {
  pub fn new() -> Self {
    Self { plugins: Vec::new(), restart_delay: Duration::from_secs(5) }
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Arc::new(plugin));
    self
  }

  /// Spawns a supervisor per plugin that restarts it whenever it returns,
  /// fails or panics. Aborting a returned handle stops that plugin.
  pub fn run(self, app: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let delay = self.restart_delay;

    self
      .plugins
      .into_iter()
      .map(|plugin| {
        let app = app.clone();
        tokio::spawn(supervise(plugin, app, delay))
      })
      .collect()
  }
}

async fn supervise(
  plugin: Arc<dyn Plugin>,
  app: Arc<AppState>,
  delay: Duration,
) {
  let name = plugin.name();
  info!("SYSTEM: Service `{name}` initialized");

  loop {
    let handle = tokio::spawn({
      let app = app.clone();
      let plugin = plugin.clone();
      async move { plugin.start(app).await }
    });

    match handle.await {
      Ok(Ok(())) => warn!("Service `{name}` stopped unexpectedly (Ok)."),
      Ok(Err(err)) => error!("Service `{name}` crashed with error: {err:#}."),
      Err(join_err) if join_err.is_cancelled() => {
        info!("Service `{name}` shutdown.");
        break;
      }
      Err(_) => error!("Service `{name}` PANICKED!"),
    }

    sleep(delay).await;
    info!("SYSTEM: Restarting service `{name}`...");
  }
}
