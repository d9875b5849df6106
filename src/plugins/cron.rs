//! Periodic reconciliation with the license server.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::{plugins::Plugin, prelude::*, state::AppState};

pub struct Recheck;

#[async_trait]
impl Plugin for Recheck {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let period = app.config.recheck_interval;
    anyhow::ensure!(!period.is_zero(), "Recheck interval must be positive");

    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      interval.tick().await;
      recheck(&app).await;
    }
  }
}

/// One firing: refresh the status if a key is stored, sweep expired
/// transients. Failures are logged, the next tick tries again.
pub async fn recheck(app: &AppState) {
  let sv = app.sv();

  match sv.store.key().await {
    Ok(key) if key.is_empty() => debug!("No license key stored, skipping"),
    Ok(_) => match sv.license.check_status().await {
      Ok(reply) => info!(
        "License recheck: server reports `{}`",
        reply.status.as_deref().unwrap_or("inactive")
      ),
      Err(err) => warn!("License recheck failed: {err}"),
    },
    Err(err) => error!("Failed to read license key: {err}"),
  }

  match app.transients.purge().await {
    Ok(0) => {}
    Ok(n) => debug!("Purged {n} expired transients"),
    Err(err) => error!("Failed to purge transients: {err}"),
  }
}
