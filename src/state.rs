use std::env;

use migration::{Migrator, MigratorTrait};

use crate::{
  prelude::*,
  sv::{self, Transients},
};

pub const DEFAULT_API_URL: &str = "https://srv.wpcio.com/wp-json/wplm/v1";

/// Where locks and activation notices live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  /// Shared through the database, safe across processes.
  Database,
  /// Process-local.
  Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub plugin_name: String,
  pub version: String,
  pub slug: String,
  /// Base of the remote license API, without trailing slash.
  pub api_url: String,
  pub site_url: String,
  pub product_id: Option<i64>,
  pub key_option: String,
  pub status_option: String,
  pub timeout: Duration,
  pub lock_ttl: Duration,
  pub notice_ttl: Duration,
  pub recheck_interval: Duration,
  /// Features available without an active license.
  pub basic_features: HashSet<String>,
  pub transients: Backend,
}

impl Default for Config {
  fn default() -> Self {
    Self::new("License Manager", env!("CARGO_PKG_VERSION"))
  }
}

impl Config {
  pub fn new(plugin_name: &str, version: &str) -> Self {
    let mut slug = utils::slugify(plugin_name);
    if slug.is_empty() {
      slug = String::from("plugin");
    }

    Self {
      plugin_name: plugin_name.to_string(),
      version: version.to_string(),
      api_url: String::from(DEFAULT_API_URL),
      site_url: String::from("http://localhost"),
      product_id: None,
      key_option: format!("{slug}_license_key"),
      status_option: format!("{slug}_license_status"),
      timeout: Duration::from_secs(30),
      lock_ttl: Duration::from_secs(30),
      notice_ttl: Duration::from_secs(60),
      recheck_interval: Duration::from_secs(24 * 3600),
      basic_features: HashSet::new(),
      transients: Backend::Database,
      slug,
    }
  }

  pub fn with_api_url(mut self, url: &str) -> Self {
    self.api_url = url.trim_end_matches('/').to_string();
    self
  }

  pub fn from_env() -> anyhow::Result<Self> {
    let name =
      env::var("PLUGIN_NAME").unwrap_or_else(|_| "License Manager".into());
    let version = env::var("PLUGIN_VERSION")
      .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").into());

    let mut config = Self::new(&name, &version);

    if let Ok(url) = env::var("LICENSE_API_URL") {
      config = config.with_api_url(&url);
    }
    if let Ok(site) = env::var("SITE_URL") {
      config.site_url = site;
    }
    if let Ok(id) = env::var("PRODUCT_ID")
      && !id.trim().is_empty()
    {
      config.product_id =
        Some(id.trim().parse().context("Invalid PRODUCT_ID format")?);
    }
    if let Ok(option) = env::var("LICENSE_KEY_OPTION")
      && !option.is_empty()
    {
      config.key_option = option;
    }
    if let Ok(option) = env::var("LICENSE_STATUS_OPTION")
      && !option.is_empty()
    {
      config.status_option = option;
    }

    config.timeout = duration_var("LICENSE_TIMEOUT", config.timeout)?;
    config.lock_ttl = duration_var("LICENSE_LOCK_TTL", config.lock_ttl)?;
    config.notice_ttl = duration_var("LICENSE_NOTICE_TTL", config.notice_ttl)?;
    config.recheck_interval =
      duration_var("LICENSE_RECHECK_INTERVAL", config.recheck_interval)?;

    config.basic_features = env::var("BASIC_FEATURES")
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
      .collect();

    config.transients = match env::var("TRANSIENT_BACKEND").as_deref() {
      Err(_) | Ok("database") => Backend::Database,
      Ok("memory") => Backend::Memory,
      Ok(other) => anyhow::bail!("Unknown TRANSIENT_BACKEND `{other}`"),
    };

    Ok(config)
  }

  /// Transient marking an activation in flight.
  pub fn lock_name(&self) -> String {
    format!("{}_activating", self.slug)
  }

  /// Transient carrying the last automatic activation outcome.
  pub fn notice_name(&self) -> String {
    format!("{}_activation_result", self.slug)
  }

  pub fn user_agent(&self) -> String {
    format!("{}/{}", self.plugin_name, self.version)
  }
}

fn duration_var(var: &str, default: Duration) -> anyhow::Result<Duration> {
  match env::var(var) {
    Ok(raw) => humantime::parse_duration(raw.trim())
      .with_context(|| format!("Invalid duration in {var}: `{raw}`")),
    Err(_) => Ok(default),
  }
}

pub struct Services<'a> {
  pub store: sv::Store<'a>,
  pub license: sv::License<'a>,
  pub guard: sv::Guard<'a>,
  pub gate: sv::Gate<'a>,
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub config: Config,
  pub remote: sv::Remote,
  pub transients: Arc<dyn Transients>,
  /// Token the admin API expects on every request.
  pub secret: String,
}

impl AppState {
  pub async fn new(
    db_url: &str,
    config: Config,
    secret: String,
  ) -> anyhow::Result<Self> {
    info!("Connecting to database...");
    let db = Database::connect(db_url)
      .await
      .context("Failed to connect to database")?;

    info!("Running migrations...");
    Migrator::up(&db, None).await.context("Failed to run migrations")?;

    Self::with_db(db, config, secret)
  }

  pub fn with_db(
    db: DatabaseConnection,
    config: Config,
    secret: String,
  ) -> anyhow::Result<Self> {
    let transients: Arc<dyn Transients> = match config.transients {
      Backend::Database => Arc::new(sv::transient::Db::new(db.clone())),
      Backend::Memory => Arc::new(sv::transient::Memory::new()),
    };
    let remote =
      sv::Remote::new(&config).context("Failed to build HTTP client")?;

    Ok(Self { db, config, remote, transients, secret })
  }

  pub fn sv(&self) -> Services<'_> {
    let store = sv::Store::new(&self.db, &self.config);
    let license = sv::License::new(store, &self.remote);

    Services {
      store,
      license,
      guard: sv::Guard::new(
        license,
        &self.transients,
        &self.config,
      ),
      gate: sv::Gate::new(store, &self.config.basic_features),
    }
  }
}
