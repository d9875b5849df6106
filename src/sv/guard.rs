//! Automatic activation when a new license key is saved.
//!
//! Saving settings must not block on UI, must not recurse into itself and
//! must not start a second activation while one is running. The decision is
//! [`should_activate`]; the effect runs under a [`Lock`] and leaves a
//! [`Notice`] behind for whoever renders the settings next.

use std::{future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::{
  prelude::*,
  state::Config,
  sv::{License, Status, Transients},
};

/// Whether saving `incoming` should trigger an activation.
pub fn should_activate(
  incoming: &str,
  stored_key: &str,
  stored_status: Status,
  locked: bool,
) -> bool {
  !incoming.is_empty()
    && (incoming != stored_key || stored_status != Status::Active)
    && !locked
}

/// Outcome of the last automatic activation, read once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
  pub success: bool,
  pub message: String,
}

/// Exclusive transient held for the duration of one future.
///
/// Every acquisition stores its own token and only that token releases the
/// entry, so a holder that outlived the TTL cannot free its successor. The
/// TTL only matters if the process dies mid-run; otherwise the lock is
/// released on every way out of [`Lock::run`], panics and cancellation
/// included.
pub struct Lock {
  store: Arc<dyn Transients>,
  name: String,
  ttl: Duration,
}

impl Lock {
  pub fn new(store: Arc<dyn Transients>, name: String, ttl: Duration) -> Self {
    Self { store, name, ttl }
  }

  /// Runs `fut` if the lock could be taken, `Ok(None)` if someone holds it.
  pub async fn run<F, T>(&self, fut: F) -> Result<Option<T>>
  where
    F: Future<Output = T>,
  {
    let token = utils::nonce();
    if !self.store.add(&self.name, &token, self.ttl).await? {
      return Ok(None);
    }

    let mut held = Held {
      store: self.store.clone(),
      name: self.name.clone(),
      token,
      armed: true,
    };

    let outcome = AssertUnwindSafe(fut).catch_unwind().await;
    if let Err(err) = held.release().await {
      error!("Failed to release `{}`, retrying later: {err}", self.name);
    }

    match outcome {
      Ok(value) => Ok(Some(value)),
      Err(panic) => std::panic::resume_unwind(panic),
    }
  }
}

/// A taken lock. Dropped while still armed, it releases in the background.
struct Held {
  store: Arc<dyn Transients>,
  name: String,
  token: String,
  armed: bool,
}

impl Held {
  async fn release(&mut self) -> Result<()> {
    let released = self.store.release(&self.name, &self.token).await?;
    self.armed = false;

    if !released {
      warn!("Lock `{}` expired before it was released", self.name);
    }
    Ok(())
  }
}

impl Drop for Held {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!("Lock `{}` dropped outside a runtime, left to expire", self.name);
      return;
    };

    let store = self.store.clone();
    let name = std::mem::take(&mut self.name);
    let token = std::mem::take(&mut self.token);

    runtime.spawn(async move {
      match store.release(&name, &token).await {
        Ok(_) => debug!("Lock `{name}` released after cancellation"),
        Err(err) => error!("Failed to release `{name}`: {err}"),
      }
    });
  }
}

pub struct Guard<'a> {
  license: License<'a>,
  transients: &'a Arc<dyn Transients>,
  config: &'a Config,
}

impl<'a> Guard<'a> {
  pub fn new(
    license: License<'a>,
    transients: &'a Arc<dyn Transients>,
    config: &'a Config,
  ) -> Self {
    Self { license, transients, config }
  }

  /// Hook for the settings save path. Returns the key the caller should
  /// persist; activates it first when it is new or not yet active.
  pub async fn on_save(&self, incoming: &str) -> Result<String> {
    let key = incoming.trim();
    let store = self.license.store();

    let stored_key = store.key().await?;
    let stored_status = store.status().await?;
    let locked =
      self.transients.get(&self.config.lock_name()).await?.is_some();

    if !should_activate(key, &stored_key, stored_status, locked) {
      debug!("Key {} saved without activation", utils::mask(key));
      return Ok(key.to_string());
    }

    let lock = Lock::new(
      self.transients.clone(),
      self.config.lock_name(),
      self.config.lock_ttl,
    );

    if lock.run(self.activate(key)).await?.is_none() {
      info!("Activation already in flight, skipping");
    }

    Ok(key.to_string())
  }

  /// Once the server was asked, the save goes through; bookkeeping failures
  /// past that point are only logged.
  async fn activate(&self, key: &str) {
    info!("Activating newly saved key {}", utils::mask(key));

    let notice = match self.license.activate(Some(key)).await {
      Ok(reply) => Notice {
        success: true,
        message: reply
          .message
          .unwrap_or_else(|| "new license key activated automatically".into()),
      },
      Err(err) => {
        // activate already records remote refusals; this also covers
        // storage failures and whatever it did not get to
        let store = self.license.store();
        if let Err(db_err) = store.set_status(Status::Inactive).await {
          error!("Failed to mark license inactive: {db_err}");
        }
        Notice { success: false, message: err.to_string() }
      }
    };

    if let Err(err) = self.post(&notice).await {
      error!("Failed to leave activation notice: {err}");
    }
  }

  async fn post(&self, notice: &Notice) -> Result<()> {
    self
      .transients
      .set(
        &self.config.notice_name(),
        &json::to_string(notice)?,
        self.config.notice_ttl,
      )
      .await
  }

  /// Takes the pending notice, if any. A second call returns `None`.
  pub async fn take_notice(&self) -> Result<Option<Notice>> {
    let name = self.config.notice_name();
    let Some(raw) = self.transients.get(&name).await? else {
      return Ok(None);
    };

    self.transients.delete(&name).await?;
    Ok(Some(json::from_str(&raw)?))
  }
}

#[cfg(test)]
mod tests {
  use json::json;
  use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
  };

  use super::*;
  use crate::{
    state::{AppState, Backend, tests::*},
    sv::transient::{Db, Memory},
  };

  async fn activation(server: &MockServer, body: json::Value, times: u64) {
    Mock::given(method("POST"))
      .and(path("/activate"))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .expect(times)
      .mount(server)
      .await;
  }

  async fn lock_held(app: &AppState) -> bool {
    app.transients.get(&app.config.lock_name()).await.unwrap().is_some()
  }

  #[test]
  fn test_should_activate() {
    use Status::*;

    assert!(!should_activate("", "", Inactive, false));
    assert!(!should_activate("", "ABC", Active, false));
    assert!(should_activate("ABC", "", Inactive, false));
    assert!(should_activate("ABC", "OLD", Active, false));
    assert!(should_activate("ABC", "ABC", Inactive, false));
    assert!(!should_activate("ABC", "ABC", Active, false));
    assert!(!should_activate("ABC", "", Inactive, true));
  }

  #[tokio::test]
  async fn test_empty_key_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    sv.store.set_key("OLD").await.unwrap();
    sv.store.set_status(Status::Active).await.unwrap();

    assert_eq!(sv.guard.on_save("  ").await.unwrap(), "");
    assert_eq!(sv.store.key().await.unwrap(), "OLD");
    assert_eq!(sv.store.status().await.unwrap(), Status::Active);
    assert_eq!(sv.guard.take_notice().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_same_active_key_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    sv.store.set_key("ABC123").await.unwrap();
    sv.store.set_status(Status::Active).await.unwrap();

    assert_eq!(sv.guard.on_save("ABC123").await.unwrap(), "ABC123");
    assert!(!lock_held(&app).await);
  }

  #[tokio::test]
  async fn test_new_key_activates() {
    let server = MockServer::start().await;
    activation(&server, json!({ "success": true }), 1).await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();

    assert!(!lock_held(&app).await);
    assert_eq!(sv.guard.on_save("ABC123").await.unwrap(), "ABC123");
    assert!(!lock_held(&app).await);

    assert_eq!(sv.store.key().await.unwrap(), "ABC123");
    assert_eq!(sv.store.status().await.unwrap(), Status::Active);

    let notice = sv.guard.take_notice().await.unwrap().unwrap();
    assert!(notice.success);
    assert_eq!(notice.message, "new license key activated automatically");

    // read once
    assert_eq!(sv.guard.take_notice().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_server_message_reaches_notice() {
    let server = MockServer::start().await;
    activation(
      &server,
      json!({ "success": true, "message": "Welcome aboard" }),
      1,
    )
    .await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();

    sv.guard.on_save("ABC123").await.unwrap();
    let notice = sv.guard.take_notice().await.unwrap().unwrap();
    assert_eq!(notice.message, "Welcome aboard");
  }

  #[tokio::test]
  async fn test_failed_activation() {
    let server = MockServer::start().await;
    activation(&server, json!({ "success": false, "message": "bad key" }), 1)
      .await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    sv.store.set_key("OLD").await.unwrap();
    sv.store.set_status(Status::Active).await.unwrap();

    assert_eq!(sv.guard.on_save("NEW").await.unwrap(), "NEW");
    assert!(!lock_held(&app).await);
    assert_eq!(sv.store.status().await.unwrap(), Status::Inactive);

    let notice = sv.guard.take_notice().await.unwrap().unwrap();
    assert_eq!(notice, Notice { success: false, message: "bad key".into() });
  }

  #[tokio::test]
  async fn test_held_lock_skips() {
    let server = MockServer::start().await;
    activation(&server, json!({ "success": true }), 0).await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    app
      .transients
      .set(&app.config.lock_name(), "1", Duration::from_secs(30))
      .await
      .unwrap();

    assert_eq!(sv.guard.on_save("ABC123").await.unwrap(), "ABC123");
    assert_eq!(sv.store.status().await.unwrap(), Status::Inactive);
  }

  #[tokio::test]
  async fn test_expired_lock_does_not_block() {
    let server = MockServer::start().await;
    activation(&server, json!({ "success": true }), 1).await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    app
      .transients
      .set(&app.config.lock_name(), "1", Duration::ZERO)
      .await
      .unwrap();

    sv.guard.on_save("ABC123").await.unwrap();
    assert!(sv.store.is_active().await.unwrap());
  }

  #[tokio::test]
  async fn test_concurrent_saves_activate_once() {
    let server = MockServer::start().await;

    for backend in [Backend::Database, Backend::Memory] {
      server.reset().await;
      Mock::given(method("POST"))
        .and(path("/activate"))
        .respond_with(
          ResponseTemplate::new(200)
            .set_body_json(json!({ "success": true }))
            .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

      let mut config = test_config(&server.uri());
      config.transients = backend;
      let app =
        AppState::with_db(setup_test_db().await, config, String::new())
          .unwrap();
      let sv = app.sv();

      let (a, b) =
        tokio::join!(sv.guard.on_save("ABC123"), sv.guard.on_save("ABC123"));
      assert_eq!(a.unwrap(), "ABC123");
      assert_eq!(b.unwrap(), "ABC123");

      assert!(!lock_held(&app).await);
      assert!(sv.store.is_active().await.unwrap());
      server.verify().await;
    }
  }

  struct NoMailbox(Memory);

  #[async_trait]
  impl Transients for NoMailbox {
    async fn get(&self, name: &str) -> Result<Option<String>> {
      self.0.get(name).await
    }

    async fn set(&self, _: &str, _: &str, _: Duration) -> Result<()> {
      Err(Error::Database(sea_orm::DbErr::Custom("disk full".into())))
    }

    async fn add(
      &self,
      name: &str,
      value: &str,
      ttl: Duration,
    ) -> Result<bool> {
      self.0.add(name, value, ttl).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
      self.0.delete(name).await
    }

    async fn release(&self, name: &str, value: &str) -> Result<bool> {
      self.0.release(name, value).await
    }

    async fn purge(&self) -> Result<u64> {
      self.0.purge().await
    }
  }

  #[tokio::test]
  async fn test_lost_notice_still_saves() {
    let server = MockServer::start().await;
    activation(&server, json!({ "success": true }), 1).await;

    let app = test_app(&server.uri()).await;
    let sv = app.sv();
    let transients: Arc<dyn Transients> = Arc::new(NoMailbox(Memory::new()));
    let guard = Guard::new(sv.license, &transients, &app.config);

    assert_eq!(guard.on_save("ABC123").await.unwrap(), "ABC123");
    assert!(sv.store.is_active().await.unwrap());
    assert_eq!(transients.get(&app.config.lock_name()).await.unwrap(), None);
  }

  fn memory() -> Arc<dyn Transients> {
    Arc::new(Memory::new())
  }

  #[tokio::test]
  async fn test_lock_released_on_panic() {
    let store = memory();

    let task = tokio::spawn({
      let store = store.clone();
      async move {
        let lock = Lock::new(store, "lock".into(), Duration::from_secs(30));
        lock
          .run(async {
            panic!("boom");
          })
          .await
      }
    });

    assert!(task.await.unwrap_err().is_panic());
    assert_eq!(store.get("lock").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_lock_released_on_error() {
    let store = memory();
    let lock = Lock::new(store.clone(), "lock".into(), Duration::from_secs(30));

    let out = lock
      .run(async { Err::<(), _>(Error::Rejected("nope".into())) })
      .await
      .unwrap();

    assert!(matches!(out, Some(Err(Error::Rejected(_)))));
    assert_eq!(store.get("lock").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_lock_released_when_cancelled() {
    let store = memory();
    let lock = Lock::new(store.clone(), "lock".into(), Duration::from_secs(30));

    let cancelled = time::timeout(
      Duration::from_millis(50),
      lock.run(std::future::pending::<()>()),
    )
    .await;
    assert!(cancelled.is_err());

    // the release runs on a spawned task
    for _ in 0..50 {
      if store.get("lock").await.unwrap().is_none() {
        break;
      }
      time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.get("lock").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_expired_holder_keeps_successor() {
    let stores: [Arc<dyn Transients>; 2] =
      [memory(), Arc::new(Db::new(setup_test_db().await))];

    for store in stores {
      let lock =
        Lock::new(store.clone(), "lock".into(), Duration::from_millis(100));

      let (ran, taken) = tokio::join!(
        lock.run(time::sleep(Duration::from_millis(300))),
        async {
          time::sleep(Duration::from_millis(150)).await;
          store.add("lock", "next", Duration::from_secs(30)).await.unwrap()
        }
      );

      assert!(ran.unwrap().is_some());
      assert!(taken);
      assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("next"));
    }
  }

  #[tokio::test]
  async fn test_lock_contended() {
    let store = memory();
    let ttl = Duration::from_secs(30);
    let outer = Lock::new(store.clone(), "lock".into(), ttl);
    let inner = Lock::new(store.clone(), "lock".into(), ttl);

    let nested = outer.run(inner.run(async { 1 })).await.unwrap().unwrap();
    assert!(nested.unwrap().is_none());
    assert_eq!(store.get("lock").await.unwrap(), None);
  }
}
