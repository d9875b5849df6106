use json::Value;
use serde::Serialize;

use crate::{
  prelude::*,
  sv::{Op, Payload, Remote, Status, Store},
};

/// Successful outcome of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub license: Value,
  /// Raw `license.status` reported by the server; only set by
  /// [`License::check_status`].
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

impl From<Payload> for Reply {
  fn from(payload: Payload) -> Self {
    Self { message: payload.message, license: payload.license, status: None }
  }
}

/// License lifecycle: every status transition is driven by a server answer.
#[derive(Clone, Copy)]
pub struct License<'a> {
  store: Store<'a>,
  remote: &'a Remote,
}

impl<'a> License<'a> {
  pub fn new(store: Store<'a>, remote: &'a Remote) -> Self {
    Self { store, remote }
  }

  pub fn store(&self) -> Store<'a> {
    self.store
  }

  pub async fn is_active(&self) -> Result<bool> {
    self.store.is_active().await
  }

  /// Explicit non-empty key, else the stored one.
  async fn resolve(&self, key: Option<&str>) -> Result<String> {
    match key {
      Some(key) if !key.is_empty() => Ok(key.to_string()),
      _ => self.store.key().await,
    }
  }

  async fn confirm(&self, op: Op, payload: Payload) -> Result<Reply> {
    self.store.set_status(Status::Active).await?;
    info!("License {op} confirmed, status active");
    Ok(payload.into())
  }

  /// Records a failed remote answer as `inactive` and hands the error back.
  async fn revoke(&self, op: Op, err: Error) -> Result<Reply> {
    if matches!(err, Error::EmptyKey) {
      return Err(err);
    }

    warn!("License {op} failed: {err}");
    self.store.set_status(Status::Inactive).await?;
    Err(err)
  }

  pub async fn validate(&self, key: Option<&str>) -> Result<Reply> {
    let key = self.resolve(key).await?;

    match self.remote.validate(&key).await {
      Ok(payload) => self.confirm(Op::Validate, payload).await,
      Err(err) => self.revoke(Op::Validate, err).await,
    }
  }

  /// Persists the key before asking the server, so a failed activation can
  /// be retried or rechecked without entering the key again.
  pub async fn activate(&self, key: Option<&str>) -> Result<Reply> {
    let key = self.resolve(key).await?;
    if key.is_empty() {
      return Err(Error::EmptyKey);
    }

    self.store.set_key(&key).await?;

    match self.remote.activate(&key).await {
      Ok(payload) => self.confirm(Op::Activate, payload).await,
      Err(err) => self.revoke(Op::Activate, err).await,
    }
  }

  /// Leaves the status untouched when the server does not confirm; callers
  /// decide whether to clear it locally anyway.
  pub async fn deactivate(&self) -> Result<Reply> {
    let key = self.store.key().await?;
    let payload = self.remote.deactivate(&key).await?;

    self.store.set_status(Status::Inactive).await?;
    info!("License {} deactivated", utils::mask(&key));

    Ok(Reply {
      message: Some(
        payload
          .message
          .unwrap_or_else(|| "license deactivated successfully".into()),
      ),
      license: payload.license,
      status: None,
    })
  }

  pub async fn check_status(&self) -> Result<Reply> {
    let key = self.store.key().await?;

    let payload = match self.remote.status(&key).await {
      Ok(payload) => payload,
      Err(err) => return self.revoke(Op::Status, err).await,
    };

    let reported = payload.status().unwrap_or("inactive").to_string();
    let status = Status::parse(&reported);
    self.store.set_status(status).await?;
    debug!("License status reported `{reported}`, stored {status}");

    Ok(Reply {
      message: payload.message,
      license: payload.license,
      status: Some(reported),
    })
  }
}
