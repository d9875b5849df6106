use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Request, State},
  http::StatusCode,
  middleware::Next,
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
  prelude::*,
  state::AppState,
  sv::{Notice, Status},
};

pub const TOKEN_HEADER: &str = "x-license-token";

#[derive(Debug, Serialize)]
pub struct ActionRes {
  pub success: bool,
  pub message: String,
}

impl ActionRes {
  pub fn ok(message: impl Into<String>) -> Self {
    Self { success: true, message: message.into() }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self { success: false, message: message.into() }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::EmptyKey => StatusCode::BAD_REQUEST,
      Error::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
      Error::Transport(_) | Error::Protocol(_) | Error::Parse => {
        StatusCode::BAD_GATEWAY
      }
      Error::Database(_) | Error::Json(_) => {
        error!("Internal error: {self}");
        return (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(ActionRes::failed("internal error")),
        )
          .into_response();
      }
    };

    (status, Json(ActionRes::failed(self.to_string()))).into_response()
  }
}

pub async fn require_token(
  State(app): State<Arc<AppState>>,
  req: Request,
  next: Next,
) -> Response {
  let token = req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok());

  if app.secret.is_empty() || token != Some(app.secret.as_str()) {
    warn!("Rejected {} {}: bad token", req.method(), req.uri().path());
    return (
      StatusCode::FORBIDDEN,
      Json(ActionRes::failed("security check failed")),
    )
      .into_response();
  }

  next.run(req).await
}

pub async fn health() -> &'static str {
  "OK"
}

#[derive(Debug, Serialize)]
pub struct LicenseView {
  /// Masked; the full key never leaves the store through this API.
  pub key: String,
  pub status: Status,
  pub active: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notice: Option<Notice>,
}

pub async fn license(
  State(app): State<Arc<AppState>>,
) -> Result<Json<LicenseView>> {
  let sv = app.sv();
  let status = sv.store.status().await?;

  Ok(Json(LicenseView {
    key: utils::mask(&sv.store.key().await?),
    status,
    active: status == Status::Active,
    notice: sv.guard.take_notice().await?,
  }))
}

#[derive(Debug, Deserialize)]
pub struct SettingsReq {
  #[serde(default)]
  pub license_key: String,
}

pub async fn save_settings(
  State(app): State<Arc<AppState>>,
  Json(req): Json<SettingsReq>,
) -> Result<Json<ActionRes>> {
  let sv = app.sv();

  let key = sv.guard.on_save(&req.license_key).await?;
  sv.store.set_key(&key).await?;

  Ok(Json(ActionRes::ok("settings saved")))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Activate,
  Deactivate,
  CheckStatus,
}

#[derive(Debug, Deserialize)]
pub struct ActionReq {
  pub action: Action,
  #[serde(default)]
  pub license_key: Option<String>,
}

pub async fn action(
  State(app): State<Arc<AppState>>,
  Json(req): Json<ActionReq>,
) -> Result<Json<ActionRes>> {
  let license = app.sv().license;

  let message = match req.action {
    Action::Activate => license
      .activate(req.license_key.as_deref())
      .await?
      .message
      .unwrap_or_else(|| "license activated successfully".into()),
    Action::Deactivate => return deactivate(&app).await,
    Action::CheckStatus => {
      let reply = license.check_status().await?;
      reply.message.unwrap_or_else(|| {
        format!("license status: {}", reply.status.as_deref().unwrap_or(""))
      })
    }
  };

  Ok(Json(ActionRes::ok(message)))
}

/// The user asked to drop the license; an unreachable or unhappy server must
/// not keep the features switched on.
async fn deactivate(app: &AppState) -> Result<Json<ActionRes>> {
  let sv = app.sv();

  match sv.license.deactivate().await {
    Ok(reply) => Ok(Json(ActionRes::ok(reply.message.unwrap_or_default()))),
    Err(err) if err.is_remote() => {
      warn!("Deactivation not confirmed by server ({err}), clearing locally");
      sv.store.set_status(Status::Inactive).await?;
      Ok(Json(ActionRes::ok(
        "license deactivated locally (license server call failed)",
      )))
    }
    Err(err) => Err(err),
  }
}

#[derive(Debug, Serialize)]
pub struct FeatureRes {
  pub feature: String,
  pub available: bool,
}

pub async fn feature(
  State(app): State<Arc<AppState>>,
  Path(name): Path<String>,
) -> Result<Json<FeatureRes>> {
  let available = app.sv().gate.allows(&name).await?;
  Ok(Json(FeatureRes { feature: name, available }))
}
