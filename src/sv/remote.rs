//! Client for the remote license authority.
//!
//! Every operation is one form-encoded POST to `{api_url}/{op}`; the outcome
//! is either the server-confirmed payload or a typed [`Error`]. Nothing is
//! retried here.

use std::fmt;

use json::Value;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::{prelude::*, state::Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Validate,
  Activate,
  Deactivate,
  Status,
}

impl Op {
  pub fn path(self) -> &'static str {
    match self {
      Op::Validate => "validate",
      Op::Activate => "activate",
      Op::Deactivate => "deactivate",
      Op::Status => "status",
    }
  }

  /// Message used when the server refuses without saying why.
  fn refusal(self) -> &'static str {
    match self {
      Op::Validate => "license validation failed",
      Op::Activate => "license activation failed",
      Op::Deactivate => "license deactivation failed",
      Op::Status => "license status check failed",
    }
  }
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.path())
  }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
  license_key: &'a str,
  site_url: &'a str,
  timestamp: i64,
  nonce: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  product_id: Option<i64>,
}

/// What the server sent back with `success = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
  pub message: Option<String>,
  /// The `license` object, `{}` when the server omitted it.
  pub license: Value,
}

impl Payload {
  /// `license.status` as reported by the server.
  pub fn status(&self) -> Option<&str> {
    self.license.get("status").and_then(Value::as_str)
  }
}

pub struct Remote {
  client: Client,
  api_url: String,
  site_url: String,
  product_id: Option<i64>,
}

impl Remote {
  pub fn new(config: &Config) -> reqwest::Result<Self> {
    let client = Client::builder()
      .user_agent(config.user_agent())
      .timeout(config.timeout)
      .build()?;

    Ok(Self {
      client,
      api_url: config.api_url.clone(),
      site_url: config.site_url.clone(),
      product_id: config.product_id,
    })
  }

  pub async fn call(&self, op: Op, key: &str) -> Result<Payload> {
    if key.is_empty() {
      return Err(Error::EmptyKey);
    }

    let request = Request {
      license_key: key,
      site_url: &self.site_url,
      timestamp: Utc::now().timestamp(),
      nonce: utils::nonce(),
      product_id: self.product_id,
    };

    let url = format!("{}/{}", self.api_url, op.path());
    debug!("POST {url} for key {}", utils::mask(key));

    let response = self
      .client
      .post(&url)
      .form(&request)
      .send()
      .await
      .map_err(|err| Error::Transport(transport_detail(&err)))?;

    let status = response.status();
    if status != StatusCode::OK {
      warn!("License server answered {op} with {status}");
      return Err(Error::Protocol(status.as_u16()));
    }

    let body = response
      .text()
      .await
      .map_err(|err| Error::Transport(transport_detail(&err)))?;

    parse(op, &body)
  }

  pub async fn validate(&self, key: &str) -> Result<Payload> {
    self.call(Op::Validate, key).await
  }

  pub async fn activate(&self, key: &str) -> Result<Payload> {
    self.call(Op::Activate, key).await
  }

  pub async fn deactivate(&self, key: &str) -> Result<Payload> {
    self.call(Op::Deactivate, key).await
  }

  pub async fn status(&self, key: &str) -> Result<Payload> {
    self.call(Op::Status, key).await
  }
}

fn transport_detail(err: &reqwest::Error) -> String {
  if err.is_timeout() {
    String::from("request timed out")
  } else if err.is_connect() {
    String::from("connection failed")
  } else {
    err.to_string()
  }
}

fn parse(op: Op, body: &str) -> Result<Payload> {
  let data: Value = json::from_str(body).map_err(|_| Error::Parse)?;

  let message =
    data.get("message").and_then(Value::as_str).map(str::to_string);

  if data.get("success").and_then(Value::as_bool).unwrap_or(false) {
    let license =
      data.get("license").cloned().unwrap_or_else(|| json::json!({}));
    Ok(Payload { message, license })
  } else {
    Err(Error::Rejected(message.unwrap_or_else(|| op.refusal().to_string())))
  }
}
