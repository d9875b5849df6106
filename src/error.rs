//! Error types for license operations

use thiserror::Error;

/// Every way a license operation can fail.
///
/// `Display` output is the short, user-facing message; nothing here carries
/// internal detail beyond what the operation needs to explain itself.
#[derive(Debug, Error)]
pub enum Error {
  /// No license key was supplied or stored. No request was sent.
  #[error("license key cannot be empty")]
  EmptyKey,

  /// The license server could not be reached (DNS, connect, timeout).
  #[error("cannot reach license server: {0}")]
  Transport(String),

  /// The license server answered with a status other than 200.
  #[error("license server returned error status: {0}")]
  Protocol(u16),

  /// The response body was not valid JSON.
  #[error("cannot parse server response")]
  Parse,

  /// Well-formed response with `success = false`.
  #[error("{0}")]
  Rejected(String),

  #[error("storage error: {0}")]
  Database(#[from] sea_orm::DbErr),

  #[error("serialization error: {0}")]
  Json(#[from] json::Error),
}

impl Error {
  /// Failure reported by the license server or the path to it, as opposed
  /// to a local precondition or storage problem.
  pub fn is_remote(&self) -> bool {
    matches!(
      self,
      Error::Transport(_)
        | Error::Protocol(_)
        | Error::Parse
        | Error::Rejected(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
