//! License lifecycle for premium features.
//!
//! - `sv::remote`: form-encoded client for the remote license authority
//! - `sv::store`: durable key and status, SeaORM over SQLite
//! - `sv::license`: validate / activate / deactivate / check_status
//! - `sv::guard`: activation on key save, under a cross-process lock
//! - `plugins`: admin HTTP API and the periodic recheck

pub mod entity;
pub mod error;
pub mod plugins;
pub mod prelude;
pub mod state;
pub mod sv;
pub(crate) mod utils;

pub use error::{Error, Result};
pub use state::{AppState, Config};
