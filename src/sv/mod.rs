pub mod gate;
pub mod guard;
pub mod license;
pub mod remote;
pub mod store;
pub mod transient;

pub use gate::Gate;
pub use guard::{Guard, Lock, Notice};
pub use license::{License, Reply};
pub use remote::{Op, Payload, Remote};
pub use store::{Status, Store};
pub use transient::Transients;
