//! SeaORM entities for the license state database

pub mod option;
pub mod transient;
