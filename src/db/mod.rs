//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories for the delivery worker.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules import from `order_notifier::db`; the repository API and
//! the view models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewPush, PushForDelivery};
