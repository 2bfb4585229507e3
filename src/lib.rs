//! Order status push notifications for the shop backend.
//!
//! Order writes go through [`orders::OrderStore`], which runs the registered
//! [`orders::OrderWriteHook`]s inside the write transaction. The
//! [`notifier::OrderStatusNotifier`] hook queues pushes into the outbox and
//! [`outbox::process_next_task`] delivers them through a [`fcm::PushGateway`].
pub mod announce;
pub mod config;
pub mod db;
pub mod fcm;
pub mod model;
pub mod notifier;
pub mod orders;
pub mod outbox;
