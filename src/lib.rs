//! order-desk: an order counter server
//!
//! Clients talk to the server over TCP using length-prefixed frames that
//! carry JSON requests (or one of two plain text commands):
//! - Menu browsing, ordering and payment confirmation
//! - Account login, registration and removal
//! - Staff-only views of pending and completed orders and menu upkeep
//!
//! Orders, accounts and the menu are kept in SQLite.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod framing;
pub mod request;
pub mod server;
pub mod session;
pub mod store;
