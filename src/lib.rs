//! StrandKV - embeddable, durable, transactional key-value store.
//!
//! Serializable multi-operation transactions over a leaf-chain B+tree with a
//! CRC-validated pager, value log, and write-ahead log; a TCP front-end
//! speaks length-prefixed JSON.

pub mod config;
pub mod error;
pub mod lock;
pub mod meta;
pub mod network;
pub mod server;
pub mod storage;
pub mod txn;

pub use config::Config;
pub use error::{Result, StrandError};
pub use network::{NetworkConfig, NetworkServer};
pub use server::DatabaseServer;
pub use storage::{Record, Store, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
