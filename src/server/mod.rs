//! Transaction execution plane: the bounded receiver queue, the worker
//! pool, and the core server that owns the storage stack.

pub mod database_server;
pub mod receiver;
pub mod worker;

pub use database_server::DatabaseServer;
pub use receiver::TransactionReceiver;
pub use worker::{OperationResult, TransactionResult, Worker};
