//! Transaction model: request validation, key-lock planning, and the
//! per-transaction overlay.

pub mod context;
pub mod request;

pub use context::{TransactionContext, TransactionState};
pub use request::{
    build_transaction_request, required_lock_mode, AssertExpectation, KeySpec, Operation,
    OperationType, TransactionRequest,
};
