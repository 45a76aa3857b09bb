//! Transaction requests: operations, the declared key table, and the
//! validation rules the worker relies on before taking any locks.

use crate::lock::LockMode;
use crate::storage::btree::{Record, ValueType};

/// Assert* operations are decoded and validated but the worker aborts on
/// them; evaluation is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Get,
    Set,
    Delete,
    AssertExists,
    AssertNotExists,
    AssertType,
    AssertIntEq,
    AssertBytesHashEq,
    AssertStringHashEq,
}

impl OperationType {
    pub fn is_assertion(self) -> bool {
        matches!(
            self,
            OperationType::AssertExists
                | OperationType::AssertNotExists
                | OperationType::AssertType
                | OperationType::AssertIntEq
                | OperationType::AssertBytesHashEq
                | OperationType::AssertStringHashEq
        )
    }
}

/// Lock strength an operation needs on its key.
pub fn required_lock_mode(op_type: OperationType) -> LockMode {
    match op_type {
        OperationType::Set | OperationType::Delete => LockMode::Exclusive,
        _ => LockMode::Shared,
    }
}

/// Expected outcome attached to an assertion operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssertExpectation {
    pub expected_type: Option<ValueType>,
    pub expected_int: Option<i64>,
    pub expected_hash: Option<String>,
}

/// Declared key with its lock mode; operations reference keys by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub id: u32,
    pub mode: LockMode,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op_type: OperationType,
    pub key_id: u32,
    pub key: String,
    pub value: Option<Record>,
    pub expected: Option<AssertExpectation>,
}

impl Operation {
    pub fn new(op_type: OperationType, key: &str) -> Self {
        Self {
            op_type,
            key_id: 0,
            key: key.to_string(),
            value: None,
            expected: None,
        }
    }

    pub fn set(key: &str, record: Record) -> Self {
        Self {
            value: Some(record),
            ..Self::new(OperationType::Set, key)
        }
    }

    pub fn get(key: &str) -> Self {
        Self::new(OperationType::Get, key)
    }

    pub fn delete(key: &str) -> Self {
        Self::new(OperationType::Delete, key)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionRequest {
    pub id: u64,
    pub keys: Vec<KeySpec>,
    pub operations: Vec<Operation>,
}

impl TransactionRequest {
    /// Structural validity: the worker takes no locks for a request that
    /// fails this.
    pub fn is_valid(&self) -> bool {
        if self.keys.is_empty() || self.operations.is_empty() {
            return false;
        }

        // Key ids must be unique and keys non-empty.
        for (index, spec) in self.keys.iter().enumerate() {
            if spec.key.is_empty() {
                return false;
            }
            if self.keys[..index].iter().any(|other| other.id == spec.id) {
                return false;
            }
        }

        self.operations.iter().all(|operation| {
            if operation.key.is_empty() {
                return false;
            }
            let Some(spec) = self.find_key(operation.key_id) else {
                return false;
            };
            if spec.key != operation.key {
                return false;
            }
            // Declared lock mode must be at least as strong as required.
            if required_lock_mode(operation.op_type) == LockMode::Exclusive
                && spec.mode != LockMode::Exclusive
            {
                return false;
            }
            // Values travel with Set and nothing else.
            if (operation.op_type == OperationType::Set) != operation.value.is_some() {
                return false;
            }
            // Expectations travel with assertions and nothing else.
            if operation.op_type.is_assertion() != operation.expected.is_some() {
                return false;
            }
            true
        })
    }

    pub fn find_key(&self, key_id: u32) -> Option<&KeySpec> {
        self.keys.iter().find(|spec| spec.id == key_id)
    }

    /// The key string an operation acts on, via its declared KeySpec.
    pub fn resolve_key(&self, operation: &Operation) -> Option<&str> {
        self.find_key(operation.key_id).map(|spec| spec.key.as_str())
    }
}

/// Build the declared key table from a flat operation list: one KeySpec per
/// distinct key in first-appearance order, strengthened to Exclusive when any
/// operation on that key writes.
pub fn build_transaction_request(txn_id: u64, mut operations: Vec<Operation>) -> TransactionRequest {
    let mut keys: Vec<KeySpec> = Vec::new();

    for operation in &mut operations {
        let required = required_lock_mode(operation.op_type);
        match keys.iter_mut().find(|spec| spec.key == operation.key) {
            Some(spec) => {
                if required == LockMode::Exclusive {
                    spec.mode = LockMode::Exclusive;
                }
                operation.key_id = spec.id;
            }
            None => {
                let id = keys.len() as u32;
                keys.push(KeySpec {
                    id,
                    mode: required,
                    key: operation.key.clone(),
                });
                operation.key_id = id;
            }
        }
    }

    TransactionRequest {
        id: txn_id,
        keys,
        operations,
    }
}
