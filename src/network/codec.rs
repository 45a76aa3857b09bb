//! Wire codec: JSON transaction requests and responses.
//!
//! Requests are decoded strictly: wrong shapes, out-of-range ids, unknown
//! operation types, or misplaced fields all read as "no request", which
//! closes the connection. Extra unknown fields are tolerated.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value as Json};

use crate::server::worker::TransactionResult;
use crate::storage::btree::{Record, Value, ValueType};
use crate::txn::{
    build_transaction_request, AssertExpectation, Operation, OperationType, TransactionRequest,
    TransactionState,
};

/// Decode a framed JSON payload into a validated transaction request.
pub fn decode_request(payload: &[u8]) -> Option<TransactionRequest> {
    let json: Json = serde_json::from_slice(payload).ok()?;
    let object = json.as_object()?;

    let txn_id = object.get("txn_id")?.as_u64()?;
    if txn_id > i64::MAX as u64 {
        return None;
    }

    let operations = object.get("operations")?.as_array()?;
    if operations.is_empty() {
        return None;
    }

    let decoded: Option<Vec<Operation>> = operations.iter().map(decode_operation).collect();
    let request = build_transaction_request(txn_id, decoded?);
    request.is_valid().then_some(request)
}

fn decode_operation(operation_json: &Json) -> Option<Operation> {
    let object = operation_json.as_object()?;

    let op_type = operation_type_from_str(object.get("type")?.as_str()?)?;
    let key = object.get("key")?.as_str()?;
    if key.is_empty() {
        return None;
    }

    let mut operation = Operation::new(op_type, key);
    match op_type {
        OperationType::Set => {
            operation.value = Some(decode_record(object.get("value")?)?);
        }
        OperationType::Delete | OperationType::AssertExists | OperationType::AssertNotExists => {
            // No value payload permitted on these.
            if object.contains_key("value") {
                return None;
            }
            if op_type.is_assertion() {
                operation.expected = Some(AssertExpectation::default());
            }
        }
        OperationType::Get => {
            // A value on a get is tolerated but must still decode.
            if let Some(value_json) = object.get("value") {
                decode_record(value_json)?;
            }
        }
        OperationType::AssertType => {
            let expected_type = value_type_from_str(object.get("expected_type")?.as_str()?)?;
            operation.expected = Some(AssertExpectation {
                expected_type: Some(expected_type),
                ..Default::default()
            });
        }
        OperationType::AssertIntEq => {
            let expected_int = object.get("expected_int")?.as_i64()?;
            operation.expected = Some(AssertExpectation {
                expected_int: Some(expected_int),
                ..Default::default()
            });
        }
        OperationType::AssertBytesHashEq | OperationType::AssertStringHashEq => {
            let expected_hash = object.get("expected_hash")?.as_str()?;
            operation.expected = Some(AssertExpectation {
                expected_hash: Some(expected_hash.to_string()),
                ..Default::default()
            });
        }
    }

    Some(operation)
}

/// Decode a record envelope: `{kind, data, metadata?}`.
pub fn decode_record(value_json: &Json) -> Option<Record> {
    let object = value_json.as_object()?;
    let kind = object.get("kind")?.as_str()?;
    let data = object.get("data")?;

    let ttl_epoch_seconds = object
        .get("metadata")
        .and_then(Json::as_object)
        .and_then(|metadata| metadata.get("ttl_epoch_seconds"))
        .and_then(Json::as_u64)
        .unwrap_or(0);

    let value = match kind {
        "bytes" => Value::Bytes(BASE64.decode(data.as_str()?).ok()?),
        "string" => Value::Str(data.as_str()?.to_string()),
        "int" => Value::I64(data.as_i64()?),
        _ => return None,
    };

    Some(Record::with_ttl(value, ttl_epoch_seconds))
}

/// Encode a record envelope. Unresolved value-log references have no wire
/// form and yield `None`.
pub fn encode_record(record: &Record) -> Option<Json> {
    let mut object = Map::new();
    match &record.value {
        Value::Bytes(bytes) => {
            object.insert("kind".into(), json!("bytes"));
            object.insert("data".into(), json!(BASE64.encode(bytes)));
        }
        Value::Str(s) => {
            object.insert("kind".into(), json!("string"));
            object.insert("data".into(), json!(s));
        }
        Value::I64(v) => {
            object.insert("kind".into(), json!("int"));
            object.insert("data".into(), json!(v));
        }
        Value::Ref(_) => return None,
    }

    if record.metadata.ttl_epoch_seconds != 0 {
        object.insert(
            "metadata".into(),
            json!({ "ttl_epoch_seconds": record.metadata.ttl_epoch_seconds }),
        );
    }
    Some(Json::Object(object))
}

/// Encode a transaction result as a response object.
pub fn encode_response(result: &TransactionResult) -> Json {
    let operations: Vec<Json> = result
        .operations
        .iter()
        .map(|op_result| {
            let mut object = Map::new();
            object.insert("type".into(), json!(operation_type_to_str(op_result.op_type)));
            object.insert("key_id".into(), json!(op_result.key_id));
            object.insert("key".into(), json!(op_result.key));
            object.insert("success".into(), json!(op_result.success));
            if let Some(encoded) = op_result.value.as_ref().and_then(encode_record) {
                object.insert("value".into(), encoded);
            }
            Json::Object(object)
        })
        .collect();

    json!({
        "txn_id": result.id,
        "state": state_to_str(result.state),
        "operations": operations,
    })
}

/// An all-failed aborted response echoing a request's operations; used for
/// duplicate ids and submission rejections.
pub fn aborted_response_for(request: &TransactionRequest) -> Json {
    let result = TransactionResult {
        id: request.id,
        state: TransactionState::Aborted,
        operations: request
            .operations
            .iter()
            .map(|operation| crate::server::worker::OperationResult {
                op_type: operation.op_type,
                key_id: operation.key_id,
                key: operation.key.clone(),
                success: false,
                value: None,
            })
            .collect(),
    };
    encode_response(&result)
}

pub fn operation_type_from_str(value: &str) -> Option<OperationType> {
    match value {
        "get" => Some(OperationType::Get),
        "set" => Some(OperationType::Set),
        "del" | "delete" => Some(OperationType::Delete),
        "assert_exists" => Some(OperationType::AssertExists),
        "assert_not_exists" => Some(OperationType::AssertNotExists),
        "assert_type" => Some(OperationType::AssertType),
        "assert_int_eq" => Some(OperationType::AssertIntEq),
        "assert_bytes_hash_eq" => Some(OperationType::AssertBytesHashEq),
        "assert_string_hash_eq" => Some(OperationType::AssertStringHashEq),
        _ => None,
    }
}

pub fn operation_type_to_str(op_type: OperationType) -> &'static str {
    match op_type {
        OperationType::Get => "get",
        OperationType::Set => "set",
        OperationType::Delete => "del",
        OperationType::AssertExists => "assert_exists",
        OperationType::AssertNotExists => "assert_not_exists",
        OperationType::AssertType => "assert_type",
        OperationType::AssertIntEq => "assert_int_eq",
        OperationType::AssertBytesHashEq => "assert_bytes_hash_eq",
        OperationType::AssertStringHashEq => "assert_string_hash_eq",
    }
}

fn value_type_from_str(value: &str) -> Option<ValueType> {
    match value {
        "bytes" => Some(ValueType::Bytes),
        "string" => Some(ValueType::String),
        "int" => Some(ValueType::Int64),
        "value_log_ref" => Some(ValueType::ValueLogRef),
        _ => None,
    }
}

fn state_to_str(state: TransactionState) -> &'static str {
    match state {
        TransactionState::Committed => "committed",
        TransactionState::Aborted => "aborted",
        TransactionState::Pending => "pending",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;

    fn decode(payload: &str) -> Option<TransactionRequest> {
        decode_request(payload.as_bytes())
    }

    #[test]
    fn decodes_a_set_and_get_request() {
        let request = decode(
            r#"{"txn_id":1,"operations":[
                {"type":"set","key":"alpha","value":{"kind":"string","data":"bravo"}},
                {"type":"get","key":"alpha"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(request.id, 1);
        assert_eq!(request.keys.len(), 1);
        assert_eq!(request.keys[0].mode, LockMode::Exclusive);
        assert_eq!(request.operations.len(), 2);
        assert_eq!(
            request.operations[0].value.as_ref().unwrap().value,
            Value::Str("bravo".into())
        );
    }

    #[test]
    fn decodes_bytes_int_and_ttl_envelopes() {
        let request = decode(
            r#"{"txn_id":2,"operations":[
                {"type":"set","key":"b","value":{"kind":"bytes","data":"aGVsbG8="}},
                {"type":"set","key":"i","value":{"kind":"int","data":-7,
                    "metadata":{"ttl_epoch_seconds":1700000000}}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(
            request.operations[0].value.as_ref().unwrap().value,
            Value::Bytes(b"hello".to_vec())
        );
        let int_record = request.operations[1].value.as_ref().unwrap();
        assert_eq!(int_record.value, Value::I64(-7));
        assert_eq!(int_record.metadata.ttl_epoch_seconds, 1_700_000_000);
    }

    #[test]
    fn accepts_both_delete_spellings() {
        for spelling in ["del", "delete"] {
            let request = decode(&format!(
                r#"{{"txn_id":3,"operations":[{{"type":"{}","key":"k"}}]}}"#,
                spelling
            ))
            .unwrap();
            assert_eq!(request.operations[0].op_type, OperationType::Delete);
        }
    }

    #[test]
    fn rejects_malformed_requests() {
        for payload in [
            "not json",
            r#"{"operations":[{"type":"get","key":"k"}]}"#, // missing txn_id
            r#"{"txn_id":-1,"operations":[{"type":"get","key":"k"}]}"#,
            r#"{"txn_id":9223372036854775808,"operations":[{"type":"get","key":"k"}]}"#,
            r#"{"txn_id":1,"operations":[]}"#,
            r#"{"txn_id":1,"operations":[{"type":"warp","key":"k"}]}"#,
            r#"{"txn_id":1,"operations":[{"type":"get","key":""}]}"#,
            r#"{"txn_id":1,"operations":[{"type":"set","key":"k"}]}"#, // set without value
            r#"{"txn_id":1,"operations":[{"type":"del","key":"k",
                "value":{"kind":"int","data":1}}]}"#, // del with value
            r#"{"txn_id":1,"operations":[{"type":"set","key":"k",
                "value":{"kind":"bytes","data":"!!!"}}]}"#, // bad base64
            r#"{"txn_id":1,"operations":[{"type":"set","key":"k",
                "value":{"kind":"int","data":1.5}}]}"#, // non-integer int
            r#"{"txn_id":1,"operations":[{"type":"assert_type","key":"k"}]}"#,
            r#"{"txn_id":1,"operations":[{"type":"assert_int_eq","key":"k",
                "expected_int":"nope"}]}"#,
        ] {
            assert!(decode(payload).is_none(), "accepted: {}", payload);
        }
    }

    #[test]
    fn decodes_assertion_expectations() {
        let request = decode(
            r#"{"txn_id":4,"operations":[
                {"type":"assert_type","key":"a","expected_type":"int"},
                {"type":"assert_int_eq","key":"b","expected_int":11},
                {"type":"assert_bytes_hash_eq","key":"c","expected_hash":"deadbeef"},
                {"type":"assert_exists","key":"d"}
            ]}"#,
        )
        .unwrap();

        let expected = |index: usize| request.operations[index].expected.as_ref().unwrap();
        assert_eq!(expected(0).expected_type, Some(ValueType::Int64));
        assert_eq!(expected(1).expected_int, Some(11));
        assert_eq!(expected(2).expected_hash.as_deref(), Some("deadbeef"));
        assert_eq!(expected(3), &AssertExpectation::default());
    }

    #[test]
    fn base64_roundtrip() {
        for data in [
            Vec::new(),
            b"a".to_vec(),
            b"ab".to_vec(),
            b"abc".to_vec(),
            (0u8..=255).collect::<Vec<u8>>(),
        ] {
            let record = Record::new(Value::Bytes(data.clone()));
            let encoded = encode_record(&record).unwrap();
            let decoded = decode_record(&encoded).unwrap();
            assert_eq!(decoded.value, Value::Bytes(data));
        }
    }

    #[test]
    fn encodes_responses_with_values_and_state() {
        use crate::server::worker::OperationResult;
        use crate::txn::TransactionState;

        let result = TransactionResult {
            id: 12,
            state: TransactionState::Committed,
            operations: vec![OperationResult {
                op_type: OperationType::Get,
                key_id: 0,
                key: "alpha".into(),
                success: true,
                value: Some(Record::new(Value::Str("bravo".into()))),
            }],
        };

        let json = encode_response(&result);
        assert_eq!(json["txn_id"], 12);
        assert_eq!(json["state"], "committed");
        assert_eq!(json["operations"][0]["type"], "get");
        assert_eq!(json["operations"][0]["success"], true);
        assert_eq!(json["operations"][0]["value"]["kind"], "string");
        assert_eq!(json["operations"][0]["value"]["data"], "bravo");
    }

    #[test]
    fn aborted_response_marks_every_operation_failed() {
        let request = decode(
            r#"{"txn_id":5,"operations":[
                {"type":"get","key":"a"},
                {"type":"set","key":"b","value":{"kind":"int","data":1}}
            ]}"#,
        )
        .unwrap();

        let json = aborted_response_for(&request);
        assert_eq!(json["state"], "aborted");
        let operations = json["operations"].as_array().unwrap();
        assert_eq!(operations.len(), 2);
        assert!(operations.iter().all(|op| op["success"] == false));
    }

    #[test]
    fn value_log_references_have_no_wire_form() {
        use crate::storage::btree::{RefKind, ValueLogRef};
        use crate::storage::SegmentPointer;

        let record = Record::new(Value::Ref(ValueLogRef {
            pointer: SegmentPointer::default(),
            kind: RefKind::Bytes,
        }));
        assert!(encode_record(&record).is_none());
    }
}
