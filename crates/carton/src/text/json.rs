use crate::{Container, Entry, Error, Header, Result, Value, ValueKind};
use serde_json::json;
use std::sync::Arc;

// Sentinel prefix marking a base64-encoded bytes payload. Chosen over
// hex; stable across releases.
const BYTES_PREFIX: &str = "bytes:";

/// Render a container as `{"header":{..},"values":[{"key","type","value"},..]}`.
///
/// Non-finite floats render as `null` (binary is the bit-preserving
/// channel); bytes render as base64 strings with a `"bytes:"` prefix.
pub(crate) fn container_to_json(container: &Container) -> Result<serde_json::Value> {
    let mut path = vec![container as *const Container];
    let (header, entries) = container.snapshot_parts();
    container_json(&header, &entries, &mut path)
}

/// Render one standalone value. Used by Value's Display rendering.
pub(crate) fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    value_json(value, &mut Vec::new())
}

fn container_json(
    header: &Header,
    entries: &[Entry],
    path: &mut Vec<*const Container>,
) -> Result<serde_json::Value> {
    Ok(json!({
        "header": {
            "source_id": header.source_id,
            "source_sub_id": header.source_sub_id,
            "target_id": header.target_id,
            "target_sub_id": header.target_sub_id,
            "message_type": header.message_type,
            "version": header.version,
        },
        "values": records_json(entries, path)?,
    }))
}

fn records_json(entries: &[Entry], path: &mut Vec<*const Container>) -> Result<serde_json::Value> {
    let records = entries
        .iter()
        .map(|entry| {
            Ok(json!({
                "key": entry.name,
                "type": entry.value.kind().name(),
                "value": value_json(&entry.value, path)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::Value::Array(records))
}

fn value_json(value: &Value, path: &mut Vec<*const Container>) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => json!(v),
        Value::Int16(v) => json!(v),
        Value::UInt16(v) => json!(v),
        Value::Int32(v) | Value::Long32(v) => json!(v),
        Value::UInt32(v) | Value::ULong32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::UInt64(v) => json!(v),
        // from_f64 yields None for NaN and the infinities, which land
        // as null. f32 widens exactly.
        Value::Float32(v) => json!(*v as f64),
        Value::Float64(v) => json!(v),
        Value::Bytes(v) => json!(format!("{BYTES_PREFIX}{}", base64::encode(v))),
        Value::String(v) => json!(v),
        Value::Container(child) => {
            let identity = Arc::as_ptr(child);
            if path.contains(&identity) {
                return Err(Error::SerializeFailed(
                    "container references itself; JSON has no back-reference form".to_string(),
                ));
            }
            path.push(identity);
            let (header, entries) = child.snapshot_parts();
            let out = container_json(&header, &entries, path)?;
            path.pop();
            out
        }
        Value::Array(elements) => records_json(elements, path)?,
    })
}

/// Parse the shape `container_to_json` emits back into a container.
/// Logical equality is preserved; float bit-identity relies on the
/// shortest-round-trip number format, and a float that was rendered as
/// `null` (NaN or an infinity) is restored as NaN.
pub(crate) fn container_from_json(s: &str) -> Result<Container> {
    let root: serde_json::Value =
        serde_json::from_str(s).map_err(|err| Error::DeserializeFailed(err.to_string()))?;
    parse_container(&root)
}

fn parse_container(v: &serde_json::Value) -> Result<Container> {
    let obj = v
        .as_object()
        .ok_or_else(|| invalid("container must be a JSON object"))?;

    let mut header = Header::default();
    if let Some(h) = obj.get("header") {
        let h = h
            .as_object()
            .ok_or_else(|| invalid("header must be a JSON object"))?;
        for (tag, slot) in [
            ("source_id", &mut header.source_id),
            ("source_sub_id", &mut header.source_sub_id),
            ("target_id", &mut header.target_id),
            ("target_sub_id", &mut header.target_sub_id),
            ("message_type", &mut header.message_type),
            ("version", &mut header.version),
        ] {
            if let Some(field) = h.get(tag) {
                *slot = field
                    .as_str()
                    .ok_or_else(|| invalid(format!("header field '{tag}' must be a string")))?
                    .to_string();
            }
        }
    }

    let entries = match obj.get("values") {
        Some(values) => parse_records(values)?,
        None => Vec::new(),
    };
    Ok(Container::from_parts(header, entries))
}

fn parse_records(v: &serde_json::Value) -> Result<Vec<Entry>> {
    v.as_array()
        .ok_or_else(|| invalid("values must be a JSON array"))?
        .iter()
        .map(parse_record)
        .collect()
}

fn parse_record(v: &serde_json::Value) -> Result<Entry> {
    let obj = v
        .as_object()
        .ok_or_else(|| invalid("value record must be a JSON object"))?;

    // Array elements may have an empty key.
    let name = match obj.get("key") {
        Some(key) => key
            .as_str()
            .ok_or_else(|| invalid("record key must be a string"))?
            .to_string(),
        None => String::new(),
    };
    let kind_name = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| invalid("record is missing its type tag"))?;
    let kind = ValueKind::from_name(kind_name)
        .ok_or_else(|| invalid(format!("unknown type tag '{kind_name}'")))?;

    let payload = obj.get("value").unwrap_or(&serde_json::Value::Null);
    Ok(Entry {
        name,
        value: parse_value(kind, payload)?,
    })
}

fn parse_value(kind: ValueKind, v: &serde_json::Value) -> Result<Value> {
    let int = |kind: ValueKind| -> Result<i64> {
        v.as_i64()
            .ok_or_else(|| invalid(format!("expected an integer for {kind}")))
    };
    let uint = |kind: ValueKind| -> Result<u64> {
        v.as_u64()
            .ok_or_else(|| invalid(format!("expected an unsigned integer for {kind}")))
    };
    // A float rendered as null was NaN or an infinity; NaN is the only
    // faithful restoration the textual channel offers.
    let float = |kind: ValueKind| -> Result<f64> {
        if v.is_null() {
            return Ok(f64::NAN);
        }
        v.as_f64()
            .ok_or_else(|| invalid(format!("expected a number for {kind}")))
    };

    Ok(match kind {
        ValueKind::Null => {
            if !v.is_null() {
                return Err(invalid("null value must be null"));
            }
            Value::Null
        }
        ValueKind::Bool => Value::Bool(
            v.as_bool()
                .ok_or_else(|| invalid("expected a boolean for bool"))?,
        ),
        ValueKind::Int16 => Value::Int16(narrow(int(kind)?, kind)?),
        ValueKind::UInt16 => Value::UInt16(narrow_u(uint(kind)?, kind)?),
        ValueKind::Int32 => Value::Int32(narrow(int(kind)?, kind)?),
        ValueKind::UInt32 => Value::UInt32(narrow_u(uint(kind)?, kind)?),
        ValueKind::Long32 => Value::long32(int(kind)?)?,
        ValueKind::ULong32 => Value::ulong32(uint(kind)?)?,
        ValueKind::Int64 => Value::Int64(int(kind)?),
        ValueKind::UInt64 => Value::UInt64(uint(kind)?),
        ValueKind::Float32 => Value::Float32(float(kind)? as f32),
        ValueKind::Float64 => Value::Float64(float(kind)?),
        ValueKind::Bytes => {
            let s = v
                .as_str()
                .ok_or_else(|| invalid("expected a string for bytes"))?;
            let b64 = s
                .strip_prefix(BYTES_PREFIX)
                .ok_or_else(|| invalid(format!("bytes payload lacks '{BYTES_PREFIX}' prefix")))?;
            Value::Bytes(
                base64::decode(b64).map_err(|err| invalid(format!("invalid base64: {err}")))?,
            )
        }
        ValueKind::String => Value::String(
            v.as_str()
                .ok_or_else(|| invalid("expected a string for string"))?
                .to_string(),
        ),
        ValueKind::Container => Value::Container(Arc::new(parse_container(v)?)),
        ValueKind::Array => Value::Array(parse_records(v)?),
    })
}

fn narrow<T: TryFrom<i64>>(v: i64, kind: ValueKind) -> Result<T> {
    T::try_from(v).map_err(|_| Error::ValueOutOfRange {
        kind,
        value: v as i128,
    })
}

fn narrow_u<T: TryFrom<u64>>(v: u64, kind: ValueKind) -> Result<T> {
    T::try_from(v).map_err(|_| Error::ValueOutOfRange {
        kind,
        value: v as i128,
    })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidFormat(message.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn fixture() -> Container {
        let c = Container::new();
        c.set_source("svc", "w1");
        c.set_target("db", "s2");
        c.set_message_type("req");
        c.set("id", 42i32).unwrap();
        c.set("name", "alice").unwrap();
        c.set("flags", true).unwrap();
        c.set("blob", Value::Bytes(vec![8, 6, 7, 5, 3, 0, 9])).unwrap();
        c.set(
            "tags",
            Value::Array(vec![Entry::unnamed("a"), Entry::unnamed("b")]),
        )
        .unwrap();
        c
    }

    #[test]
    fn test_json_shape() {
        let value = container_to_json(&fixture()).unwrap();
        assert_eq!(
            value,
            json!({
                "header": {
                    "source_id": "svc",
                    "source_sub_id": "w1",
                    "target_id": "db",
                    "target_sub_id": "s2",
                    "message_type": "req",
                    "version": "1.0",
                },
                "values": [
                    {"key": "id", "type": "int32", "value": 42},
                    {"key": "name", "type": "string", "value": "alice"},
                    {"key": "flags", "type": "bool", "value": true},
                    {"key": "blob", "type": "bytes", "value": "bytes:CAYHBQMACQ=="},
                    {"key": "tags", "type": "array", "value": [
                        {"key": "", "type": "string", "value": "a"},
                        {"key": "", "type": "string", "value": "b"},
                    ]},
                ],
            })
        );
    }

    #[test]
    fn test_json_round_trip() {
        let c = fixture();
        let nested = Container::new();
        nested.set("inner", Value::long32(7).unwrap()).unwrap();
        c.set("child", nested).unwrap();

        let s = c.to_json().unwrap();
        let back = Container::from_json(&s).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_escapes_per_rfc8259() {
        let c = Container::new();
        c.set("quote\"back\\slash", "line\nfeed\ttab\rret\u{0}nul\u{1f}")
            .unwrap();
        let s = c.to_json().unwrap();

        assert!(s.contains(r#"quote\"back\\slash"#));
        assert!(s.contains(r"line\nfeed\ttab\rret\u0000nul\u001f"));
        // The parser agrees with the escaping.
        let back = Container::from_json(&s).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_non_finite_floats_render_null() {
        let c = Container::new();
        c.set("nan", f64::NAN).unwrap();
        c.set("inf", f64::INFINITY).unwrap();
        c.set("f32nan", f32::NAN).unwrap();

        let value = container_to_json(&c).unwrap();
        assert_eq!(value["values"][0]["value"], serde_json::Value::Null);
        assert_eq!(value["values"][1]["value"], serde_json::Value::Null);
        assert_eq!(value["values"][2]["value"], serde_json::Value::Null);

        // Restoration is NaN, the only faithful option in text.
        let back = Container::from_json(&value.to_string()).unwrap();
        assert!(back.get("inf").unwrap().as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_float_round_trip_shortest_form() {
        let c = Container::new();
        c.set("f64", 0.1f64).unwrap();
        c.set("f32", 0.1f32).unwrap();

        let back = Container::from_json(&c.to_json().unwrap()).unwrap();
        assert_eq!(back.get("f64").unwrap().as_f64().unwrap(), 0.1f64);
        assert_eq!(back.get("f32").unwrap().as_f32().unwrap(), 0.1f32);
    }

    #[test]
    fn test_decoder_rejects_malformed_inputs() {
        for (s, expect_code) in [
            ("not json", 201),
            (r#"{"values": 7}"#, 202),
            (r#"{"values": [{"key":"k","type":"int128","value":1}]}"#, 202),
            (r#"{"values": [{"key":"k","type":"int16","value":70000}]}"#, 102),
            (r#"{"values": [{"key":"k","type":"long32","value":5000000000}]}"#, 102),
            (r#"{"values": [{"key":"k","type":"bytes","value":"no-prefix"}]}"#, 202),
            (r#"{"values": [{"key":"k","type":"bytes","value":"bytes:!!"}]}"#, 202),
            (r#"{"values": [{"key":"k","value":1}]}"#, 202),
        ] {
            let err = Container::from_json(s).unwrap_err();
            assert_eq!(err.code(), expect_code, "{s}");
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let a = Arc::new(Container::new());
        let b = Arc::new(Container::new());
        b.set("up", Value::Container(Arc::clone(&a))).unwrap();
        a.set("down", Value::Container(Arc::clone(&b))).unwrap();

        let err = a.to_json().unwrap_err();
        assert_eq!(err.code(), 200);
    }

    #[test]
    fn test_empty_container() {
        let c = Container::new();
        let v = container_to_json(&c).unwrap();
        assert_eq!(v["values"], json!([]));
        let back = Container::from_json(&v.to_string()).unwrap();
        assert!(back.is_empty());
    }
}
