use carton::{Container, Entry, Error, StoragePolicy, Value, ValueKind};
use pretty_assertions::assert_eq;
use quickcheck::{Arbitrary, Gen};

fn mixed_container() -> Container {
    let c = Container::new();
    c.set_source("svc", "");
    c.set_target("db", "");
    c.set_message_type("req");
    c.set("id", 42i32).unwrap();
    c.set("name", "alice").unwrap();
    c.set("flags", true).unwrap();
    c
}

#[test]
fn test_round_trip_mixed_container() {
    let c = mixed_container();

    let wire = c.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();

    // Byte-identical re-encode, and value-by-value equality.
    assert_eq!(decoded.serialize_binary().unwrap(), wire);
    assert_eq!(decoded, c);
    assert_eq!(decoded.source_id(), "svc");
    assert_eq!(decoded.target_id(), "db");
    assert_eq!(decoded.message_type(), "req");
    assert_eq!(decoded.get("id").unwrap().as_i32().unwrap(), 42);
    assert_eq!(decoded.get("name").unwrap().as_str().unwrap(), "alice");
    assert!(decoded.get("flags").unwrap().as_bool().unwrap());
}

#[test]
fn test_type_mismatch_on_read_leaves_container_unchanged() {
    let c = Container::new();
    c.set("n", "7").unwrap();

    let err = c.get("n").unwrap().as_i32().unwrap_err();
    assert!(matches!(
        err,
        Error::TypeMismatch {
            expected: ValueKind::Int32,
            actual: ValueKind::String,
        }
    ));
    assert_eq!(err.code(), 101);

    // Recoverable: the container is untouched.
    assert_eq!(c.len(), 1);
    assert_eq!(c.get("n").unwrap().as_str().unwrap(), "7");
}

#[test]
fn test_long32_overflow_rejection() {
    let err = Value::long32(5_000_000_000).unwrap_err();
    assert!(matches!(err, Error::ValueOutOfRange { .. }));
    assert_eq!(err.code(), 102);

    // The same magnitude succeeds as int64.
    let c = Container::new();
    c.set("big", 5_000_000_000i64).unwrap();
    assert_eq!(c.get("big").unwrap().as_i64().unwrap(), 5_000_000_000);
}

#[test]
fn test_empty_container_minimal_encoding() {
    let c = Container::new();
    let wire = c.serialize_binary().unwrap();

    // magic + version + flags, five empty header strings, zero count.
    let mut expect = vec![b'C', b'O', 1, 0];
    expect.extend_from_slice(&[0; 20]); // 5 length prefixes of zero
    expect.extend_from_slice(&[0; 4]); // value_count = 0
    assert_eq!(wire, expect);

    let decoded = Container::deserialize_binary(&wire).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(decoded.serialize_binary().unwrap(), wire);
}

#[test]
fn test_zero_length_payloads_round_trip() {
    let c = Container::new();
    c.set("empty-bytes", Value::Bytes(Vec::new())).unwrap();
    c.set("empty-string", "").unwrap();
    c.set("empty-array", Value::Array(Vec::new())).unwrap();
    c.set("empty-child", Container::new()).unwrap();

    let wire = c.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();
    assert_eq!(decoded, c);
    assert_eq!(decoded.serialize_binary().unwrap(), wire);
}

#[test]
fn test_deeply_nested_containers_round_trip() {
    // Well past the 16 levels the format guarantees; the codec is
    // iterative, so depth costs heap, not stack.
    let mut inner = Container::new();
    inner.set("leaf", 7i32).unwrap();
    for level in 0..64i32 {
        let parent = Container::new();
        parent.set("level", level).unwrap();
        parent.set("child", inner).unwrap();
        inner = parent;
    }

    let wire = inner.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();
    assert_eq!(decoded.serialize_binary().unwrap(), wire);

    // Walk back down to the leaf.
    let mut cursor = decoded;
    for _ in 0..64 {
        let child = cursor.get("child").unwrap();
        cursor = child.as_container().unwrap().clone_shallow();
    }
    assert_eq!(cursor.get("leaf").unwrap().as_i32().unwrap(), 7);
}

#[test]
fn test_deeply_nested_arrays_round_trip() {
    let mut value = Value::from(1i16);
    for _ in 0..256 {
        value = Value::Array(vec![Entry::unnamed(value)]);
    }
    let c = Container::new();
    c.set("deep", value).unwrap();

    let wire = c.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();
    assert_eq!(decoded, c);
    assert_eq!(decoded.serialize_binary().unwrap(), wire);
}

#[test]
fn test_insertion_order_and_duplicates_preserved() {
    for policy in [StoragePolicy::Ordered, StoragePolicy::Indexed] {
        let c = Container::with_policy(policy);
        c.set("z", 1i32).unwrap();
        c.set("a", 2i32).unwrap();
        c.set("z", 3i32).unwrap();
        c.set("m", 4i32).unwrap();

        let decoded = Container::deserialize_binary(&c.serialize_binary().unwrap()).unwrap();
        let order: Vec<(String, i32)> = decoded
            .to_vec()
            .into_iter()
            .map(|e| (e.name, e.value.as_i32().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("z".to_string(), 1),
                ("a".to_string(), 2),
                ("z".to_string(), 3),
                ("m".to_string(), 4),
            ]
        );
    }
}

#[test]
fn test_crc_trailer_round_trip_and_corruption() {
    let c = mixed_container();

    let wire = c.serialize_binary_with_crc().unwrap();
    assert_eq!(wire[3], 1); // flags bit 0

    let decoded = Container::deserialize_binary(&wire).unwrap();
    assert_eq!(decoded, c);

    // Flip one payload byte: the trailer catches it.
    let mut bad = wire.clone();
    let target = bad.len() - 10;
    bad[target] ^= 0xFF;
    let err = Container::deserialize_binary(&bad).unwrap_err();
    assert!(err.is_serialization_error(), "{err}");

    // Flip a trailer byte: same.
    let mut bad = wire.clone();
    let target = bad.len() - 1;
    bad[target] ^= 0xFF;
    let err = Container::deserialize_binary(&bad).unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)), "{err}");
}

#[test]
fn test_unknown_version_refused() {
    let mut wire = mixed_container().serialize_binary().unwrap();
    wire[2] = 9;
    let err = Container::deserialize_binary(&wire).unwrap_err();
    assert!(matches!(
        err,
        Error::VersionMismatch {
            expected: 1,
            actual: 9,
        }
    ));
    assert_eq!(err.code(), 203);
}

#[test]
fn test_bad_magic_refused() {
    let mut wire = mixed_container().serialize_binary().unwrap();
    wire[0] = b'X';
    let err = Container::deserialize_binary(&wire).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
}

#[test]
fn test_reserved_flags_refused() {
    let mut wire = mixed_container().serialize_binary().unwrap();
    wire[3] = 0b1000_0000;
    let err = Container::deserialize_binary(&wire).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
}

#[test]
fn test_truncation_fails_bounded_at_every_length() {
    let c = mixed_container();
    c.set("blob", Value::Bytes((0..=255).collect())).unwrap();
    let nested = Container::new();
    nested.set("inner", 1u64).unwrap();
    c.set("child", nested).unwrap();

    let wire = c.serialize_binary().unwrap();
    for len in 0..wire.len() {
        let err = Container::deserialize_binary(&wire[..len]).unwrap_err();
        assert!(err.is_serialization_error(), "at {len}: {err}");
    }
}

#[test]
fn test_oversized_length_prefix_fails_without_overrun() {
    let c = Container::new();
    c.set("k", Value::Bytes(vec![1, 2, 3])).unwrap();
    let mut wire = c.serialize_binary().unwrap();

    // Patch the bytes payload length (empty header prefix is 28 bytes,
    // then 4+1 name, 1 type code) to claim far more than the input holds.
    let at = 28 + 4 + 1 + 1;
    wire[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = Container::deserialize_binary(&wire).unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)), "{err}");
}

#[test]
fn test_header_version_string_is_not_wire_state() {
    let c = mixed_container();
    c.set_version("9.9");

    let wire = c.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();

    // The wire carries the format version byte and five routing
    // strings; the free-form version string resets to its default.
    assert_eq!(decoded.version(), carton::DEFAULT_VERSION);
    assert_eq!(decoded.serialize_binary().unwrap(), wire);
}

#[test]
fn test_xml_and_json_do_not_disturb_binary() {
    let c = mixed_container();
    let before = c.serialize_binary().unwrap();
    let _ = c.to_json().unwrap();
    let _ = c.to_xml().unwrap();
    assert_eq!(c.serialize_binary().unwrap(), before);
}

// Property: any tree of values survives a binary round trip with
// byte-identical re-encode.

#[derive(Debug, Clone)]
struct ArbValue(Value);

fn arbitrary_scalar(g: &mut Gen) -> Value {
    match u8::arbitrary(g) % 14 {
        0 => Value::Null,
        1 => Value::Bool(bool::arbitrary(g)),
        2 => Value::Int16(i16::arbitrary(g)),
        3 => Value::UInt16(u16::arbitrary(g)),
        4 => Value::Int32(i32::arbitrary(g)),
        5 => Value::UInt32(u32::arbitrary(g)),
        6 => Value::Long32(i32::arbitrary(g)),
        7 => Value::ULong32(u32::arbitrary(g)),
        8 => Value::Int64(i64::arbitrary(g)),
        9 => Value::UInt64(u64::arbitrary(g)),
        10 => Value::Float32(f32::from_bits(u32::arbitrary(g))),
        11 => Value::Float64(f64::from_bits(u64::arbitrary(g))),
        12 => Value::Bytes(Vec::arbitrary(g)),
        _ => Value::String(String::arbitrary(g)),
    }
}

fn arbitrary_value(g: &mut Gen, depth: usize) -> Value {
    if depth == 0 || u8::arbitrary(g) % 4 != 0 {
        return arbitrary_scalar(g);
    }
    match bool::arbitrary(g) {
        false => {
            let len = usize::arbitrary(g) % 4;
            Value::Array(
                (0..len)
                    .map(|_| Entry {
                        name: String::arbitrary(g),
                        value: arbitrary_value(g, depth - 1),
                    })
                    .collect(),
            )
        }
        true => {
            let child = Container::new();
            let len = usize::arbitrary(g) % 4;
            for ind in 0..len {
                child
                    .set(format!("k{ind}"), arbitrary_value(g, depth - 1))
                    .unwrap();
            }
            Value::from(child)
        }
    }
}

impl Arbitrary for ArbValue {
    fn arbitrary(g: &mut Gen) -> Self {
        ArbValue(arbitrary_value(g, 3))
    }
}

#[quickcheck_macros::quickcheck]
fn prop_binary_round_trip(values: Vec<ArbValue>) -> bool {
    let c = Container::new();
    for (ind, ArbValue(value)) in values.into_iter().enumerate() {
        c.set(format!("key-{ind}"), value).unwrap();
    }

    let wire = c.serialize_binary().unwrap();
    let decoded = Container::deserialize_binary(&wire).unwrap();

    // Containers hold floats, so compare through re-encoded bytes
    // rather than PartialEq (NaN != NaN).
    decoded.serialize_binary().unwrap() == wire
}

#[quickcheck_macros::quickcheck]
fn prop_long32_range_law(x: i64) -> bool {
    let in_range = (i32::MIN as i64..=i32::MAX as i64).contains(&x);
    Value::long32(x).is_ok() == in_range
}

#[quickcheck_macros::quickcheck]
fn prop_ulong32_range_law(x: u64) -> bool {
    let in_range = x <= u32::MAX as u64;
    Value::ulong32(x).is_ok() == in_range
}

#[quickcheck_macros::quickcheck]
fn prop_standalone_value_round_trip(name: String, value: ArbValue) -> bool {
    let entry = Entry {
        name,
        value: value.0,
    };
    let buf = carton::encode_value(&entry).unwrap();
    let decoded = carton::decode_value(&buf).unwrap();
    carton::encode_value(&decoded).unwrap() == buf
}
