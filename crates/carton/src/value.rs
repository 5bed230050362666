use crate::{Container, Error, Result, ValueKind};
use std::fmt;
use std::sync::Arc;

/// Nested containers are shared: they may be referenced from multiple
/// parents, and live as long as their longest holder. Mutation through
/// any reference goes through the shared container's own lock.
pub type SharedContainer = Arc<Container>;

/// Value is the sixteen-way discriminated payload of the engine.
/// Variants are declared in wire-code order (see ValueKind); the binary
/// codec dispatches on `kind().code()` directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    /// Signed 32-bit, range-checked at construction. Kept distinct from
    /// Int32 because this type was once platform-sized and its wire code
    /// differs; use `Value::long32` to construct one from a wider integer.
    Long32(i32),
    /// Unsigned 32-bit, range-checked at construction.
    ULong32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    String(String),
    Container(SharedContainer),
    Array(Vec<Entry>),
}

/// Entry is a named Value: the element type of containers and arrays.
/// Array element names may be empty and need not be unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub value: Value,
}

impl Entry {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn unnamed(value: impl Into<Value>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
        }
    }
}

impl Value {
    /// The discriminant of this Value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int16(_) => ValueKind::Int16,
            Value::UInt16(_) => ValueKind::UInt16,
            Value::Int32(_) => ValueKind::Int32,
            Value::UInt32(_) => ValueKind::UInt32,
            Value::Long32(_) => ValueKind::Long32,
            Value::ULong32(_) => ValueKind::ULong32,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::String(_) => ValueKind::String,
            Value::Container(_) => ValueKind::Container,
            Value::Array(_) => ValueKind::Array,
        }
    }

    /// Construct a Long32, rejecting values outside the signed 32-bit
    /// range with ValueOutOfRange. Callers with wider values should use
    /// Int64 instead.
    pub fn long32(v: i64) -> Result<Value> {
        i32::try_from(v)
            .map(Value::Long32)
            .map_err(|_| Error::ValueOutOfRange {
                kind: ValueKind::Long32,
                value: v as i128,
            })
    }

    /// Construct a ULong32, rejecting values outside the unsigned 32-bit
    /// range with ValueOutOfRange.
    pub fn ulong32(v: u64) -> Result<Value> {
        u32::try_from(v)
            .map(Value::ULong32)
            .map_err(|_| Error::ValueOutOfRange {
                kind: ValueKind::ULong32,
                value: v as i128,
            })
    }

    /// An Array value of unnamed elements.
    pub fn array<I, V>(items: I) -> Value
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(items.into_iter().map(Entry::unnamed).collect())
    }

    /// Whether this Value is of the statically-requested type.
    pub fn is<T: TypedValue>(&self) -> bool {
        self.kind() == T::KIND
    }

    /// Extract a typed copy of this Value's payload, failing with
    /// TypeMismatch when the discriminant disagrees.
    pub fn get<T: TypedValue>(&self) -> Result<T> {
        T::extract(self)
    }

    /// Replace this Value's payload in place.
    pub fn set(&mut self, other: impl Into<Value>) {
        *self = other.into();
    }

    fn mismatch<T>(&self, expected: ValueKind) -> Result<T> {
        Err(Error::TypeMismatch {
            expected,
            actual: self.kind(),
        })
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => self.mismatch(ValueKind::Bool),
        }
    }
    pub fn as_i16(&self) -> Result<i16> {
        match self {
            Value::Int16(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Int16),
        }
    }
    pub fn as_u16(&self) -> Result<u16> {
        match self {
            Value::UInt16(v) => Ok(*v),
            _ => self.mismatch(ValueKind::UInt16),
        }
    }
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::Int32(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Int32),
        }
    }
    pub fn as_u32(&self) -> Result<u32> {
        match self {
            Value::UInt32(v) => Ok(*v),
            _ => self.mismatch(ValueKind::UInt32),
        }
    }
    pub fn as_long32(&self) -> Result<i32> {
        match self {
            Value::Long32(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Long32),
        }
    }
    pub fn as_ulong32(&self) -> Result<u32> {
        match self {
            Value::ULong32(v) => Ok(*v),
            _ => self.mismatch(ValueKind::ULong32),
        }
    }
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int64(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Int64),
        }
    }
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Value::UInt64(v) => Ok(*v),
            _ => self.mismatch(ValueKind::UInt64),
        }
    }
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            Value::Float32(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Float32),
        }
    }
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Float64(v) => Ok(*v),
            _ => self.mismatch(ValueKind::Float64),
        }
    }
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => self.mismatch(ValueKind::Bytes),
        }
    }
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            _ => self.mismatch(ValueKind::String),
        }
    }
    pub fn as_container(&self) -> Result<&SharedContainer> {
        match self {
            Value::Container(c) => Ok(c),
            _ => self.mismatch(ValueKind::Container),
        }
    }
    pub fn as_array(&self) -> Result<&[Entry]> {
        match self {
            Value::Array(a) => Ok(a),
            _ => self.mismatch(ValueKind::Array),
        }
    }

    /// Widen any integer payload to i64. Fails with TypeMismatch for
    /// non-integer kinds, or ValueOutOfRange for u64 above i64::MAX.
    pub fn to_i64(&self) -> Result<i64> {
        match *self {
            Value::Int16(v) => Ok(v as i64),
            Value::UInt16(v) => Ok(v as i64),
            Value::Int32(v) | Value::Long32(v) => Ok(v as i64),
            Value::UInt32(v) | Value::ULong32(v) => Ok(v as i64),
            Value::Int64(v) => Ok(v),
            Value::UInt64(v) => i64::try_from(v).map_err(|_| Error::ValueOutOfRange {
                kind: ValueKind::Int64,
                value: v as i128,
            }),
            _ => self.mismatch(ValueKind::Int64),
        }
    }

    /// Widen any integer payload to u64, rejecting negatives.
    pub fn to_u64(&self) -> Result<u64> {
        let out_of_range = |value: i128| Error::ValueOutOfRange {
            kind: ValueKind::UInt64,
            value,
        };
        match *self {
            Value::Int16(v) => u64::try_from(v).map_err(|_| out_of_range(v as i128)),
            Value::UInt16(v) => Ok(v as u64),
            Value::Int32(v) | Value::Long32(v) => {
                u64::try_from(v).map_err(|_| out_of_range(v as i128))
            }
            Value::UInt32(v) | Value::ULong32(v) => Ok(v as u64),
            Value::Int64(v) => u64::try_from(v).map_err(|_| out_of_range(v as i128)),
            Value::UInt64(v) => Ok(v),
            _ => self.mismatch(ValueKind::UInt64),
        }
    }

    /// Narrow any integer payload to i32, rejecting out-of-range values.
    pub fn to_i32(&self) -> Result<i32> {
        let v = self.to_i64()?;
        i32::try_from(v).map_err(|_| Error::ValueOutOfRange {
            kind: ValueKind::Int32,
            value: v as i128,
        })
    }

    /// Narrow any integer payload to u32, rejecting out-of-range values.
    pub fn to_u32(&self) -> Result<u32> {
        let v = self.to_u64()?;
        u32::try_from(v).map_err(|_| Error::ValueOutOfRange {
            kind: ValueKind::UInt32,
            value: v as i128,
        })
    }

    /// Widen any numeric payload to f64.
    pub fn to_f64(&self) -> Result<f64> {
        match *self {
            Value::Int16(v) => Ok(v as f64),
            Value::UInt16(v) => Ok(v as f64),
            Value::Int32(v) | Value::Long32(v) => Ok(v as f64),
            Value::UInt32(v) | Value::ULong32(v) => Ok(v as f64),
            Value::Int64(v) => Ok(v as f64),
            Value::UInt64(v) => Ok(v as f64),
            Value::Float32(v) => Ok(v as f64),
            Value::Float64(v) => Ok(v),
            _ => self.mismatch(ValueKind::Float64),
        }
    }

    /// Dispatch on the discriminant, presenting the payload to |visitor|.
    pub fn visit<V: Visitor>(&self, visitor: &mut V) {
        match self {
            Value::Null => visitor.on_null(),
            Value::Bool(v) => visitor.on_bool(*v),
            Value::Int16(v) => visitor.on_i16(*v),
            Value::UInt16(v) => visitor.on_u16(*v),
            Value::Int32(v) => visitor.on_i32(*v),
            Value::UInt32(v) => visitor.on_u32(*v),
            Value::Long32(v) => visitor.on_long32(*v),
            Value::ULong32(v) => visitor.on_ulong32(*v),
            Value::Int64(v) => visitor.on_i64(*v),
            Value::UInt64(v) => visitor.on_u64(*v),
            Value::Float32(v) => visitor.on_f32(*v),
            Value::Float64(v) => visitor.on_f64(*v),
            Value::Bytes(v) => visitor.on_bytes(v),
            Value::String(v) => visitor.on_string(v),
            Value::Container(v) => visitor.on_container(v),
            Value::Array(v) => visitor.on_array(v),
        }
    }
}

/// Visitor receives the payload of whichever variant a Value holds.
/// Callbacks default to no-ops so implementations handle only the
/// variants they care about.
pub trait Visitor {
    fn on_null(&mut self) {}
    fn on_bool(&mut self, _v: bool) {}
    fn on_i16(&mut self, _v: i16) {}
    fn on_u16(&mut self, _v: u16) {}
    fn on_i32(&mut self, _v: i32) {}
    fn on_u32(&mut self, _v: u32) {}
    fn on_long32(&mut self, _v: i32) {}
    fn on_ulong32(&mut self, _v: u32) {}
    fn on_i64(&mut self, _v: i64) {}
    fn on_u64(&mut self, _v: u64) {}
    fn on_f32(&mut self, _v: f32) {}
    fn on_f64(&mut self, _v: f64) {}
    fn on_bytes(&mut self, _v: &[u8]) {}
    fn on_string(&mut self, _v: &str) {}
    fn on_container(&mut self, _v: &SharedContainer) {}
    fn on_array(&mut self, _v: &[Entry]) {}
}

/// TypedValue maps a Rust type to its Value discriminant, backing the
/// generic `Value::is` / `Value::get` accessors. Long32 and ULong32 have
/// no distinct Rust type; use the `as_long32` / `as_ulong32` accessors.
pub trait TypedValue: Sized {
    const KIND: ValueKind;
    fn extract(value: &Value) -> Result<Self>;
}

macro_rules! typed_value {
    ($type:ty, $kind:ident, $accessor:ident) => {
        impl TypedValue for $type {
            const KIND: ValueKind = ValueKind::$kind;
            fn extract(value: &Value) -> Result<Self> {
                value.$accessor().map(Into::into)
            }
        }
    };
}

typed_value!(bool, Bool, as_bool);
typed_value!(i16, Int16, as_i16);
typed_value!(u16, UInt16, as_u16);
typed_value!(i32, Int32, as_i32);
typed_value!(u32, UInt32, as_u32);
typed_value!(i64, Int64, as_i64);
typed_value!(u64, UInt64, as_u64);
typed_value!(f32, Float32, as_f32);
typed_value!(f64, Float64, as_f64);

impl TypedValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;
    fn extract(value: &Value) -> Result<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}
impl TypedValue for String {
    const KIND: ValueKind = ValueKind::String;
    fn extract(value: &Value) -> Result<Self> {
        value.as_str().map(str::to_owned)
    }
}
impl TypedValue for SharedContainer {
    const KIND: ValueKind = ValueKind::Container;
    fn extract(value: &Value) -> Result<Self> {
        value.as_container().cloned()
    }
}

macro_rules! value_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

value_from!(bool, Bool);
value_from!(i16, Int16);
value_from!(u16, UInt16);
value_from!(i32, Int32);
value_from!(u32, UInt32);
value_from!(i64, Int64);
value_from!(u64, UInt64);
value_from!(f32, Float32);
value_from!(f64, Float64);
value_from!(Vec<u8>, Bytes);
value_from!(&[u8], Bytes);
value_from!(String, String);
value_from!(&str, String);
value_from!(SharedContainer, Container);

impl From<Container> for Value {
    fn from(c: Container) -> Self {
        Value::Container(Arc::new(c))
    }
}
impl From<Vec<Entry>> for Value {
    fn from(entries: Vec<Entry>) -> Self {
        Value::Array(entries)
    }
}

/// The lossless textual rendering used by the JSON and XML encoders.
/// Floats use the shortest round-trip form; non-finite floats render as
/// NaN / inf / -inf and round-trip only through the binary codec.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) | Value::Long32(v) => write!(f, "{v}"),
            Value::UInt32(v) | Value::ULong32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bytes(v) => {
                write!(
                    f,
                    "bytes:{}",
                    base64::display::Base64Display::with_config(v, base64::STANDARD)
                )
            }
            Value::String(v) => f.write_str(v),
            // Nested structures render through the JSON codec. A cyclic
            // graph has no finite rendering; Display can't fail, so it
            // falls back to a marker.
            Value::Container(_) | Value::Array(_) => {
                match crate::text::json::value_to_json(self) {
                    Ok(v) => f.write_str(&v.to_string()),
                    Err(_) => f.write_str("<cyclic>"),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_kind_dispatch_matches_variant_order() {
        let fixtures: Vec<(Value, u8)> = vec![
            (Value::Null, 0),
            (Value::Bool(true), 1),
            (Value::Int16(-2), 2),
            (Value::UInt16(2), 3),
            (Value::Int32(-4), 4),
            (Value::UInt32(4), 5),
            (Value::Long32(-6), 6),
            (Value::ULong32(6), 7),
            (Value::Int64(-8), 8),
            (Value::UInt64(8), 9),
            (Value::Float32(0.5), 10),
            (Value::Float64(0.25), 11),
            (Value::Bytes(vec![1]), 12),
            (Value::String("s".to_string()), 13),
            (Value::Container(Arc::new(Container::new())), 14),
            (Value::Array(vec![Entry::unnamed(1i32)]), 15),
        ];
        for (value, code) in fixtures {
            assert_eq!(value.kind().code(), code, "{value:?}");
        }
    }

    #[test]
    fn test_typed_accessors() {
        let v = Value::Int32(42);
        assert_eq!(v.as_i32().unwrap(), 42);
        assert_eq!(v.get::<i32>().unwrap(), 42);
        assert!(v.is::<i32>());
        assert!(!v.is::<String>());

        let err = v.as_str().unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: ValueKind::String,
                actual: ValueKind::Int32,
            }
        ));

        // Long32 shares i32's payload type but not its discriminant.
        let l = Value::Long32(7);
        assert!(l.as_i32().is_err());
        assert_eq!(l.as_long32().unwrap(), 7);
    }

    #[test]
    fn test_long32_range_checks() {
        assert!(Value::long32(i32::MAX as i64).is_ok());
        assert!(Value::long32(i32::MIN as i64).is_ok());

        let err = Value::long32(5_000_000_000).unwrap_err();
        assert_eq!(err.code(), 102);
        assert!(matches!(
            err,
            Error::ValueOutOfRange {
                kind: ValueKind::Long32,
                value: 5_000_000_000,
            }
        ));

        // The same magnitude is fine as an Int64.
        assert_eq!(
            Value::from(5_000_000_000i64).as_i64().unwrap(),
            5_000_000_000
        );

        assert!(Value::ulong32(u32::MAX as u64).is_ok());
        assert_eq!(Value::ulong32(1 << 32).unwrap_err().code(), 102);
    }

    #[test]
    fn test_widening_and_narrowing() {
        assert_eq!(Value::Int16(-3).to_i64().unwrap(), -3);
        assert_eq!(Value::ULong32(9).to_i64().unwrap(), 9);
        assert_eq!(Value::UInt64(u64::MAX).to_i64().unwrap_err().code(), 102);

        assert_eq!(Value::Int32(-1).to_u64().unwrap_err().code(), 102);
        assert_eq!(Value::Int64(1 << 40).to_i32().unwrap_err().code(), 102);
        assert_eq!(Value::Int64(1 << 20).to_i32().unwrap(), 1 << 20);

        assert_eq!(Value::UInt16(7).to_f64().unwrap(), 7.0);
        assert_eq!(Value::Float32(0.5).to_f64().unwrap(), 0.5);
        assert!(Value::String("7".into()).to_i64().is_err());
    }

    #[test]
    fn test_visitor_dispatch() {
        #[derive(Default)]
        struct Tally {
            ints: Vec<i64>,
            strings: usize,
        }
        impl Visitor for Tally {
            fn on_i32(&mut self, v: i32) {
                self.ints.push(v as i64);
            }
            fn on_i64(&mut self, v: i64) {
                self.ints.push(v);
            }
            fn on_string(&mut self, _v: &str) {
                self.strings += 1;
            }
        }

        let mut tally = Tally::default();
        for v in [
            Value::Int32(1),
            Value::Int64(2),
            Value::String("x".into()),
            Value::Null,
        ] {
            v.visit(&mut tally);
        }
        assert_eq!(tally.ints, vec![1, 2]);
        assert_eq!(tally.strings, 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int32(-42).to_string(), "-42");
        assert_eq!(Value::Float64(0.1).to_string(), "0.1");
        assert_eq!(Value::Float64(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Float64(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(
            Value::Bytes(vec![8, 6, 7, 5, 3, 0, 9]).to_string(),
            "bytes:CAYHBQMACQ=="
        );
        assert_eq!(Value::String("plain".into()).to_string(), "plain");
    }

    #[test]
    fn test_set_replaces_payload() {
        let mut v = Value::Int32(1);
        v.set("now a string");
        assert_eq!(v.kind(), ValueKind::String);
        assert_eq!(v.as_str().unwrap(), "now a string");
    }
}
