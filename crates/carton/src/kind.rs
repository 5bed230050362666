use std::fmt;

/// ValueKind is the discriminant of a Value. Its numeric codes 0-15 are
/// the wire-format type codes: the encoder writes `kind.code()` verbatim
/// and the decoder indexes the dispatch table with it, so this ordering
/// is stable forever.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Null = 0,
    Bool = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Long32 = 6,
    ULong32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float32 = 10,
    Float64 = 11,
    Bytes = 12,
    String = 13,
    Container = 14,
    Array = 15,
}

impl ValueKind {
    /// All kinds, in wire-code order.
    pub const ALL: [ValueKind; 16] = [
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Int16,
        ValueKind::UInt16,
        ValueKind::Int32,
        ValueKind::UInt32,
        ValueKind::Long32,
        ValueKind::ULong32,
        ValueKind::Int64,
        ValueKind::UInt64,
        ValueKind::Float32,
        ValueKind::Float64,
        ValueKind::Bytes,
        ValueKind::String,
        ValueKind::Container,
        ValueKind::Array,
    ];

    /// The wire-format type code of this kind.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Map a wire-format type code back to its kind.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// The textual tag used by the JSON and XML codecs.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int16 => "int16",
            ValueKind::UInt16 => "uint16",
            ValueKind::Int32 => "int32",
            ValueKind::UInt32 => "uint32",
            ValueKind::Long32 => "long32",
            ValueKind::ULong32 => "ulong32",
            ValueKind::Int64 => "int64",
            ValueKind::UInt64 => "uint64",
            ValueKind::Float32 => "float32",
            ValueKind::Float64 => "float64",
            ValueKind::Bytes => "bytes",
            ValueKind::String => "string",
            ValueKind::Container => "container",
            ValueKind::Array => "array",
        }
    }

    /// Map a textual tag back to its kind.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Whether this kind is one of the sized integer or float kinds.
    pub const fn is_numeric(self) -> bool {
        self.code() >= ValueKind::Int16.code() && self.code() <= ValueKind::Float64.code()
    }

    /// Whether this kind is a sized integer kind.
    pub const fn is_integer(self) -> bool {
        self.code() >= ValueKind::Int16.code() && self.code() <= ValueKind::UInt64.code()
    }

    /// The wire payload width of fixed-width kinds, or None for
    /// variable-width kinds (and Null, which has no payload).
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            ValueKind::Bool => Some(1),
            ValueKind::Int16 | ValueKind::UInt16 => Some(2),
            ValueKind::Int32 | ValueKind::UInt32 => Some(4),
            ValueKind::Long32 | ValueKind::ULong32 => Some(4),
            ValueKind::Float32 => Some(4),
            ValueKind::Int64 | ValueKind::UInt64 | ValueKind::Float64 => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// KindSet is a set of ValueKinds packed into a u16, one bit per wire
/// code. It backs the kind-restricted storage policy.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Default)]
pub struct KindSet(u16);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);
    pub const ALL: KindSet = KindSet(u16::MAX);

    /// A set restricted to the numeric kinds.
    pub const NUMERIC: KindSet = KindSet(0b0000_1111_1111_1100);

    pub fn of(kinds: &[ValueKind]) -> Self {
        kinds.iter().copied().collect()
    }

    #[inline]
    pub const fn contains(self, kind: ValueKind) -> bool {
        self.0 & (1 << kind.code()) != 0
    }

    #[inline]
    pub const fn with(self, kind: ValueKind) -> Self {
        KindSet(self.0 | (1 << kind.code()))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = ValueKind> {
        ValueKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl std::ops::BitOr for KindSet {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self::Output {
        KindSet(self.0 | other.0)
    }
}

impl std::ops::BitAnd for KindSet {
    type Output = Self;

    #[inline]
    fn bitand(self, other: Self) -> Self::Output {
        KindSet(self.0 & other.0)
    }
}

impl FromIterator<ValueKind> for KindSet {
    fn from_iter<T: IntoIterator<Item = ValueKind>>(iter: T) -> Self {
        iter.into_iter().fold(KindSet::EMPTY, KindSet::with)
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (ind, kind) in self.iter().enumerate() {
            if ind != 0 {
                f.write_str("|")?;
            }
            f.write_str(kind.name())?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_codes_match_wire_positions() {
        for (position, kind) in ValueKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.code() as usize, position);
            assert_eq!(ValueKind::from_code(kind.code()), Some(kind));
            assert_eq!(ValueKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ValueKind::from_code(16), None);
        assert_eq!(ValueKind::from_name("int128"), None);
    }

    #[test]
    fn test_classification() {
        assert!(!ValueKind::Null.is_numeric());
        assert!(!ValueKind::Bool.is_numeric());
        assert!(ValueKind::Int16.is_numeric());
        assert!(ValueKind::Float64.is_numeric());
        assert!(!ValueKind::Bytes.is_numeric());

        assert!(ValueKind::UInt64.is_integer());
        assert!(!ValueKind::Float32.is_integer());

        assert_eq!(ValueKind::Null.fixed_width(), None);
        assert_eq!(ValueKind::Bool.fixed_width(), Some(1));
        assert_eq!(ValueKind::Long32.fixed_width(), Some(4));
        assert_eq!(ValueKind::Float64.fixed_width(), Some(8));
        assert_eq!(ValueKind::Array.fixed_width(), None);
    }

    #[test]
    fn test_kind_set() {
        let set = KindSet::of(&[ValueKind::Int32, ValueKind::String]);
        assert!(set.contains(ValueKind::Int32));
        assert!(set.contains(ValueKind::String));
        assert!(!set.contains(ValueKind::Bool));
        assert_eq!(set.len(), 2);
        assert_eq!(format!("{set:?}"), "{int32|string}");

        assert_eq!(KindSet::ALL.len(), 16);
        assert!(KindSet::EMPTY.is_empty());

        for kind in ValueKind::ALL {
            assert_eq!(KindSet::NUMERIC.contains(kind), kind.is_numeric());
        }
    }
}
