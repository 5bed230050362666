use crate::ValueKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Error is the unified error taxonomy of the container engine.
/// Every variant maps to a stable numeric code, grouped by hundred:
/// 1xx value operations, 2xx serialization, 3xx validation,
/// 4xx resources, 5xx concurrency.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Value operations (100-199).
    #[error("key not found: '{0}'")]
    KeyNotFound(String),
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("value {value} is out of range for {kind}")]
    ValueOutOfRange { kind: ValueKind, value: i128 },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("duplicate key where forbidden: '{0}'")]
    DuplicateKey(String),
    #[error("empty key")]
    EmptyKey,
    #[error("kind {kind} is not permitted by this store (allows {allowed:?})")]
    TypeConstraintViolated {
        kind: ValueKind,
        allowed: crate::KindSet,
    },

    // Serialization (200-299).
    #[error("serialize failed: {0}")]
    SerializeFailed(String),
    #[error("deserialize failed: {0}")]
    DeserializeFailed(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("unknown wire version {actual} (this decoder understands {expected})")]
    VersionMismatch { expected: u8, actual: u8 },
    #[error("corrupted data: {0}")]
    CorruptedData(String),
    #[error("encoding error: {0}")]
    EncodingError(String),

    // Validation (300-399); the code is carried by the ValidationError.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // Resources (400-499).
    #[error("allocation of {0} bytes failed")]
    AllocationFailed(usize),
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("resource exhausted: {0}")]
    Exhausted(String),

    // Concurrency (500-599).
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("lock timed out")]
    LockTimeout,
    #[error("concurrent modification detected")]
    ConcurrentModification,
}

impl Error {
    /// The stable numeric code of this error.
    pub fn code(&self) -> u16 {
        use Error::*;
        match self {
            KeyNotFound(_) => 100,
            TypeMismatch { .. } => 101,
            ValueOutOfRange { .. } => 102,
            InvalidValue(_) => 103,
            DuplicateKey(_) => 104,
            EmptyKey => 105,
            TypeConstraintViolated { .. } => 106,

            SerializeFailed(_) => 200,
            DeserializeFailed(_) => 201,
            InvalidFormat(_) => 202,
            VersionMismatch { .. } => 203,
            CorruptedData(_) => 204,
            EncodingError(_) => 205,

            Validation(err) => err.code.value(),

            AllocationFailed(_) => 400,
            Io(_) => 401,
            PermissionDenied(_) => 402,
            Exhausted(_) => 403,

            LockFailed(_) => 500,
            LockTimeout => 501,
            ConcurrentModification => 502,
        }
    }

    /// The subsystem an error code belongs to.
    pub fn source_tag(&self) -> &'static str {
        match self.code() {
            100..=199 => "value",
            200..=299 => "serialization",
            300..=399 => "validation",
            400..=499 => "resource",
            _ => "concurrency",
        }
    }

    pub fn is_value_error(&self) -> bool {
        (100..200).contains(&self.code())
    }
    pub fn is_serialization_error(&self) -> bool {
        (200..300).contains(&self.code())
    }
    pub fn is_validation_error(&self) -> bool {
        (300..400).contains(&self.code())
    }
    pub fn is_resource_error(&self) -> bool {
        (400..500).contains(&self.code())
    }
    pub fn is_concurrency_error(&self) -> bool {
        (500..600).contains(&self.code())
    }
}

/// ValidationCode is the stable code of one schema-validation failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ValidationCode {
    MissingRequired = 310,
    TypeMismatch = 311,
    OutOfRange = 312,
    LengthOutOfRange = 313,
    PatternMismatch = 314,
    NotInAllowedSet = 315,
    PredicateFailed = 316,
    NestedFailed = 317,
}

impl ValidationCode {
    pub const fn value(self) -> u16 {
        self as u16
    }
}

/// ValidationError is one schema-validation failure: the field it
/// concerns, its stable code, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation of '{field}' failed ({}): {message}", .code.value())]
pub struct ValidationError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}
