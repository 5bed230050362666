use carton::{Container, Value, ValueKind};
pub use carton::{ValidationCode, ValidationError};
use indexmap::IndexMap;
use std::sync::Arc;

/// Errors raised while building a Schema. These are programming errors
/// in the schema itself, distinct from the 310-317 validation failures
/// a built schema reports.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("constraint references undeclared field '{0}'; declare it with require() or optional() first")]
    UnknownField(String),
    #[error("invalid pattern for field '{field}': {source}")]
    Pattern {
        field: String,
        source: regex::Error,
    },
    #[error("{constraint} constraint does not apply to {kind} field '{field}'")]
    Inapplicable {
        field: String,
        kind: ValueKind,
        constraint: &'static str,
    },
    #[error("field '{0}' is declared twice")]
    DuplicateField(String),
}

/// Schema is an immutable set of field rules for validating containers.
/// Build one with `Schema::builder()`; a built Schema is safe to share
/// across threads and reuse for any number of validations.
///
/// Patterns use the `regex` crate dialect, which differs from
/// ECMAScript in not supporting backreferences or look-around.
#[derive(Debug)]
pub struct Schema {
    rules: IndexMap<String, Rule>,
}

#[derive(Debug)]
struct Rule {
    kind: ValueKind,
    required: bool,
    constraints: Vec<Constraint>,
}

enum Constraint {
    Range { min: f64, max: f64 },
    Length { min: usize, max: usize },
    Pattern(regex::Regex),
    OneOf(Vec<Value>),
    Custom(Predicate),
    Nested(Schema),
}

/// A custom check, invoked with an immutable view of the value.
pub type Predicate = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Range { min, max } => write!(f, "Range({min}..={max})"),
            Constraint::Length { min, max } => write!(f, "Length({min}..={max})"),
            Constraint::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            Constraint::OneOf(set) => write!(f, "OneOf({} values)", set.len()),
            Constraint::Custom(_) => f.write_str("Custom(..)"),
            Constraint::Nested(schema) => write!(f, "Nested({} rules)", schema.rules.len()),
        }
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            rules: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    /// Validate `container`, stopping at the first failure.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub fn validate(&self, container: &Container) -> Result<(), ValidationError> {
        self.run(container, true).map_err(|mut errors| {
            errors.swap_remove(0)
        })
    }

    /// Validate `container` exhaustively, reporting every failure in
    /// rule-declaration order.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate_all(&self, container: &Container) -> Result<(), Vec<ValidationError>> {
        self.run(container, false)
    }

    fn run(&self, container: &Container, first_only: bool) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (key, rule) in &self.rules {
            rule.check(key, container, &mut errors);
            if first_only && !errors.is_empty() {
                break;
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Rule {
    // Check this rule against the first value stored under |key|;
    // duplicates beyond the first are not consulted.
    fn check(&self, key: &str, container: &Container, errors: &mut Vec<ValidationError>) {
        let Some(value) = container.get(key) else {
            if self.required {
                errors.push(ValidationError::new(
                    key,
                    ValidationCode::MissingRequired,
                    "required field is missing",
                ));
            }
            return;
        };

        if value.kind() != self.kind {
            errors.push(ValidationError::new(
                key,
                ValidationCode::TypeMismatch,
                format!("expected {}, found {}", self.kind, value.kind()),
            ));
            return;
        }

        for constraint in &self.constraints {
            constraint.check(key, &value, errors);
        }
    }
}

impl Constraint {
    fn check(&self, key: &str, value: &Value, errors: &mut Vec<ValidationError>) {
        match self {
            Constraint::Range { min, max } => {
                let v = value.to_f64().expect("range constraints bind numeric kinds");
                if !(v >= *min && v <= *max) {
                    errors.push(ValidationError::new(
                        key,
                        ValidationCode::OutOfRange,
                        format!("{v} is outside [{min}, {max}]"),
                    ));
                }
            }
            Constraint::Length { min, max } => {
                let len = length_of(value);
                if len < *min || len > *max {
                    errors.push(ValidationError::new(
                        key,
                        ValidationCode::LengthOutOfRange,
                        format!("length {len} is outside [{min}, {max}]"),
                    ));
                }
            }
            Constraint::Pattern(re) => {
                let s = value.as_str().expect("pattern constraints bind strings");
                if !re.is_match(s) {
                    errors.push(ValidationError::new(
                        key,
                        ValidationCode::PatternMismatch,
                        format!("value does not match /{}/", re.as_str()),
                    ));
                }
            }
            Constraint::OneOf(allowed) => {
                if !allowed.contains(value) {
                    errors.push(ValidationError::new(
                        key,
                        ValidationCode::NotInAllowedSet,
                        format!("value is not one of the {} allowed", allowed.len()),
                    ));
                }
            }
            Constraint::Custom(predicate) => {
                if let Err(message) = predicate(value) {
                    errors.push(ValidationError::new(
                        key,
                        ValidationCode::PredicateFailed,
                        message,
                    ));
                }
            }
            Constraint::Nested(schema) => {
                let child = value
                    .as_container()
                    .expect("nested constraints bind containers");
                if let Err(nested) = schema.validate_all(child) {
                    for err in nested {
                        errors.push(ValidationError::new(
                            key,
                            ValidationCode::NestedFailed,
                            format!("{}: {}", err.field, err.message),
                        ));
                    }
                }
            }
        }
    }
}

// The length a Length constraint measures: bytes for strings (matching
// the wire's length prefix) and bytes payloads, elements for arrays,
// values for containers.
fn length_of(value: &Value) -> usize {
    match value {
        Value::Bytes(b) => b.len(),
        Value::String(s) => s.len(),
        Value::Array(a) => a.len(),
        Value::Container(c) => c.len(),
        _ => unreachable!("length constraints bind sized kinds"),
    }
}

/// SchemaBuilder is the fluent construction API:
///
/// ```
/// use carton::ValueKind;
/// use schema::Schema;
///
/// let schema = Schema::builder()
///     .require("age", ValueKind::Int32)
///     .range("age", 0.0, 150.0)
///     .optional("email", ValueKind::String)
///     .pattern("email", "^[^@]+@[^@]+$")
///     .build()
///     .unwrap();
/// ```
///
/// Constraint errors (unknown fields, bad patterns, inapplicable
/// constraints) are collected and reported together by `build`.
pub struct SchemaBuilder {
    rules: IndexMap<String, Rule>,
    errors: Vec<BuildError>,
}

impl SchemaBuilder {
    /// Declare a field that must be present with the given kind.
    pub fn require(self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.declare(key.into(), kind, true)
    }

    /// Declare a field that may be absent, but must have the given kind
    /// when present.
    pub fn optional(self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.declare(key.into(), kind, false)
    }

    fn declare(mut self, key: String, kind: ValueKind, required: bool) -> Self {
        if self.rules.contains_key(&key) {
            self.errors.push(BuildError::DuplicateField(key));
            return self;
        }
        self.rules.insert(
            key,
            Rule {
                kind,
                required,
                constraints: Vec::new(),
            },
        );
        self
    }

    /// Constrain a numeric field to [min, max], inclusive.
    pub fn range(self, key: &str, min: f64, max: f64) -> Self {
        self.constrain(key, "range", |kind| kind.is_numeric(), || {
            Constraint::Range { min, max }
        })
    }

    /// Constrain the length of a string, bytes, array, or container
    /// field to [min, max], inclusive. String length is in bytes.
    pub fn length(self, key: &str, min: usize, max: usize) -> Self {
        self.constrain(
            key,
            "length",
            |kind| {
                matches!(
                    kind,
                    ValueKind::String | ValueKind::Bytes | ValueKind::Array | ValueKind::Container
                )
            },
            || Constraint::Length { min, max },
        )
    }

    /// Constrain a string field to match `pattern` (the `regex` crate
    /// dialect: no backreferences or look-around).
    pub fn pattern(mut self, key: &str, pattern: &str) -> Self {
        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(source) => {
                self.errors.push(BuildError::Pattern {
                    field: key.to_string(),
                    source,
                });
                return self;
            }
        };
        self.constrain(key, "pattern", |kind| kind == ValueKind::String, || {
            Constraint::Pattern(re)
        })
    }

    /// Constrain a field to one of an enumerated set of values.
    pub fn one_of(self, key: &str, allowed: Vec<Value>) -> Self {
        self.constrain(key, "one_of", |_| true, || Constraint::OneOf(allowed))
    }

    /// Attach a custom predicate, invoked with an immutable view of the
    /// value; return an error message to fail validation with code 316.
    pub fn custom<F>(self, key: &str, predicate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.constrain(key, "custom", |_| true, || {
            Constraint::Custom(Arc::new(predicate))
        })
    }

    /// Validate a nested container field against `nested`.
    pub fn nested(self, key: &str, nested: Schema) -> Self {
        self.constrain(key, "nested", |kind| kind == ValueKind::Container, || {
            Constraint::Nested(nested)
        })
    }

    fn constrain(
        mut self,
        key: &str,
        name: &'static str,
        applies: impl FnOnce(ValueKind) -> bool,
        constraint: impl FnOnce() -> Constraint,
    ) -> Self {
        let Some(rule) = self.rules.get_mut(key) else {
            self.errors.push(BuildError::UnknownField(key.to_string()));
            return self;
        };
        if !applies(rule.kind) {
            self.errors.push(BuildError::Inapplicable {
                field: key.to_string(),
                kind: rule.kind,
                constraint: name,
            });
            return self;
        }
        rule.constraints.push(constraint());
        self
    }

    /// Finalize the schema. Fails with the first collected build error.
    pub fn build(mut self) -> Result<Schema, BuildError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        Ok(Schema { rules: self.rules })
    }
}
