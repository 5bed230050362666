// ValueKind is the sixteen-way discriminant whose numeric codes are the
// wire-format type codes; KindSet is a bit-set of kinds used by the
// kind-restricted storage policy.
mod kind;
pub use kind::{KindSet, ValueKind};

// The unified error taxonomy: numeric codes grouped by hundred, with
// category predicates and the 310-317 validation codes.
mod error;
pub use error::{Error, Result, ValidationCode, ValidationError};

// Value is the discriminated payload; Entry is a named Value.
mod value;
pub use value::{Entry, SharedContainer, TypedValue, Value, Visitor};

// The routing header carried by every container.
mod header;
pub use header::{Header, DEFAULT_VERSION};

// Storage policies supply the lookup structure behind a container's
// value store: ordered-vector, hash-indexed, or kind-restricted.
mod policy;
pub use policy::StoragePolicy;

// Container is the keyed value sequence plus header, guarded by a
// reader-writer lock.
mod container;
pub use container::Container;

// The binary wire codec, and standalone per-value record helpers.
pub mod wire;
pub use wire::{decode_value, encode_value, ChunkIter};

// JSON and XML textual codecs (driven through Container methods).
mod text;

// Rcu is the epoch-reclaimed publication cell behind the container's
// wait-free snapshot reads.
mod snapshot;
pub use snapshot::Rcu;
