use crate::policy::Store;
use crate::snapshot::Rcu;
use crate::{text, wire, StoragePolicy};
use crate::{Entry, Error, Header, Result, Value, ValueKind};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Container is a keyed, ordered sequence of values with a routing
/// header. Duplicate keys are permitted (by default) and insertion order
/// is preserved for serialization.
///
/// Every public operation is safe to call from multiple threads: a
/// reader-writer lock guards the header and value store, readers share
/// it, writers exclude, and batch operations take it exactly once.
/// An optional snapshot path serves wait-free reads (see
/// `enable_snapshot_reads`).
pub struct Container {
    inner: RwLock<Inner>,
    // The published value-store image for wait-free reads; empty and
    // unmaintained until `snapshots` is set.
    published: Rcu<Vec<Entry>>,
    snapshots: AtomicBool,
    forbid_duplicates: bool,
    #[cfg(feature = "metrics")]
    metrics: metrics::Recorder,
}

struct Inner {
    header: Header,
    store: Store,
}

impl Container {
    /// An empty container with the default ordered-vector policy.
    pub fn new() -> Self {
        Self::with_policy(StoragePolicy::Ordered)
    }

    /// An empty container with the given storage policy. The policy is
    /// fixed for the container's lifetime.
    pub fn with_policy(policy: StoragePolicy) -> Self {
        Self {
            inner: RwLock::new(Inner {
                header: Header::default(),
                store: Store::new(policy),
            }),
            published: Rcu::new(Vec::new()),
            snapshots: AtomicBool::new(false),
            forbid_duplicates: false,
            #[cfg(feature = "metrics")]
            metrics: metrics::Recorder::new(),
        }
    }

    /// Make `set` reject keys that are already present with
    /// DuplicateKey, instead of appending. Builder-style; call before
    /// the container is shared.
    pub fn forbid_duplicate_keys(mut self) -> Self {
        self.forbid_duplicates = true;
        self
    }

    pub(crate) fn from_parts(header: Header, entries: Vec<Entry>) -> Self {
        let container = Self::new();
        {
            let mut inner = container.inner.write();
            inner.header = header;
            for entry in entries {
                inner.store.set(entry).expect("ordered stores accept all kinds");
            }
        }
        container
    }

    /// The storage policy this container was constructed with.
    pub fn policy(&self) -> StoragePolicy {
        self.inner.read().store.policy()
    }

    // Header operations ----------------------------------------------------

    /// A copy of the routing header.
    pub fn header(&self) -> Header {
        self.inner.read().header.clone()
    }

    pub fn set_header(&self, header: Header) {
        self.inner.write().header = header;
    }

    pub fn set_source(&self, id: impl Into<String>, sub_id: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.header.source_id = id.into();
        inner.header.source_sub_id = sub_id.into();
    }

    pub fn set_target(&self, id: impl Into<String>, sub_id: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.header.target_id = id.into();
        inner.header.target_sub_id = sub_id.into();
    }

    pub fn set_message_type(&self, message_type: impl Into<String>) {
        self.inner.write().header.message_type = message_type.into();
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.inner.write().header.version = version.into();
    }

    pub fn source_id(&self) -> String {
        self.inner.read().header.source_id.clone()
    }
    pub fn source_sub_id(&self) -> String {
        self.inner.read().header.source_sub_id.clone()
    }
    pub fn target_id(&self) -> String {
        self.inner.read().header.target_id.clone()
    }
    pub fn target_sub_id(&self) -> String {
        self.inner.read().header.target_sub_id.clone()
    }
    pub fn message_type(&self) -> String {
        self.inner.read().header.message_type.clone()
    }
    pub fn version(&self) -> String {
        self.inner.read().header.version.clone()
    }

    /// Swap the header's source and target in one step. An involution:
    /// applying twice restores the original header.
    pub fn swap_header(&self) {
        self.inner.write().header.swap();
    }

    /// An empty container addressed as a reply to this one: same policy
    /// and duplicate-key configuration, header swapped.
    pub fn reply(&self) -> Container {
        let inner = self.inner.read();
        let mut reply = Container::with_policy(inner.store.policy());
        reply.forbid_duplicates = self.forbid_duplicates;
        reply.inner.get_mut().header = inner.header.swapped();
        reply
    }

    // Value operations -----------------------------------------------------

    /// Append a named value. Fails on an empty key, a disallowed kind
    /// (kind-restricted policy), or a duplicate key where forbidden.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let entry = Entry::new(key, value);
        check_key(&entry.name)?;

        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        if self.forbid_duplicates && inner.store.contains(&entry.name) {
            return Err(Error::DuplicateKey(entry.name));
        }
        inner.store.set(entry)?;
        self.publish_locked(&inner);
        Ok(())
    }

    /// Overwrite the first value stored under `key`, appending if the
    /// key is absent. This is the explicit overwrite complement of the
    /// append-only `set`.
    pub fn replace(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let entry = Entry::new(key, value);
        check_key(&entry.name)?;

        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        inner.store.replace(entry)?;
        self.publish_locked(&inner);
        Ok(())
    }

    /// Append many values under one lock acquisition. The batch commits
    /// entirely or not at all: every entry is validated against the key
    /// and policy rules before the store is touched.
    pub fn bulk_insert(&self, entries: Vec<Entry>) -> Result<()> {
        for entry in &entries {
            check_key(&entry.name)?;
        }

        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        if let StoragePolicy::Restricted(allowed) = inner.store.policy() {
            for entry in &entries {
                if !allowed.contains(entry.value.kind()) {
                    return Err(Error::TypeConstraintViolated {
                        kind: entry.value.kind(),
                        allowed,
                    });
                }
            }
        }
        if self.forbid_duplicates {
            let mut batch_keys = fxhash::FxHashSet::default();
            for entry in &entries {
                if inner.store.contains(&entry.name) || !batch_keys.insert(&entry.name) {
                    return Err(Error::DuplicateKey(entry.name.clone()));
                }
            }
        }

        #[cfg(feature = "metrics")]
        for _ in 0..entries.len() {
            self.metrics.incr(metrics::Op::Move);
        }

        inner.store.reserve(entries.len());
        for entry in entries {
            inner.store.set(entry).expect("batch was validated above");
        }
        self.publish_locked(&inner);
        Ok(())
    }

    /// `bulk_insert` over any iterator of key/value pairs.
    pub fn set_all<K, V, I>(&self, items: I) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.bulk_insert(
            items
                .into_iter()
                .map(|(k, v)| Entry::new(k, v))
                .collect(),
        )
    }

    /// The first value stored under `key`, in insertion order.
    /// Absence is not an error.
    pub fn get(&self, key: &str) -> Option<Value> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Read);

        self.inner.read().store.get(key).cloned()
    }

    /// Every value stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Vec<Value> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Read);

        let inner = self.inner.read();
        inner.store.get_all(key).into_iter().cloned().collect()
    }

    /// Look up many keys under one lock acquisition.
    pub fn get_batch(&self, keys: &[&str]) -> Vec<Option<Value>> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Read);

        let inner = self.inner.read();
        keys.iter()
            .map(|key| inner.store.get(key).cloned())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Read);

        self.inner.read().store.contains(key)
    }

    /// Membership tests for many keys under one lock acquisition.
    pub fn contains_batch(&self, keys: &[&str]) -> Vec<bool> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Read);

        let inner = self.inner.read();
        keys.iter().map(|key| inner.store.contains(key)).collect()
    }

    /// Remove every value stored under `key`. Returns whether any was.
    pub fn remove(&self, key: &str) -> bool {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        let removed = inner.store.remove(key) > 0;
        if removed {
            self.publish_locked(&inner);
        }
        removed
    }

    /// Remove many keys under one lock acquisition, returning the
    /// number of values removed.
    pub fn remove_batch(&self, keys: &[&str]) -> usize {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        let removed = keys.iter().map(|key| inner.store.remove(key)).sum();
        if removed > 0 {
            self.publish_locked(&inner);
        }
        removed
    }

    /// Compare-and-swap: replace the first value under `key` with `new`
    /// iff it currently equals `expected`. Atomic under the writer lock.
    /// Returns whether the swap happened; a missing key is KeyNotFound.
    pub fn update_if(&self, key: &str, expected: &Value, new: impl Into<Value>) -> Result<bool> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        let Some(slot) = inner.store.get_mut(key) else {
            return Err(Error::KeyNotFound(key.to_string()));
        };
        if slot != expected {
            return Ok(false);
        }
        *slot = new.into();
        self.publish_locked(&inner);
        Ok(true)
    }

    pub fn clear(&self) {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Write);

        let mut inner = self.inner.write();
        inner.store.clear();
        self.publish_locked(&inner);
    }

    pub fn len(&self) -> usize {
        self.inner.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().store.is_empty()
    }

    pub fn reserve(&self, additional: usize) {
        self.inner.write().store.reserve(additional);
    }

    /// The distinct keys, in first-insertion order.
    pub fn keys(&self) -> Vec<String> {
        use itertools::Itertools;
        let inner = self.inner.read();
        inner
            .store
            .entries()
            .iter()
            .map(|e| e.name.clone())
            .unique()
            .collect()
    }

    /// A point-in-time copy of all entries, in insertion order.
    pub fn to_vec(&self) -> Vec<Entry> {
        self.inner.read().store.entries().to_vec()
    }

    /// How many values of each kind the container holds, in wire-code
    /// order, omitting absent kinds.
    pub fn value_kinds(&self) -> Vec<(ValueKind, usize)> {
        let inner = self.inner.read();
        let mut counts = [0usize; 16];
        for entry in inner.store.entries() {
            counts[entry.value.kind().code() as usize] += 1;
        }
        ValueKind::ALL
            .into_iter()
            .zip(counts)
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    // Clones ---------------------------------------------------------------

    /// A clone sharing nested containers with this one. The value store
    /// itself (names, scalars, bytes, strings) is copied.
    pub fn clone_shallow(&self) -> Container {
        #[cfg(feature = "metrics")]
        self.metrics.incr(metrics::Op::Copy);

        let inner = self.inner.read();
        let mut out = Container::with_policy(inner.store.policy());
        out.forbid_duplicates = self.forbid_duplicates;
        {
            let out_inner = out.inner.get_mut();
            out_inner.header = inner.header.clone();
            out_inner.store = inner.store.clone();
        }
        out
    }

    /// A clone with no shared interior: nested containers are cloned
    /// recursively into independent subtrees. Fails on a reference
    /// cycle, which cannot be deep-copied.
    pub fn clone_deep(&self) -> Result<Container> {
        #[cfg(feature = "metrics")]
        self.metrics.incr(metrics::Op::Copy);

        let mut path = vec![self as *const Container];
        self.clone_deep_inner(&mut path)
    }

    fn clone_deep_inner(&self, path: &mut Vec<*const Container>) -> Result<Container> {
        let (header, entries) = self.snapshot_parts();
        let policy = self.policy();

        let mut deep_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            deep_entries.push(Entry {
                name: entry.name,
                value: deep_clone_value(entry.value, path)?,
            });
        }

        let mut out = Container::with_policy(policy);
        out.forbid_duplicates = self.forbid_duplicates;
        {
            let out_inner = out.inner.get_mut();
            out_inner.header = header;
            for entry in deep_entries {
                out_inner.store.set(entry)?;
            }
        }
        Ok(out)
    }

    // Serialization --------------------------------------------------------

    /// Encode to the binary wire format. The encoding is deterministic
    /// for a given container state, and leaves the container unchanged.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn serialize_binary(&self) -> Result<Vec<u8>> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Serialize);

        let (header, entries) = self.snapshot_parts();
        wire::encode(&header, &entries, false, Some(self as *const Container))
    }

    /// As `serialize_binary`, with the CRC32 trailer (flags bit 0) set.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn serialize_binary_with_crc(&self) -> Result<Vec<u8>> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Serialize);

        let (header, entries) = self.snapshot_parts();
        wire::encode(&header, &entries, true, Some(self as *const Container))
    }

    /// Encode once, then hand out the image as a lazy sequence of
    /// `chunk_size`-byte buffers.
    pub fn serialize_chunked(&self, chunk_size: usize) -> Result<wire::ChunkIter> {
        Ok(wire::ChunkIter::new(self.serialize_binary()?, chunk_size))
    }

    /// Decode a binary wire image into a new container with the default
    /// ordered policy.
    pub fn deserialize_binary(buf: &[u8]) -> Result<Container> {
        Self::deserialize_binary_with_policy(buf, StoragePolicy::Ordered)
    }

    /// Decode a binary wire image into a new container with the given
    /// policy. A kind-restricted policy rejects disallowed payloads.
    #[tracing::instrument(level = "debug", skip_all, fields(len = buf.len()))]
    pub fn deserialize_binary_with_policy(buf: &[u8], policy: StoragePolicy) -> Result<Container> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let (header, entries) = wire::decode(buf)?;

        let mut out = Container::with_policy(policy);
        {
            let out_inner = out.inner.get_mut();
            out_inner.header = header;
            out_inner.store.reserve(entries.len());
            for entry in entries {
                out_inner.store.set(entry)?;
            }
        }

        #[cfg(feature = "metrics")]
        out.metrics.observe(
            metrics::Op::Deserialize,
            start.elapsed().as_nanos().min(u64::MAX as u128) as u64,
        );
        Ok(out)
    }

    /// Encode to the documented JSON shape:
    /// `{"header":{..},"values":[{"key","type","value"},..]}`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn to_json(&self) -> Result<String> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Serialize);

        let value = text::json::container_to_json(self)?;
        serde_json::to_string(&value).map_err(|err| Error::SerializeFailed(err.to_string()))
    }

    /// The container as a `serde_json::Value` tree.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        text::json::container_to_json(self)
    }

    /// Decode a container from the JSON shape `to_json` emits.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn from_json(s: &str) -> Result<Container> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let out = text::json::container_from_json(s)?;

        #[cfg(feature = "metrics")]
        out.metrics.observe(
            metrics::Op::Deserialize,
            start.elapsed().as_nanos().min(u64::MAX as u128) as u64,
        );
        Ok(out)
    }

    /// Encode to the documented XML shape.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn to_xml(&self) -> Result<String> {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.start(metrics::Op::Serialize);

        text::xml::container_to_xml(self)
    }

    /// Decode a container from the XML shape `to_xml` emits.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn from_xml(s: &str) -> Result<Container> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let out = text::xml::container_from_xml(s)?;

        #[cfg(feature = "metrics")]
        out.metrics.observe(
            metrics::Op::Deserialize,
            start.elapsed().as_nanos().min(u64::MAX as u128) as u64,
        );
        Ok(out)
    }

    // Snapshot reads (lock-free path) --------------------------------------

    /// Start maintaining a published snapshot of the value store, and
    /// serve wait-free reads from it. Writers pay an O(n) copy per
    /// mutation once enabled. Snapshot reads may be slightly stale;
    /// callers needing read-your-writes use the locked path.
    pub fn enable_snapshot_reads(&self) {
        let inner = self.inner.write();
        self.snapshots.store(true, Ordering::Release);
        self.published.store(inner.store.entries().to_vec());
    }

    pub fn snapshot_reads_enabled(&self) -> bool {
        self.snapshots.load(Ordering::Acquire)
    }

    /// Run `f` over the current snapshot without taking the container
    /// lock. None when snapshot reads are not enabled.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&[Entry]) -> R) -> Option<R> {
        if !self.snapshot_reads_enabled() {
            return None;
        }
        Some(self.published.read(|entries| f(entries)))
    }

    /// Wait-free `get` against the current snapshot. None when snapshot
    /// reads are not enabled or the key is absent.
    pub fn snapshot_get(&self, key: &str) -> Option<Value> {
        self.with_snapshot(|entries| {
            entries
                .iter()
                .find(|e| e.name == key)
                .map(|e| e.value.clone())
        })
        .flatten()
    }

    // While the write lock is held, mirror the store into the published
    // snapshot. Publication order therefore matches write linearization.
    fn publish_locked(&self, inner: &Inner) {
        if self.snapshot_reads_enabled() {
            self.published.store(inner.store.entries().to_vec());
        }
    }

    // Metrics --------------------------------------------------------------

    /// A snapshot of this container's operation metrics.
    #[cfg(feature = "metrics")]
    pub fn metrics_snapshot(&self) -> metrics::Snapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn snapshot_parts(&self) -> (Header, Vec<Entry>) {
        let inner = self.inner.read();
        (inner.header.clone(), inner.store.entries().to_vec())
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}

fn deep_clone_value(value: Value, path: &mut Vec<*const Container>) -> Result<Value> {
    match value {
        Value::Container(child) => {
            let identity = Arc::as_ptr(&child);
            if path.contains(&identity) {
                return Err(Error::InvalidValue(
                    "container references itself and cannot be deep-cloned".to_string(),
                ));
            }
            path.push(identity);
            let cloned = child.clone_deep_inner(path)?;
            path.pop();
            Ok(Value::Container(Arc::new(cloned)))
        }
        Value::Array(elements) => {
            let mut out = Vec::with_capacity(elements.len());
            for element in elements {
                out.push(Entry {
                    name: element.name,
                    value: deep_clone_value(element.value, path)?,
                });
            }
            Ok(Value::Array(out))
        }
        other => Ok(other),
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

/// Clone is the shallow clone: nested containers remain shared.
impl Clone for Container {
    fn clone(&self) -> Self {
        self.clone_shallow()
    }
}

/// Equality is deep content equality of header and values, comparing
/// point-in-time copies of both sides. Not defined for cyclic graphs.
impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (lhs_header, lhs_entries) = self.snapshot_parts();
        let (rhs_header, rhs_entries) = other.snapshot_parts();
        lhs_header == rhs_header && lhs_entries == rhs_entries
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Container")
            .field("header", &inner.header)
            .field("policy", &inner.store.policy())
            .field("values", &inner.store.entries())
            .finish()
    }
}
