use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use prost::Message;

use crate::{
    Cursor, Datastore, ItemResults, Key, Query, QueryRow, Record, ServiceError, StoreTransaction,
    utils::{data_path, index_path, sequence_path},
};

/// Chunk sizes of every call a [`MemoryStore`] received, per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub put: Vec<usize>,
    pub get: Vec<usize>,
    pub delete: Vec<usize>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    versions: HashMap<Vec<u8>, u64>,
    sequences: HashMap<String, i64>,
    clock: u64,
}

impl State {
    fn version(&self, path: &[u8]) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }

    fn touch(&mut self, path: Vec<u8>) {
        self.clock += 1;
        self.versions.insert(path, self.clock);
    }

    fn allocate_id(&mut self, kind: &str) -> i64 {
        let next = self.sequences.entry(kind.to_string()).or_insert(0);
        *next += 1;
        let id = *next;
        self.entries
            .insert(sequence_path(kind).into_bytes(), id.to_be_bytes().to_vec());
        id
    }

    fn complete(&mut self, key: &Key) -> Key {
        let mut key = key.clone();
        if !key.is_complete() {
            key.id = self.allocate_id(&key.kind);
        }
        key
    }

    fn read(&self, key: &Key) -> Result<Record, ServiceError> {
        let data = self
            .entries
            .get(data_path(key).as_bytes())
            .ok_or(ServiceError::NoSuchEntity)?;
        Record::decode(data.as_slice()).map_err(|err| ServiceError::Backend(err.to_string()))
    }

    fn remove_indexes(&mut self, key: &Key) {
        let Ok(old) = self.read(key) else {
            return;
        };
        for entry in old.indexes {
            let path = index_path(&key.kind, &entry.field, &entry.value, key).into_bytes();
            self.entries.remove(&path);
            self.touch(path);
        }
    }

    fn write(&mut self, key: &Key, record: &Record) {
        self.remove_indexes(key);
        for entry in &record.indexes {
            let path = index_path(&key.kind, &entry.field, &entry.value, key).into_bytes();
            self.entries.insert(path.clone(), Vec::new());
            self.touch(path);
        }
        let path = data_path(key).into_bytes();
        self.entries.insert(path.clone(), record.encode_to_vec());
        self.touch(path);
    }

    fn remove(&mut self, key: &Key) {
        self.remove_indexes(key);
        let path = data_path(key).into_bytes();
        self.entries.remove(&path);
        self.touch(path);
    }
}

#[derive(Default)]
struct Faults {
    next_call: Option<ServiceError>,
    keys: HashMap<Key, ServiceError>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    calls: Mutex<CallLog>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process [`Datastore`] keeping entities in an ordered map.
///
/// Besides serving as a test double it records every call and can be told to
/// fail whole calls or individual keys.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = *lock(&inner.latency) {
            std::thread::sleep(latency);
        }
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        lock(&self.inner.state)
            .entries
            .keys()
            .filter(|path| path.starts_with(b"entity/data/"))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> CallLog {
        lock(&self.inner.calls).clone()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Delays every batch call, making overlapping calls observable.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.inner.latency) = latency;
    }

    /// Fails the next batch call as a whole with `err`.
    pub fn fail_next_call(&self, err: ServiceError) {
        lock(&self.inner.faults).next_call = Some(err);
    }

    /// Reports `err` for `key` in every call until faults are cleared.
    pub fn fail_key(&self, key: Key, err: ServiceError) {
        lock(&self.inner.faults).keys.insert(key, err);
    }

    pub fn clear_faults(&self) {
        *lock(&self.inner.faults) = Faults::default();
    }

    fn begin_call(&self, record: impl FnOnce(&mut CallLog)) -> Result<(), ServiceError> {
        record(&mut lock(&self.inner.calls));
        match lock(&self.inner.faults).next_call.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn key_fault(&self, key: &Key) -> Option<ServiceError> {
        lock(&self.inner.faults).keys.get(key).cloned()
    }

    fn check_readable(&self, key: &Key) -> Result<(), ServiceError> {
        if let Some(err) = self.key_fault(key) {
            return Err(err);
        }
        key.validate()?;
        if !key.is_complete() {
            return Err(ServiceError::InvalidKey(format!("incomplete key {key}")));
        }
        Ok(())
    }
}

impl Datastore for MemoryStore {
    type Transaction = MemoryTransaction;

    fn put_multi(&self, keys: &[Key], records: &[Record]) -> ItemResults<Key> {
        let _in_flight = InFlight::enter(&self.inner);
        self.begin_call(|calls| calls.put.push(keys.len()))?;
        if keys.len() != records.len() {
            return Err(ServiceError::Backend(format!(
                "{} keys for {} records",
                keys.len(),
                records.len()
            )));
        }
        // A malformed key rejects the whole batch.
        for key in keys {
            key.validate()?;
        }

        let mut state = lock(&self.inner.state);
        Ok(keys
            .iter()
            .zip(records)
            .map(|(key, record)| {
                if let Some(err) = self.key_fault(key) {
                    return Err(err);
                }
                let key = state.complete(key);
                state.write(&key, record);
                Ok(key)
            })
            .collect())
    }

    fn get_multi(&self, keys: &[Key]) -> ItemResults<Record> {
        let _in_flight = InFlight::enter(&self.inner);
        self.begin_call(|calls| calls.get.push(keys.len()))?;

        let state = lock(&self.inner.state);
        Ok(keys
            .iter()
            .map(|key| {
                self.check_readable(key)?;
                state.read(key)
            })
            .collect())
    }

    fn delete_multi(&self, keys: &[Key]) -> ItemResults<()> {
        let _in_flight = InFlight::enter(&self.inner);
        self.begin_call(|calls| calls.delete.push(keys.len()))?;

        let mut state = lock(&self.inner.state);
        Ok(keys
            .iter()
            .map(|key| {
                self.check_readable(key)?;
                state.remove(key);
                Ok(())
            })
            .collect())
    }

    fn query_page(
        &self,
        query: &Query,
        after: Option<&Cursor>,
        page: usize,
    ) -> Result<Vec<QueryRow>, ServiceError> {
        let plan = query.scan_plan(after);
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let state = lock(&self.inner.state);
        let mut rows = Vec::new();
        for (path, value) in state.entries.range(plan.start.clone()..plan.end.clone()) {
            if rows.len() >= page {
                break;
            }
            let Some((key, cursor)) = plan.row_position(path) else {
                continue;
            };
            let record = match (query.is_keys_only(), plan.indexed) {
                (true, _) => None,
                (false, false) => Some(
                    Record::decode(value.as_slice())
                        .map_err(|err| ServiceError::Backend(err.to_string()))?,
                ),
                (false, true) => match state.read(&key) {
                    Ok(record) => Some(record),
                    Err(ServiceError::NoSuchEntity) => continue,
                    Err(err) => return Err(err),
                },
            };
            rows.push(QueryRow {
                key,
                record,
                cursor,
            });
        }
        Ok(rows)
    }

    fn begin(&self) -> Result<MemoryTransaction, ServiceError> {
        Ok(MemoryTransaction {
            store: self.clone(),
            seen: HashMap::new(),
            writes: BTreeMap::new(),
        })
    }
}

/// Optimistic transaction over a [`MemoryStore`].
///
/// Writes are buffered until commit, which fails with
/// [`ServiceError::ConcurrentTransaction`] if anything it read or wrote changed
/// in the meantime.
pub struct MemoryTransaction {
    store: MemoryStore,
    seen: HashMap<Vec<u8>, u64>,
    writes: BTreeMap<Vec<u8>, (Key, Option<Record>)>,
}

impl MemoryTransaction {
    fn observe(&mut self, state: &State, key: &Key) {
        let path = data_path(key).into_bytes();
        let version = state.version(&path);
        self.seen.entry(path).or_insert(version);
    }
}

impl StoreTransaction for MemoryTransaction {
    fn get_multi(&mut self, keys: &[Key]) -> ItemResults<Record> {
        let store = self.store.clone();
        let state = lock(&store.inner.state);
        Ok(keys
            .iter()
            .map(|key| {
                store.check_readable(key)?;
                self.observe(&state, key);
                match self.writes.get(data_path(key).as_bytes()) {
                    Some((_, Some(record))) => Ok(record.clone()),
                    Some((_, None)) => Err(ServiceError::NoSuchEntity),
                    None => state.read(key),
                }
            })
            .collect())
    }

    fn put_multi(&mut self, keys: &[Key], records: &[Record]) -> ItemResults<Key> {
        if keys.len() != records.len() {
            return Err(ServiceError::Backend(format!(
                "{} keys for {} records",
                keys.len(),
                records.len()
            )));
        }
        for key in keys {
            key.validate()?;
        }
        let store = self.store.clone();
        let mut state = lock(&store.inner.state);
        Ok(keys
            .iter()
            .zip(records)
            .map(|(key, record)| {
                let key = state.complete(key);
                self.observe(&state, &key);
                self.writes
                    .insert(data_path(&key).into_bytes(), (key.clone(), Some(record.clone())));
                Ok(key)
            })
            .collect())
    }

    fn delete_multi(&mut self, keys: &[Key]) -> ItemResults<()> {
        let store = self.store.clone();
        let state = lock(&store.inner.state);
        Ok(keys
            .iter()
            .map(|key| {
                store.check_readable(key)?;
                self.observe(&state, key);
                self.writes
                    .insert(data_path(key).into_bytes(), (key.clone(), None));
                Ok(())
            })
            .collect())
    }

    fn commit(self) -> Result<(), ServiceError> {
        let mut state = lock(&self.store.inner.state);
        if self
            .seen
            .iter()
            .any(|(path, version)| state.version(path) != *version)
        {
            return Err(ServiceError::ConcurrentTransaction);
        }
        for (key, record) in self.writes.values() {
            match record {
                Some(record) => state.write(key, record),
                None => state.remove(key),
            }
        }
        Ok(())
    }

    fn rollback(self) -> Result<(), ServiceError> {
        Ok(())
    }
}
