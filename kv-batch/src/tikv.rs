use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};
use prost::Message;
use tikv_client::{Snapshot, Transaction, TransactionClient};
use tokio::runtime::Runtime;

use crate::{
    Cursor, Datastore, Error, ItemResults, Key, Query, QueryRow, Record, ServiceError,
    StoreTransaction,
    utils::{data_path, index_path, sequence_path},
};

const ALLOCATE_ATTEMPTS: usize = 10;

impl From<tikv_client::Error> for ServiceError {
    fn from(err: tikv_client::Error) -> Self {
        ServiceError::Backend(err.to_string())
    }
}

fn decode_record(data: &[u8]) -> Result<Record, ServiceError> {
    Record::decode(data).map_err(|err| ServiceError::Backend(err.to_string()))
}

/// [`Datastore`] backed by a TiKV cluster.
///
/// Calls block on an internal runtime, so they must not be made from inside
/// another tokio runtime.
pub struct TikvStore {
    client: TransactionClient,
    runtime: Arc<Runtime>,
}

impl TikvStore {
    pub fn connect(pd_endpoints: Vec<String>) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::Connect(err.to_string()))?;
        let client = runtime
            .block_on(TransactionClient::new(pd_endpoints))
            .map_err(|err| Error::Connect(err.to_string()))?;
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }

    async fn snapshot(&self) -> Result<Snapshot, ServiceError> {
        Ok(self.client.snapshot(
            self.client.current_timestamp().await?,
            tikv_client::TransactionOptions::new_optimistic(),
        ))
    }

    /// Reserves `count` consecutive ids for `kind`, returning the first.
    async fn allocate_ids(&self, kind: &str, count: i64) -> Result<i64, ServiceError> {
        let mut last_err = None;
        for _ in 0..ALLOCATE_ATTEMPTS {
            let mut txn = self.client.begin_optimistic().await?;
            let result = bump_sequence(&mut txn, kind, count).await;
            match finish(txn, result).await {
                Ok(first) => return Ok(first),
                Err(err) => {
                    debug!("sequence {} contended: {}", kind, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(ServiceError::ConcurrentTransaction))
    }

    async fn complete_keys(&self, keys: &[Key]) -> Result<Vec<Key>, ServiceError> {
        let mut wanted: HashMap<&str, i64> = HashMap::new();
        for key in keys.iter().filter(|k| !k.is_complete()) {
            *wanted.entry(key.kind.as_str()).or_default() += 1;
        }
        let mut next: HashMap<&str, i64> = HashMap::new();
        for (kind, count) in wanted {
            next.insert(kind, self.allocate_ids(kind, count).await?);
        }
        Ok(keys
            .iter()
            .map(|key| {
                let mut key = key.clone();
                if let Some(id) = next.get_mut(key.kind.as_str()).filter(|_| !key.is_complete()) {
                    key.id = *id;
                    *id += 1;
                }
                key
            })
            .collect())
    }
}

async fn bump_sequence(txn: &mut Transaction, kind: &str, count: i64) -> Result<i64, ServiceError> {
    let path = sequence_path(kind);
    let current = match txn.get(path.clone()).await? {
        Some(data) => {
            let bytes: [u8; 8] = data
                .as_slice()
                .try_into()
                .map_err(|_| ServiceError::Backend(format!("corrupt sequence for {kind}")))?;
            i64::from_be_bytes(bytes)
        }
        None => 0,
    };
    txn.put(path, (current + count).to_be_bytes().to_vec()).await?;
    Ok(current + 1)
}

/// Commits on success and rolls back otherwise, so no transaction is dropped while active.
async fn finish<T>(
    mut txn: Transaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                warn!("rollback failed: {}", rollback);
            }
            Err(err)
        }
    }
}

async fn remove_indexes(txn: &mut Transaction, key: &Key) -> Result<(), ServiceError> {
    if let Some(data) = txn.get(data_path(key)).await? {
        for entry in decode_record(&data)?.indexes {
            txn.delete(index_path(&key.kind, &entry.field, &entry.value, key))
                .await?;
        }
    }
    Ok(())
}

async fn write_record(txn: &mut Transaction, key: &Key, record: &Record) -> Result<(), ServiceError> {
    remove_indexes(txn, key).await?;
    for entry in &record.indexes {
        txn.put(index_path(&key.kind, &entry.field, &entry.value, key), Vec::new())
            .await?;
    }
    txn.put(data_path(key), record.encode_to_vec()).await?;
    Ok(())
}

async fn remove_record(txn: &mut Transaction, key: &Key) -> Result<(), ServiceError> {
    remove_indexes(txn, key).await?;
    txn.delete(data_path(key)).await?;
    Ok(())
}

fn check_readable(key: &Key) -> Result<(), ServiceError> {
    key.validate()?;
    if !key.is_complete() {
        return Err(ServiceError::InvalidKey(format!("incomplete key {key}")));
    }
    Ok(())
}

impl Datastore for TikvStore {
    type Transaction = TikvTransaction;

    fn put_multi(&self, keys: &[Key], records: &[Record]) -> ItemResults<Key> {
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
        self.runtime.block_on(async {
            let keys = self.complete_keys(keys).await?;
            let mut txn = self.client.begin_optimistic().await?;
            let mut result = Ok(());
            for (key, record) in keys.iter().zip(records) {
                result = write_record(&mut txn, key, record).await;
                if result.is_err() {
                    break;
                }
            }
            finish(txn, result).await?;
            Ok::<_, ServiceError>(keys.into_iter().map(Ok).collect::<Vec<_>>())
        })
    }

    fn get_multi(&self, keys: &[Key]) -> ItemResults<Record> {
        self.runtime.block_on(async {
            let paths: Vec<String> = keys
                .iter()
                .filter(|key| check_readable(key).is_ok())
                .map(data_path)
                .collect();
            let mut snapshot = self.snapshot().await?;
            let found: HashMap<Vec<u8>, Vec<u8>> = snapshot
                .batch_get(paths)
                .await?
                .map(|kv| (Into::<Vec<u8>>::into(kv.key().clone()), kv.value().clone()))
                .collect();
            Ok::<_, ServiceError>(
                keys.iter()
                    .map(|key| {
                        check_readable(key)?;
                        let data = found
                            .get(data_path(key).as_bytes())
                            .ok_or(ServiceError::NoSuchEntity)?;
                        decode_record(data)
                    })
                    .collect::<Vec<_>>(),
            )
        })
    }

    fn delete_multi(&self, keys: &[Key]) -> ItemResults<()> {
        self.runtime.block_on(async {
            let mut txn = self.client.begin_optimistic().await?;
            let mut outcomes = Vec::with_capacity(keys.len());
            let mut result = Ok(());
            for key in keys {
                if let Err(err) = check_readable(key) {
                    outcomes.push(Err(err));
                    continue;
                }
                result = remove_record(&mut txn, key).await;
                if result.is_err() {
                    break;
                }
                outcomes.push(Ok(()));
            }
            finish(txn, result).await?;
            Ok::<_, ServiceError>(outcomes)
        })
    }

    fn query_page(
        &self,
        query: &Query,
        after: Option<&Cursor>,
        page: usize,
    ) -> Result<Vec<QueryRow>, ServiceError> {
        let plan = query.scan_plan(after);
        if plan.is_empty() || page == 0 {
            return Ok(Vec::new());
        }
        self.runtime.block_on(async {
            let mut snapshot = self.snapshot().await?;
            let kvs = snapshot
                .scan(
                    tikv_client::Key::from(plan.start.clone())..tikv_client::Key::from(plan.end.clone()),
                    page as u32,
                )
                .await?
                .collect::<Vec<_>>();

            let mut rows = Vec::with_capacity(kvs.len());
            for kv in kvs {
                let path: Vec<u8> = kv.key().clone().into();
                let Some((key, cursor)) = plan.row_position(&path) else {
                    continue;
                };
                let record = if query.is_keys_only() || plan.indexed {
                    None
                } else {
                    Some(decode_record(kv.value())?)
                };
                rows.push(QueryRow {
                    key,
                    record,
                    cursor,
                });
            }

            if plan.indexed && !query.is_keys_only() {
                let paths: Vec<String> = rows.iter().map(|row| data_path(&row.key)).collect();
                let found: HashMap<Vec<u8>, Vec<u8>> = snapshot
                    .batch_get(paths)
                    .await?
                    .map(|kv| (Into::<Vec<u8>>::into(kv.key().clone()), kv.value().clone()))
                    .collect();
                let mut loaded = Vec::with_capacity(rows.len());
                for mut row in rows {
                    // Index entries can outlive a concurrent delete; skip them.
                    let Some(data) = found.get(data_path(&row.key).as_bytes()) else {
                        continue;
                    };
                    row.record = Some(decode_record(data)?);
                    loaded.push(row);
                }
                rows = loaded;
            }
            Ok::<_, ServiceError>(rows)
        })
    }

    fn begin(&self) -> Result<TikvTransaction, ServiceError> {
        let txn = self.runtime.block_on(self.client.begin_optimistic())?;
        Ok(TikvTransaction {
            txn,
            runtime: self.runtime.clone(),
            sequences: SequenceSource {
                client: self.client.clone(),
            },
        })
    }
}

struct SequenceSource {
    client: TransactionClient,
}

pub struct TikvTransaction {
    txn: Transaction,
    runtime: Arc<Runtime>,
    sequences: SequenceSource,
}

impl SequenceSource {
    async fn next_id(&self, kind: &str) -> Result<i64, ServiceError> {
        let mut txn = self.client.begin_optimistic().await?;
        let result = bump_sequence(&mut txn, kind, 1).await;
        finish(txn, result).await
    }
}

impl StoreTransaction for TikvTransaction {
    fn get_multi(&mut self, keys: &[Key]) -> ItemResults<Record> {
        let txn = &mut self.txn;
        self.runtime.block_on(async {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                if let Err(err) = check_readable(key) {
                    results.push(Err(err));
                    continue;
                }
                let result = match txn.get(data_path(key)).await? {
                    Some(data) => decode_record(&data),
                    None => Err(ServiceError::NoSuchEntity),
                };
                results.push(result);
            }
            Ok::<_, ServiceError>(results)
        })
    }

    fn put_multi(&mut self, keys: &[Key], records: &[Record]) -> ItemResults<Key> {
        for key in keys {
            key.validate()?;
        }
        let txn = &mut self.txn;
        let sequences = &self.sequences;
        self.runtime.block_on(async {
            let mut completed = Vec::with_capacity(keys.len());
            for (key, record) in keys.iter().zip(records) {
                let mut key = key.clone();
                if !key.is_complete() {
                    key.id = sequences.next_id(&key.kind).await?;
                }
                write_record(txn, &key, record).await?;
                completed.push(Ok(key));
            }
            Ok::<_, ServiceError>(completed)
        })
    }

    fn delete_multi(&mut self, keys: &[Key]) -> ItemResults<()> {
        let txn = &mut self.txn;
        self.runtime.block_on(async {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                if let Err(err) = check_readable(key) {
                    results.push(Err(err));
                    continue;
                }
                remove_record(txn, key).await?;
                results.push(Ok(()));
            }
            Ok::<_, ServiceError>(results)
        })
    }

    fn commit(self) -> Result<(), ServiceError> {
        let Self { mut txn, runtime, .. } = self;
        runtime.block_on(txn.commit())?;
        Ok(())
    }

    fn rollback(self) -> Result<(), ServiceError> {
        let Self { mut txn, runtime, .. } = self;
        runtime.block_on(txn.rollback())?;
        Ok(())
    }
}
