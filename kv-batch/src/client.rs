use std::sync::Arc;

use log::{debug, warn};

use crate::{
    BatchError, ClientConfig, Datastore, Entity, Error, Iter, Key, Query, QueryRow, Record,
    ServiceError, StoreTransaction, Transaction,
    dispatch::dispatch,
    outcome::{assign_keys, collapse, finish_put, first_item, item_errors, load_all},
    record::decode_payload,
    registered_entities,
    resolver::{Intent, apply, kind_of, resolve, resolve_all},
};

/// Batched entity access on top of a [`Datastore`].
///
/// Batches larger than the store's per-call limits are split into chunks that
/// run in parallel; per-element failures come back as [`Error::Multi`].
pub struct Client<S> {
    store: Arc<S>,
    config: ClientConfig,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<S: Datastore> Client<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, ClientConfig::default())
    }

    pub fn with_config(store: S, config: ClientConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A client on the same store with field-mismatch tolerance set to `ignore`.
    pub fn with_ignore_field_mismatch(&self, ignore: bool) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.with_ignore_field_mismatch(ignore),
        }
    }

    /// The kind `E` is stored under, or an empty string if none resolves.
    pub fn kind<E: Entity>(&self) -> String {
        kind_of::<E>(&self.config).unwrap_or_default()
    }

    /// Kinds of every registered entity type, as this client resolves them.
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = registered_entities()
            .map(|meta| (self.config.kind_resolver)(meta))
            .filter(|kind| !kind.is_empty())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// The key of `entity`, or `None` if it cannot be derived or is incomplete.
    pub fn key<E: Entity>(&self, entity: &E) -> Option<Key> {
        self.key_error(entity).ok().filter(Key::is_complete)
    }

    pub fn key_error<E: Entity>(&self, entity: &E) -> Result<Key, Error> {
        resolve(&self.config, entity).map(|(key, _)| key)
    }

    pub fn query<E: Entity>(&self) -> Result<Query, Error> {
        Ok(Query::new(kind_of::<E>(&self.config)?))
    }

    /// Saves `entity`. If its key is incomplete the generated key is written back into it.
    pub fn put<E: Entity>(&self, entity: &mut E) -> Result<Key, Error> {
        let keys = self
            .put_all(std::slice::from_mut(entity))
            .map_err(|err| first_item(err.source))?;
        keys.into_iter()
            .next()
            .ok_or_else(|| Error::InvalidShape("put returned no key".to_string()))
    }

    /// Batch version of [`Client::put`].
    ///
    /// Generated keys are written back into every entity the store assigned one to,
    /// even when other elements failed; on failure they are also in [`BatchError::keys`].
    pub fn put_all<E: Entity>(&self, entities: &mut [E]) -> Result<Vec<Key>, BatchError> {
        let mut keys = resolve_all(&self.config, entities, Intent::Put)?;
        if keys.is_empty() {
            return Ok(keys);
        }
        let records: Vec<Record> = entities.iter().map(Record::from_entity).collect();
        let store = &*self.store;

        let outcomes = dispatch("put", &mut keys, self.config.limits.put, |range, keys| {
            let results = store.put_multi(keys, &records[range])?;
            Ok(assign_keys(results, keys))
        });
        finish_put(entities, keys, outcomes)
    }

    /// Loads the entity addressed by `dst`'s key into `dst`.
    pub fn get<E: Entity>(&self, dst: &mut E) -> Result<(), Error> {
        self.get_all(std::slice::from_mut(dst)).map_err(first_item)
    }

    /// Batch version of [`Client::get`]. Missing entities are reported per element;
    /// check them with [`crate::is_not_found`].
    pub fn get_all<E: Entity>(&self, dst: &mut [E]) -> Result<(), Error> {
        let keys = resolve_all(&self.config, dst, Intent::Read)?;
        if keys.is_empty() {
            return Ok(());
        }
        let store = &*self.store;
        let ignore = self.config.ignore_field_mismatch;

        let outcomes = dispatch("get", dst, self.config.limits.get, |range, dst| {
            let keys = &keys[range];
            let results = store.get_multi(keys)?;
            Ok(load_all(results, keys, dst, ignore))
        });
        collapse(outcomes)
    }

    pub fn delete(&self, key: &Key) -> Result<(), Error> {
        self.delete_all(std::slice::from_ref(key))
            .map_err(first_item)
    }

    pub fn delete_all(&self, keys: &[Key]) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut keys = keys.to_vec();
        let store = &*self.store;

        let outcomes = dispatch("delete", &mut keys, self.config.limits.delete, |_, keys| {
            Ok(item_errors(store.delete_multi(keys)?))
        });
        collapse(outcomes)
    }

    /// Runs `f` in a store transaction, committing if it returns `Ok` and rolling
    /// back otherwise. Operations inside the transaction are not split into chunks.
    pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Transaction<'_, S>) -> Result<T, Error>,
    {
        let mut tx = Transaction::new(self, self.store.begin()?);
        match f(&mut tx) {
            Ok(value) => {
                tx.into_inner().commit()?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                debug!("transaction rolled back: {}", err);
                if let Err(rollback) = tx.into_inner().rollback() {
                    warn!("rollback failed: {}", rollback);
                }
                Err(err)
            }
        }
    }

    /// Number of results `query` would return.
    pub fn count(&self, query: &Query) -> Result<usize, Error> {
        Ok(self.store.count(query)?)
    }

    /// Runs `query`, returning the keys of all results.
    ///
    /// With a destination, one entity per result is appended to it and loaded with
    /// the result's fields (zero values for keys-only queries) and key. Without one
    /// only keys are fetched. On failure the keys collected so far are in
    /// [`BatchError::keys`].
    pub fn get_all_by_query<E: Entity>(
        &self,
        query: &Query,
        dst: Option<&mut Vec<E>>,
    ) -> Result<Vec<Key>, BatchError> {
        let query = match dst {
            Some(_) => {
                self.check_destination::<E>(query)?;
                query.clone()
            }
            None => query.clone().keys_only(),
        };
        let mut keys = Vec::new();
        match self.collect_rows(&query, dst, &mut keys) {
            Ok(()) => Ok(keys),
            Err(source) => Err(BatchError { keys, source }),
        }
    }

    fn collect_rows<E: Entity>(
        &self,
        query: &Query,
        mut dst: Option<&mut Vec<E>>,
        keys: &mut Vec<Key>,
    ) -> Result<(), Error> {
        let mut iter = self.run(query);
        let mut mismatch = None;

        while let Some(row) = iter.next_row()? {
            if let Some(dst) = dst.as_deref_mut() {
                let outcome = self.load_row(&row, dst)?;
                if mismatch.is_none() {
                    mismatch = outcome;
                }
            }
            keys.push(row.key);
        }

        match mismatch {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Appends the entity of `row` to `dst`, returning an unfiltered field mismatch.
    fn load_row<E: Entity>(
        &self,
        row: &QueryRow,
        dst: &mut Vec<E>,
    ) -> Result<Option<ServiceError>, Error> {
        let mut entity = E::default();
        let mut mismatch = None;
        if let Some(record) = &row.record {
            match decode_payload(&row.key.kind, &record.payload, &mut entity) {
                Err(err) if err.is_field_mismatch() => {
                    if !self.config.ignore_field_mismatch {
                        mismatch = Some(err);
                    }
                }
                Err(err) => return Err(err.into()),
                Ok(()) => {}
            }
        }
        apply(&mut entity, &row.key).map_err(|err| Error::InvalidDestination(err.to_string()))?;
        dst.push(entity);
        Ok(mismatch)
    }

    pub fn run(&self, query: &Query) -> Iter<S> {
        Iter::new(self.clone(), query.clone())
    }

    pub(crate) fn check_destination<E: Entity>(&self, query: &Query) -> Result<(), Error> {
        let kind = kind_of::<E>(&self.config)?;
        if kind != query.kind() {
            return Err(Error::InvalidDestination(format!(
                "query of kind {} cannot load into {} (kind {})",
                query.kind(),
                E::meta().type_path,
                kind
            )));
        }
        Ok(())
    }
}
