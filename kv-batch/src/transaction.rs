use crate::{
    BatchError, Client, Datastore, Entity, Error, Key, Record, StoreTransaction,
    dispatch::dispatch_single,
    outcome::{assign_keys, collapse, finish_put, first_item, item_errors, load_all},
    resolver::{Intent, resolve_all},
};

/// Operations inside [`Client::run_in_transaction`].
///
/// Each batch is sent to the store as a single call.
pub struct Transaction<'c, S: Datastore> {
    client: &'c Client<S>,
    txn: S::Transaction,
}

impl<'c, S: Datastore> Transaction<'c, S> {
    pub(crate) fn new(client: &'c Client<S>, txn: S::Transaction) -> Self {
        Self { client, txn }
    }

    pub(crate) fn into_inner(self) -> S::Transaction {
        self.txn
    }

    pub fn get<E: Entity>(&mut self, dst: &mut E) -> Result<(), Error> {
        self.get_all(std::slice::from_mut(dst)).map_err(first_item)
    }

    pub fn get_all<E: Entity>(&mut self, dst: &mut [E]) -> Result<(), Error> {
        let config = self.client.config();
        let keys = resolve_all(config, dst, Intent::Read)?;
        let ignore = config.ignore_field_mismatch;
        let txn = &mut self.txn;

        let outcomes = dispatch_single("tx get", dst, |dst| {
            let results = txn.get_multi(&keys)?;
            Ok(load_all(results, &keys, dst, ignore))
        });
        collapse(outcomes)
    }

    pub fn put<E: Entity>(&mut self, entity: &mut E) -> Result<Key, Error> {
        let keys = self
            .put_all(std::slice::from_mut(entity))
            .map_err(|err| first_item(err.source))?;
        keys.into_iter()
            .next()
            .ok_or_else(|| Error::InvalidShape("put returned no key".to_string()))
    }

    /// Generated keys come back in [`BatchError::keys`] when some elements failed.
    pub fn put_all<E: Entity>(&mut self, entities: &mut [E]) -> Result<Vec<Key>, BatchError> {
        let mut keys = resolve_all(self.client.config(), entities, Intent::Put)?;
        let records: Vec<Record> = entities.iter().map(Record::from_entity).collect();
        let txn = &mut self.txn;

        let outcomes = dispatch_single("tx put", &mut keys, |keys| {
            let results = txn.put_multi(keys, &records)?;
            Ok(assign_keys(results, keys))
        });
        finish_put(entities, keys, outcomes)
    }

    pub fn delete(&mut self, key: &Key) -> Result<(), Error> {
        self.delete_all(std::slice::from_ref(key))
            .map_err(first_item)
    }

    pub fn delete_all(&mut self, keys: &[Key]) -> Result<(), Error> {
        let mut keys = keys.to_vec();
        let txn = &mut self.txn;

        let outcomes = dispatch_single("tx delete", &mut keys, |keys| {
            Ok(item_errors(txn.delete_multi(keys)?))
        });
        collapse(outcomes)
    }
}
