use crate::{Cursor, Key, Query, Record, ServiceError};

/// Result of a batch call: `Err` for a failure of the whole call, otherwise one
/// result per input element in input order.
pub type ItemResults<T> = Result<Vec<Result<T, ServiceError>>, ServiceError>;

/// One query result. `record` is `None` for keys-only queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub key: Key,
    pub record: Option<Record>,
    /// Position just after this row.
    pub cursor: Cursor,
}

/// Blocking entity store with atomic multi-element calls.
///
/// Each call handles at most as many elements as the store accepts in one request;
/// splitting larger batches is up to the caller.
pub trait Datastore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Writes records, returning completed keys (generated ids for incomplete ones).
    fn put_multi(&self, keys: &[Key], records: &[Record]) -> ItemResults<Key>;

    fn get_multi(&self, keys: &[Key]) -> ItemResults<Record>;

    fn delete_multi(&self, keys: &[Key]) -> ItemResults<()>;

    /// Up to `page` rows of `query` in key order, strictly after `after` when given.
    fn query_page(
        &self,
        query: &Query,
        after: Option<&Cursor>,
        page: usize,
    ) -> Result<Vec<QueryRow>, ServiceError>;

    fn count(&self, query: &Query) -> Result<usize, ServiceError> {
        const PAGE_SIZE: usize = 512;

        let query = query.clone().keys_only();
        let mut after = query.start_cursor().cloned();
        let mut total = 0;
        loop {
            let rows = self.query_page(&query, after.as_ref(), PAGE_SIZE)?;
            let len = rows.len();
            total += len;
            if let Some(limit) = query.limit_value() {
                if total >= limit {
                    return Ok(limit);
                }
            }
            match rows.last() {
                Some(row) if len == PAGE_SIZE => after = Some(row.cursor.clone()),
                _ => return Ok(total),
            }
        }
    }

    fn begin(&self) -> Result<Self::Transaction, ServiceError>;
}

/// A store transaction. Dropping it without committing discards its writes.
pub trait StoreTransaction {
    fn get_multi(&mut self, keys: &[Key]) -> ItemResults<Record>;

    fn put_multi(&mut self, keys: &[Key], records: &[Record]) -> ItemResults<Key>;

    fn delete_multi(&mut self, keys: &[Key]) -> ItemResults<()>;

    fn commit(self) -> Result<(), ServiceError>;

    fn rollback(self) -> Result<(), ServiceError>;
}
