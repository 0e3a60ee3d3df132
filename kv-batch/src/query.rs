use std::{collections::VecDeque, fmt, str::FromStr};

use crate::{
    Client, Datastore, Entity, Error, Key, QueryRow,
    outcome::filter_mismatch,
    record::decode_payload,
    resolver::apply,
    utils::{
        VALUE_END, decode_key_path, index_field_prefix, index_value_prefix, kind_data_prefix,
        next_key,
    },
};

/// Bound on the sortable encoding of an indexed field. Both ends are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundCondition {
    Value(String),
    Range(String, String),
}

/// Resumable position inside a query's result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub(crate) fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn position(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Cursor::default());
        }
        // Index cursors carry the encoded value in front of the key path.
        let key_path = s.split_once(VALUE_END).map_or(s, |(_, rest)| rest);
        decode_key_path(key_path)
            .map(|_| Cursor(s.to_string()))
            .ok_or_else(|| Error::InvalidShape(format!("malformed cursor {s:?}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    kind: String,
    filter: Option<(String, BoundCondition)>,
    limit: Option<usize>,
    start: Option<Cursor>,
    keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filter: None,
            limit: None,
            start: None,
            keys_only: false,
        }
    }

    /// Restricts results to entities whose indexed `field_name` satisfies `condition`.
    pub fn filter(mut self, field_name: impl Into<String>, condition: BoundCondition) -> Self {
        self.filter = Some((field_name.into(), condition));
        self
    }

    pub fn eq(self, field_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter(field_name, BoundCondition::Value(value.into()))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn filter_condition(&self) -> Option<(&str, &BoundCondition)> {
        self.filter
            .as_ref()
            .map(|(field, condition)| (field.as_str(), condition))
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn start_cursor(&self) -> Option<&Cursor> {
        self.start.as_ref()
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Key range a store scans to answer this query.
    pub(crate) fn scan_plan(&self, after: Option<&Cursor>) -> ScanPlan {
        let (root, start, end, indexed) = match &self.filter {
            None => {
                let root = kind_data_prefix(&self.kind);
                let end = next_key(root.as_bytes());
                (root.clone(), root.into_bytes(), end, false)
            }
            Some((field, condition)) => {
                let root = index_field_prefix(&self.kind, field);
                let (lo, hi) = match condition {
                    BoundCondition::Value(value) => (value, value),
                    BoundCondition::Range(lo, hi) => (lo, hi),
                };
                let start = index_value_prefix(&self.kind, field, lo).into_bytes();
                let end = next_key(index_value_prefix(&self.kind, field, hi).as_bytes());
                (root, start, end, true)
            }
        };

        let mut start = start;
        if let Some(after) = after.filter(|c| !c.is_start()) {
            let mut resume = format!("{}{}", root, after.position()).into_bytes();
            resume.push(0);
            if resume > start {
                start = resume;
            }
        }

        ScanPlan {
            root,
            start,
            end,
            indexed,
        }
    }
}

/// Half-open byte range of storage paths holding a query's rows.
#[derive(Debug, Clone)]
pub(crate) struct ScanPlan {
    root: String,
    pub(crate) start: Vec<u8>,
    pub(crate) end: Vec<u8>,
    /// Rows are index entries rather than data entries.
    pub(crate) indexed: bool,
}

impl ScanPlan {
    /// Key and cursor of the row stored at `path`.
    pub(crate) fn row_position(&self, path: &[u8]) -> Option<(Key, Cursor)> {
        let path = std::str::from_utf8(path).ok()?;
        let position = path.strip_prefix(self.root.as_str())?;
        let key_path = if self.indexed {
            position.split_once(VALUE_END)?.1
        } else {
            position
        };
        Some((decode_key_path(key_path)?, Cursor::new(position)))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

const PAGE_SIZE: usize = 128;

/// Cursor-style iterator over a query's results, fetching rows a page at a time.
pub struct Iter<S: Datastore> {
    client: Client<S>,
    query: Query,
    buffer: VecDeque<QueryRow>,
    fetched: Option<Cursor>,
    position: Cursor,
    returned: usize,
    exhausted: bool,
}

impl<S: Datastore> Iter<S> {
    pub(crate) fn new(client: Client<S>, query: Query) -> Self {
        let position = query.start_cursor().cloned().unwrap_or_default();
        Self {
            client,
            fetched: query.start_cursor().cloned(),
            query,
            buffer: VecDeque::new(),
            position,
            returned: 0,
            exhausted: false,
        }
    }

    pub(crate) fn next_row(&mut self) -> Result<Option<QueryRow>, Error> {
        if self.query.limit_value().is_some_and(|limit| self.returned >= limit) {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            let rows = self
                .client
                .store()
                .query_page(&self.query, self.fetched.as_ref(), PAGE_SIZE)?;
            self.exhausted = rows.len() < PAGE_SIZE;
            if let Some(last) = rows.last() {
                self.fetched = Some(last.cursor.clone());
            }
            self.buffer.extend(rows);
        }
        let Some(row) = self.buffer.pop_front() else {
            return Ok(None);
        };
        self.returned += 1;
        self.position = row.cursor.clone();
        Ok(Some(row))
    }

    /// Advances to the next result, loading it into `dst` when given.
    ///
    /// Returns `Error::Done` once the results are exhausted.
    pub fn next<E: Entity>(&mut self, dst: Option<&mut E>) -> Result<Key, Error> {
        if dst.is_some() {
            self.client.check_destination::<E>(&self.query)?;
        }
        let row = self.next_row()?.ok_or(Error::Done)?;
        if let Some(dst) = dst {
            if let Some(record) = &row.record {
                let outcome = decode_payload(&row.key.kind, &record.payload, dst).err();
                if let Some(err) =
                    filter_mismatch(outcome, self.client.config().ignore_field_mismatch)
                {
                    return Err(Error::Service(err));
                }
            }
            apply(dst, &row.key)?;
        }
        Ok(row.key)
    }

    /// Position after the last returned result; pass it to `Query::start` to resume.
    pub fn cursor(&self) -> Cursor {
        self.position.clone()
    }
}
