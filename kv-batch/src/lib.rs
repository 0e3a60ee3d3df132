extern crate self as kv_batch;

mod chunk;
mod client;
mod config;
mod dispatch;
mod error;
mod key;
mod memory;
mod outcome;
mod query;
mod record;
mod resolver;
mod store;
#[cfg(feature = "tikv")]
mod tikv;
mod transaction;
mod utils;

pub use chunk::plan;
pub use client::Client;
pub use config::{
    BatchLimits, ClientConfig, KindNameResolver, default_kind_name, default_kind_resolver,
    set_default_kind_resolver,
};
pub use error::{BatchError, Error, MultiError, ServiceError, is_not_found};
pub use key::{Identifier, Key};
pub use memory::{CallLog, MemoryStore, MemoryTransaction};
pub use outcome::collapse;
pub use query::{BoundCondition, Cursor, Iter, Query};
pub use record::{IndexEntry, Record};
pub use store::{Datastore, ItemResults, QueryRow, StoreTransaction};
#[cfg(feature = "tikv")]
pub use tikv::TikvStore;
pub use transaction::Transaction;

pub use inventory;
pub use kv_batch_derive::Entity;

/// Static type information of an entity, registered by `#[derive(Entity)]`.
#[derive(Debug)]
pub struct EntityMeta {
    pub type_name: &'static str,
    pub type_path: &'static str,
    /// Explicit kind from `#[entity(kind = "...")]`.
    pub kind: Option<&'static str>,
    pub indexed_field_names: fn() -> Vec<&'static str>,
}

inventory::collect!(EntityMeta);

/// All entity types registered through `#[derive(Entity)]`.
pub fn registered_entities() -> impl Iterator<Item = &'static EntityMeta> {
    inventory::iter::<EntityMeta>.into_iter()
}

/// Identity an entity reports for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No identity yet; the store assigns one on put.
    Absent,
    /// A string identity field. Empty means it was explicitly left blank.
    Name(String),
    Id(i64),
}

/// Capabilities of a storable entity.
pub trait Entity: prost::Message + Default + Send + Sync {
    fn meta() -> &'static EntityMeta;

    fn identity(&self) -> Identity;

    /// Writes the identifier of `key` into the identity field.
    fn set_identity(&mut self, key: &Key) -> Result<(), Error>;

    fn parent(&self) -> Option<Key>;

    fn set_parent(&mut self, parent: Option<Key>);

    /// Indexed fields and their sortable encodings.
    fn indexed_fields(&self) -> Vec<(String, String)>;
}
