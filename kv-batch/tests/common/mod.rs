#![allow(dead_code)]

use kv_batch::{Client, ClientConfig, Entity, Key, MemoryStore};

#[derive(Entity, Clone, PartialEq, ::prost::Message)]
#[entity(kind = "User")]
pub struct User {
    #[entity(id)]
    #[prost(string, tag = "1")]
    pub name: String,
    #[index]
    #[prost(uint32, tag = "2")]
    pub age: u32,
    #[index]
    #[prost(string, tag = "3")]
    pub city: String,
}

impl User {
    pub fn new(name: &str, age: u32, city: &str) -> Self {
        Self {
            name: name.to_string(),
            age,
            city: city.to_string(),
        }
    }
}

#[derive(Entity, Clone, PartialEq, ::prost::Message)]
pub struct Post {
    #[entity(id)]
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[entity(parent)]
    #[prost(message, optional, tag = "2")]
    pub author: Option<Key>,
    #[prost(string, tag = "3")]
    pub title: String,
}

/// Has no identity field; its keys only exist in what `put_all` returns.
#[derive(Entity, Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub body: String,
}

#[derive(Entity, Clone, PartialEq, ::prost::Message)]
#[entity(kind = "Profile")]
pub struct ProfileV1 {
    #[entity(id)]
    #[prost(string, tag = "1")]
    pub handle: String,
    #[prost(string, tag = "2")]
    pub bio: String,
}

/// `ProfileV1` after the `bio` field was dropped.
#[derive(Entity, Clone, PartialEq, ::prost::Message)]
#[entity(kind = "Profile")]
pub struct ProfileV2 {
    #[entity(id)]
    #[prost(string, tag = "1")]
    pub handle: String,
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn client() -> (Client<MemoryStore>, MemoryStore) {
    client_with(ClientConfig::default())
}

pub fn client_with(config: ClientConfig) -> (Client<MemoryStore>, MemoryStore) {
    init_logger();
    let store = MemoryStore::new();
    (Client::with_config(store.clone(), config), store)
}

pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
