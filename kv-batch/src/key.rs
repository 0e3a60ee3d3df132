use std::fmt;

use crate::ServiceError;

/// Address of an entity: kind, identifier and an optional parent.
///
/// A key carries either a string `name` or a non-zero numeric `id`; a key with
/// neither is incomplete and asks the store to generate an id on put.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Key {
    #[prost(string, tag = "1")]
    pub kind: ::prost::alloc::string::String,

    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,

    #[prost(int64, tag = "3")]
    pub id: i64,

    #[prost(message, optional, boxed, tag = "4")]
    pub parent: Option<Box<Key>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Name(String),
    Id(i64),
}

impl Key {
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn numeric(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
            ..Default::default()
        }
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: Option<Key>) -> Self {
        self.parent = parent.map(Box::new);
        self
    }

    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() || self.id != 0
    }

    pub fn identifier(&self) -> Option<Identifier> {
        if !self.name.is_empty() {
            Some(Identifier::Name(self.name.clone()))
        } else if self.id != 0 {
            Some(Identifier::Id(self.id))
        } else {
            None
        }
    }

    pub fn parent_key(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Checks the key is well formed; incomplete keys are allowed, incomplete parents are not.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.kind.is_empty() {
            return Err(ServiceError::InvalidKey("empty kind".to_string()));
        }
        if !self.name.is_empty() && self.id != 0 {
            return Err(ServiceError::InvalidKey(format!(
                "key {self} has both a name and an id"
            )));
        }
        if let Some(parent) = self.parent_key() {
            if !parent.is_complete() {
                return Err(ServiceError::InvalidKey(format!(
                    "key {self} has an incomplete parent"
                )));
            }
            parent.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent_key() {
            write!(f, "{parent}")?;
        }
        match self.identifier() {
            Some(Identifier::Name(name)) => write!(f, "/{},{:?}", self.kind, name),
            Some(Identifier::Id(id)) => write!(f, "/{},{}", self.kind, id),
            None => write!(f, "/{},incomplete", self.kind),
        }
    }
}
