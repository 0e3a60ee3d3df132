use std::sync::{LazyLock, RwLock};

use crate::EntityMeta;

/// Maps an entity type to the kind it is stored under.
pub type KindNameResolver = fn(&EntityMeta) -> String;

/// Uses the explicit `kind` attribute, falling back to the type name.
pub fn default_kind_name(meta: &EntityMeta) -> String {
    meta.kind.unwrap_or(meta.type_name).to_string()
}

static DEFAULT_KIND_RESOLVER: LazyLock<RwLock<KindNameResolver>> =
    LazyLock::new(|| RwLock::new(default_kind_name));

/// Replaces the resolver new clients start with. Existing clients keep theirs.
pub fn set_default_kind_resolver(resolver: KindNameResolver) {
    match DEFAULT_KIND_RESOLVER.write() {
        Ok(mut guard) => *guard = resolver,
        Err(poisoned) => *poisoned.into_inner() = resolver,
    }
}

pub fn default_kind_resolver() -> KindNameResolver {
    match DEFAULT_KIND_RESOLVER.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Per-call item capacity of the store for each batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub put: usize,
    pub get: usize,
    pub delete: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            put: 500,
            get: 1000,
            delete: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub limits: BatchLimits,
    /// Treat field mismatches on read as success, so fields can be removed from entity types.
    pub ignore_field_mismatch: bool,
    pub kind_resolver: KindNameResolver,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            limits: BatchLimits::default(),
            ignore_field_mismatch: true,
            kind_resolver: default_kind_resolver(),
        }
    }
}

impl ClientConfig {
    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_ignore_field_mismatch(mut self, ignore: bool) -> Self {
        self.ignore_field_mismatch = ignore;
        self
    }

    pub fn with_kind_resolver(mut self, resolver: KindNameResolver) -> Self {
        self.kind_resolver = resolver;
        self
    }
}
