//! Dependency-resolver and message-type resolver ports (spec §6).
//!
//! DI container integration is explicitly out of scope (spec §1); the core
//! only consumes a `DependencyResolver` to look up interceptor and handler
//! factories supplied by the host application.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// `Resolve(type) → instance|null`. Must recognise a "collection of T"
/// query for interceptor discovery (spec §6) via `resolve_many`.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>>;
    fn resolve_many(&self, key: &str) -> Vec<Arc<dyn Any + Send + Sync>>;
}

/// A trivial in-memory resolver: a name-keyed bag of singletons and
/// name-keyed collections, sufficient for host applications that do not
/// bring their own DI container.
#[derive(Default)]
pub struct MapResolver {
    singletons: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    collections: RwLock<HashMap<String, Vec<Arc<dyn Any + Send + Sync>>>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.singletons.write().unwrap().insert(key.into(), value);
    }

    pub fn register_many(&self, key: impl Into<String>, values: Vec<Arc<dyn Any + Send + Sync>>) {
        self.collections.write().unwrap().insert(key.into(), values);
    }
}

impl DependencyResolver for MapResolver {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.singletons.read().unwrap().get(key).cloned()
    }

    fn resolve_many(&self, key: &str) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.collections.read().unwrap().get(key).cloned().unwrap_or_default()
    }
}

/// `ToName(type) → string`, `ToType(name) → type|null` (spec §6), used for
/// cross-transport type identification headers. Backed by the
/// [`crate::registry::TypeRegistry`]'s bidirectional name table.
pub trait MessageTypeResolver: Send + Sync {
    fn to_name(&self, type_id: TypeId) -> Option<&'static str>;
    fn to_type_id(&self, name: &str) -> Option<TypeId>;
}

impl MessageTypeResolver for crate::registry::TypeRegistry {
    fn to_name(&self, type_id: TypeId) -> Option<&'static str> {
        self.name_for_type_id(type_id)
    }

    fn to_type_id(&self, name: &str) -> Option<TypeId> {
        self.type_id_for_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_resolver_roundtrips_singleton() {
        let resolver = MapResolver::new();
        resolver.register("clock", Arc::new(42i32));
        let resolved = resolver.resolve("clock").unwrap();
        assert_eq!(*resolved.downcast_ref::<i32>().unwrap(), 42);
    }

    #[test]
    fn map_resolver_returns_empty_collection_when_absent() {
        let resolver = MapResolver::new();
        assert!(resolver.resolve_many("interceptors").is_empty());
    }
}
