use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Collection shapes a replica may host. The registry is closed: anything
/// outside this enum cannot be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    KeyedMap,
    OrderedQueue,
    ConcurrentQueue,
}

impl CollectionKind {
    /// Number of type parameters the kind expects.
    pub fn arity(self) -> usize {
        match self {
            CollectionKind::KeyedMap => 2,
            CollectionKind::OrderedQueue | CollectionKind::ConcurrentQueue => 1,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectionKind::KeyedMap => "keyed_map",
            CollectionKind::OrderedQueue => "ordered_queue",
            CollectionKind::ConcurrentQueue => "concurrent_queue",
        };
        f.write_str(name)
    }
}

/// Element kinds a collection may be parameterized over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bytes,
    Utf8,
    U64,
    I64,
    F64,
    Bool,
}

/// A parameterized collection capability, e.g. "keyed map of Utf8 to Bytes".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    kind: CollectionKind,
    params: Vec<ValueKind>,
}

impl Capability {
    pub fn new(kind: CollectionKind, params: Vec<ValueKind>) -> Self {
        Self { kind, params }
    }

    pub fn keyed_map(key: ValueKind, value: ValueKind) -> Self {
        Self::new(CollectionKind::KeyedMap, vec![key, value])
    }

    pub fn ordered_queue(value: ValueKind) -> Self {
        Self::new(CollectionKind::OrderedQueue, vec![value])
    }

    pub fn concurrent_queue(value: ValueKind) -> Self {
        Self::new(CollectionKind::ConcurrentQueue, vec![value])
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<", self.kind)?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param:?}")?;
        }
        f.write_str(">")
    }
}

/// Concrete implementation selected for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcreteType {
    KeyedMapStore,
    OrderedQueueStore,
    ConcurrentQueueStore,
}

/// Memoizing map from requested capabilities to the concrete implementation
/// to instantiate.
///
/// First-time resolution of the same key may race; the cache converges on a
/// single winning mapping and later callers adopt it.
#[derive(Debug, Default)]
pub struct TypeResolver {
    cache: RwLock<HashMap<Capability, ConcreteType>>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, capability: &Capability) -> Result<ConcreteType, ResolveError> {
        if let Some(resolved) = self.cache.read().get(capability) {
            return Ok(*resolved);
        }
        let resolved = Self::resolve_uncached(capability)?;
        let mut cache = self.cache.write();
        Ok(*cache.entry(capability.clone()).or_insert(resolved))
    }

    fn resolve_uncached(capability: &Capability) -> Result<ConcreteType, ResolveError> {
        let expected = capability.kind().arity();
        let observed = capability.params().len();
        if observed != expected {
            return Err(ResolveError::UnsupportedCapability {
                kind: capability.kind(),
                expected_arity: expected,
                observed_arity: observed,
            });
        }
        Ok(match capability.kind() {
            CollectionKind::KeyedMap => ConcreteType::KeyedMapStore,
            CollectionKind::OrderedQueue => ConcreteType::OrderedQueueStore,
            CollectionKind::ConcurrentQueue => ConcreteType::ConcurrentQueueStore,
        })
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(
        "unsupported capability: {kind} expects {expected_arity} type parameter(s), observed {observed_arity}"
    )]
    UnsupportedCapability {
        kind: CollectionKind,
        expected_arity: usize,
        observed_arity: usize,
    },
}
