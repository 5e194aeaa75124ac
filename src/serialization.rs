use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Converts values of one type to and from replicated payload bytes.
pub trait StateSerializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// Default serializer for serde-enabled types.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> StateSerializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(SerializationError::from)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::from)
    }
}

/// Type-keyed serializer registry shared by all collection instances of a
/// replica. Registration is exactly-once per type; a second registration
/// fails rather than overwriting the first.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: 'static>(
        &self,
        serializer: Arc<dyn StateSerializer<T>>,
    ) -> Result<(), SerializationError> {
        let mut entries = self.entries.write();
        let key = TypeId::of::<T>();
        if entries.contains_key(&key) {
            return Err(SerializationError::AlreadyRegistered {
                type_name: type_name::<T>(),
            });
        }
        entries.insert(key, Arc::new(serializer));
        Ok(())
    }

    pub fn get<T: 'static>(&self) -> Option<Arc<dyn StateSerializer<T>>> {
        let entries = self.entries.read();
        entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn StateSerializer<T>>>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a serializer for {type_name} is already registered")]
    AlreadyRegistered { type_name: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        item: String,
    }

    #[test]
    fn json_serializer_round_trips() {
        let serializer = JsonSerializer::<Order>::new();
        let order = Order {
            id: 7,
            item: "widget".into(),
        };
        let bytes = serializer.serialize(&order).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), order);
    }

    #[test]
    fn second_registration_for_a_type_fails() {
        let registry = SerializerRegistry::new();
        registry
            .add::<Order>(Arc::new(JsonSerializer::new()))
            .unwrap();
        let err = registry
            .add::<Order>(Arc::new(JsonSerializer::new()))
            .unwrap_err();
        assert!(matches!(err, SerializationError::AlreadyRegistered { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registered_serializer_is_retrievable_by_type() {
        let registry = SerializerRegistry::new();
        registry
            .add::<Order>(Arc::new(JsonSerializer::new()))
            .unwrap();
        let serializer = registry.get::<Order>().unwrap();
        let bytes = serializer
            .serialize(&Order {
                id: 1,
                item: "bolt".into(),
            })
            .unwrap();
        assert!(registry.get::<u64>().is_none());
        assert!(!bytes.is_empty());
    }
}
