//! Type-keyed dependency container handed to services

use crate::{AgentError, Result};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type Provided = Arc<dyn Any + Send + Sync>;

/// Holds shared dependencies services are constructed from
///
/// One value per type; providing a type again replaces it.
#[derive(Default)]
pub struct Container {
    values: RwLock<HashMap<TypeId, Provided>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").field("len", &self.len()).finish()
    }
}

impl Container {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under its type
    pub fn provide<T: Any + Send + Sync>(&self, value: T) {
        self.provide_arc(Arc::new(value));
    }

    /// Register an already shared value under its type
    pub fn provide_arc<T: Any + Send + Sync>(&self, value: Arc<T>) {
        debug!("Providing {}", type_name::<T>());
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), value);
    }

    /// The value provided for `T`, if any
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let provided = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .cloned()?;
        provided.downcast::<T>().ok()
    }

    /// Like [`Container::get`], failing when nothing was provided
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get::<T>()
            .ok_or(AgentError::MissingDependency(type_name::<T>()))
    }

    /// Number of provided types
    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is provided
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every provided value
    pub fn clear(&self) {
        self.values.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
