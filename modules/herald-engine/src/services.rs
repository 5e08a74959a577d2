//! Explicit resolution scope handed to handlers, middlewares and factories.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigurationError;

/// Immutable type map. Clones share the same services.
#[derive(Clone, Default)]
pub struct ServiceScope {
    services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceScope {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ServiceScopeBuilder {
        ServiceScopeBuilder::default()
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = self.services.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ConfigurationError> {
        self.get::<T>()
            .ok_or(ConfigurationError::MissingService(std::any::type_name::<T>()))
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("services", &self.services.len())
            .finish()
    }
}

#[derive(Default)]
pub struct ServiceScopeBuilder {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceScopeBuilder {
    /// Register `value` under its own type. A later insert of the same type wins.
    pub fn insert<T: Any + Send + Sync>(self, value: T) -> Self {
        self.insert_arc(Arc::new(value))
    }

    pub fn insert_arc<T: Any + Send + Sync>(mut self, value: Arc<T>) -> Self {
        self.services.insert(TypeId::of::<T>(), value);
        self
    }

    pub fn build(self) -> ServiceScope {
        ServiceScope {
            services: Arc::new(self.services),
        }
    }
}
