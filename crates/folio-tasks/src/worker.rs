//! Worker execution contexts.
//!
//! Each worker thread owns exactly one [`WorkerContext`]. State that must not
//! cross threads (open font faces, glyph caches) lives in its extension map,
//! so the cache is found through the context that runs the work instead of a
//! thread-local global.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use folio_types::WorkerId;

pub struct WorkerContext {
    id: WorkerId,
    name: String,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl WorkerContext {
    /// Queues create one per worker thread. Building one by hand lets worker
    /// code run inline, as tests do.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkerId::next(),
            name: name.into(),
            extensions: HashMap::new(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch this worker's `T`, creating it on first use.
    pub fn get_or_insert_with<T, F>(&mut self, init: F) -> &mut T
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        let slot = self
            .extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()));
        // The slot for TypeId::of::<T>() only ever holds a T.
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("extension slot holds a foreign type"),
        }
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
