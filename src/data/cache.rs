//! Entry caching and binding

use std::sync::Arc;

use parking_lot::Mutex;

use super::storage::{DataRef, DataStorage, ScopeLevel};
use crate::error::{EngineError, EngineResult};

/// Smart cache around a single storage entry.
///
/// Holding the cache keeps the entry referenced (and therefore alive).
/// Branch-level storages cannot be cached: they are owned by a single worker
/// thread, so handing out counted references to them would be meaningless.
pub struct DataCache<T: Send + Sync + 'static> {
    entry: Mutex<Option<DataRef<T>>>,
}

impl<T: Send + Sync + 'static> DataCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    /// Creates a cache bound to `id` in `storage`.
    pub fn from_storage(storage: &DataStorage, id: i32) -> EngineResult<Self> {
        let cache = Self::new();
        cache.set(storage, id)?;
        Ok(cache)
    }

    /// Rebinds the cache to `id` in `storage`, dropping the previous
    /// reference. An absent ID leaves the cache empty.
    pub fn set(&self, storage: &DataStorage, id: i32) -> EngineResult<()> {
        if storage.level() == ScopeLevel::Branch {
            return Err(EngineError::invalid_argument(
                "storage",
                "branch-level scopes cannot be cached",
            ));
        }
        *self.entry.lock() = storage.get::<T>(id);
        Ok(())
    }

    /// Adopts an already-resolved reference.
    pub fn set_ref(&self, entry: Option<DataRef<T>>) {
        *self.entry.lock() = entry;
    }

    /// Drops the cached reference.
    pub fn clear(&self) {
        *self.entry.lock() = None;
    }

    /// Clone of the cached reference, if any.
    pub fn get(&self) -> Option<DataRef<T>> {
        self.entry.lock().clone()
    }

    pub fn has_data(&self) -> bool {
        self.entry.lock().is_some()
    }

    /// ID of the cached entry, if any.
    pub fn data_id(&self) -> Option<i32> {
        self.entry.lock().as_ref().map(DataRef::data_id)
    }
}

impl<T: Send + Sync + 'static> Default for DataCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback that writes the current source into a destination object.
/// Invoked with `None` to cleanly unbind before any rebinding.
pub type BindUpdate<S, D> = Arc<dyn Fn(&D, Option<&S>) + Send + Sync + 'static>;

/// Connects a source entry to a destination entry through a setter.
///
/// Whenever the source (or destination) changes, the binder first invokes the
/// setter on the current destination with `None` to unbind, then stores the
/// new association and re-invokes the setter with the new source.
pub struct DataBinder<S, D>
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    source: DataCache<S>,
    destination: DataCache<D>,
    update: Option<BindUpdate<S, D>>,
}

impl<S, D> DataBinder<S, D>
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Creates an unbound binder.
    pub fn new() -> Self {
        Self {
            source: DataCache::new(),
            destination: DataCache::new(),
            update: None,
        }
    }

    /// Points the binder at a new source and pushes it into the destination.
    pub fn set_source(&mut self, storage: &DataStorage, id: i32) -> EngineResult<()> {
        self.clear_destination();
        self.source.set(storage, id)?;
        self.update_destination();
        Ok(())
    }

    /// Points the binder at a new destination, unbinding the previous one.
    pub fn set_destination(
        &mut self,
        storage: &DataStorage,
        id: i32,
        update: BindUpdate<S, D>,
    ) -> EngineResult<()> {
        self.clear_destination();
        self.update = Some(update);
        self.destination.set(storage, id)?;
        self.update_destination();
        Ok(())
    }

    /// Detaches the source and/or the destination.
    pub fn unbind(&mut self, source: bool, destination: bool) {
        if source || destination {
            self.clear_destination();
        }
        if source {
            self.source.clear();
        }
        if destination {
            self.destination.clear();
        }
    }

    pub fn source_data(&self) -> Option<DataRef<S>> {
        self.source.get()
    }

    pub fn destination_data(&self) -> Option<DataRef<D>> {
        self.destination.get()
    }

    pub fn is_source_bound(&self) -> bool {
        self.source.has_data()
    }

    pub fn is_destination_bound(&self) -> bool {
        self.destination.has_data()
    }

    fn update_destination(&self) {
        if let (Some(destination), Some(update)) = (self.destination.get(), &self.update) {
            let source = self.source.get();
            update(&destination, source.as_deref());
        }
    }

    fn clear_destination(&self) {
        if let (Some(destination), Some(update)) = (self.destination.get(), &self.update) {
            update(&destination, None);
        }
    }
}

impl<S, D> Default for DataBinder<S, D>
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, D> Drop for DataBinder<S, D>
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.clear_destination();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[test]
    fn cache_rejects_branch_level_storage() {
        let storage = DataStorage::new(ScopeLevel::Branch);
        let cache = DataCache::<u32>::new();
        assert!(cache.set(&storage, 1).is_err());
    }

    #[test]
    fn cache_keeps_the_entry_referenced() {
        let storage = DataStorage::new(ScopeLevel::Workflow);
        storage.add(9, 123u32, ScopeLevel::Workflow).unwrap();
        let cache = DataCache::<u32>::from_storage(&storage, 9).unwrap();
        assert!(storage.remove(9, ScopeLevel::Workflow).is_err());
        cache.clear();
        storage.remove(9, ScopeLevel::Workflow).unwrap();
    }

    #[derive(Default)]
    struct Sink {
        seen: PlMutex<Vec<Option<u32>>>,
    }

    #[test]
    fn binder_unbinds_before_rebinding() {
        let storage = DataStorage::new(ScopeLevel::Workflow);
        storage.add(1, 10u32, ScopeLevel::Workflow).unwrap();
        storage.add(2, 20u32, ScopeLevel::Workflow).unwrap();
        storage.add(3, Sink::default(), ScopeLevel::Workflow).unwrap();

        let mut binder = DataBinder::<u32, Sink>::new();
        let update: BindUpdate<u32, Sink> =
            Arc::new(|sink, source| sink.seen.lock().push(source.copied()));
        binder.set_destination(&storage, 3, update).unwrap();
        binder.set_source(&storage, 1).unwrap();
        binder.set_source(&storage, 2).unwrap();
        binder.unbind(true, true);

        let sink = storage.get::<Sink>(3).unwrap();
        let seen = sink.seen.lock().clone();
        // bind destination (no source yet), bind 10, unbind, bind 20, unbind.
        assert_eq!(seen, vec![None, None, Some(10), None, Some(20), None]);
    }
}
